// mtadkim – DKIM verification and signing policy for mail filters
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! TXT lookups through the hickory resolver.

use crate::verifier::LookupTxt;
use hickory_resolver::{
    error::{ResolveError, ResolveErrorKind},
    TokioAsyncResolver,
};
use std::{
    future::Future,
    io::{self, ErrorKind},
    pin::Pin,
};

impl LookupTxt for TokioAsyncResolver {
    type Answer = Vec<io::Result<Vec<u8>>>;
    type Query<'a> = Pin<Box<dyn Future<Output = io::Result<Self::Answer>> + Send + 'a>>;

    fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
        // anchor the query name so no search suffix gets appended
        let fqdn = if domain.ends_with('.') {
            domain.to_owned()
        } else {
            format!("{domain}.")
        };

        Box::pin(async move {
            let reply = match self.txt_lookup(fqdn).await {
                Ok(reply) => reply,
                Err(e) => return Err(map_resolve_error(e)),
            };

            // character strings of one record are joined before parsing
            let records = reply
                .iter()
                .map(|txt| {
                    let mut data = Vec::new();
                    for chunk in txt.txt_data() {
                        data.extend_from_slice(chunk);
                    }
                    Ok(data)
                })
                .collect();

            Ok(records)
        })
    }
}

// NXDOMAIN and timeouts keep their identity so the caller can distinguish
// permanent from transient lookup failures.
fn map_resolve_error(error: ResolveError) -> io::Error {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => ErrorKind::NotFound.into(),
        ResolveErrorKind::Timeout => ErrorKind::TimedOut.into(),
        _ => io::Error::new(ErrorKind::Other, error),
    }
}
