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

//! Signature verification and DNS key retrieval.
//!
//! Verification of one signature proceeds in three steps: parse the
//! signature header into a [`SignatureContext`], obtain the public key via
//! [`fetch_key`], then drive the canonicalizers and the RSA primitive with
//! [`check`]. [`verify_message`] ties the steps together for every
//! `DKIM-Signature` header of a message.
//!
//! All work apart from the single DNS query is synchronous and CPU-bound;
//! concurrency exists only across messages.

#[cfg(feature = "hickory-resolver")]
mod hickory;
mod lookup;

pub use lookup::LookupTxt;

use crate::{
    canonicalize::{self, HeaderCanonicalizer},
    crypto,
    key::{KeyError, PublicKey},
    message::Message,
    record,
    signature::{SignatureContext, SignatureError, DKIM_SIGNATURE_NAME},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io::ErrorKind,
    str,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::trace;

/// The result of processing one signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// The signature verified; message processing continues.
    Continue,
    /// The signature is cryptographically invalid.
    Reject,
    /// Verification failed transiently; the message may be retried.
    Tempfail,
    /// Verification failed permanently.
    Permfail,
    /// The message lacks a header required by the signature.
    RecordError,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Reject => write!(f, "reject"),
            Self::Tempfail => write!(f, "tempfail"),
            Self::Permfail => write!(f, "permfail"),
            Self::RecordError => write!(f, "record error"),
        }
    }
}

/// An error arising during verification of one signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerifierError {
    /// The `DKIM-Signature` header could not be parsed or validated.
    Signature(SignatureError),
    /// No usable public key could be obtained.
    Key(KeyError),
    /// The computed body hash does not match the bh= tag.
    BodyHashMismatch,
    /// The signature data is malformed or the RSA verification failed.
    BadSignature,
    /// The `DKIM-Signature` header could not be located in the message.
    SignatureHeaderMissing,
}

impl VerifierError {
    /// Maps this error to the verdict reported to the caller.
    ///
    /// A failed DNS lookup maps to [`Verdict::Permfail`] for NXDOMAIN and
    /// to [`Verdict::Tempfail`] for timeouts and server failures.
    pub fn verdict(&self) -> Verdict {
        match self {
            Self::Signature(_) => Verdict::Permfail,
            Self::Key(KeyError::NoKey(kind)) => {
                if *kind == ErrorKind::NotFound {
                    Verdict::Permfail
                } else {
                    Verdict::Tempfail
                }
            }
            Self::Key(_) => Verdict::Permfail,
            Self::BodyHashMismatch | Self::BadSignature => Verdict::Reject,
            Self::SignatureHeaderMissing => Verdict::RecordError,
        }
    }
}

impl Display for VerifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signature(error) => error.fmt(f),
            Self::Key(error) => error.fmt(f),
            Self::BodyHashMismatch => write!(f, "body hash mismatch"),
            Self::BadSignature => write!(f, "signature verification failed"),
            Self::SignatureHeaderMissing => write!(f, "DKIM-Signature header not found"),
        }
    }
}

impl Error for VerifierError {}

impl From<SignatureError> for VerifierError {
    fn from(error: SignatureError) -> Self {
        Self::Signature(error)
    }
}

impl From<KeyError> for VerifierError {
    fn from(error: KeyError) -> Self {
        Self::Key(error)
    }
}

/// Issues the TXT query for the context’s DNS key name and parses the reply
/// into a public key.
///
/// Records are tried in reply order and the first usable key wins; parse
/// errors from earlier records are then insignificant. If no record yields
/// a key, the last error is surfaced.
pub async fn fetch_key<T>(resolver: &T, ctx: &SignatureContext) -> Result<PublicKey, KeyError>
where
    T: LookupTxt + ?Sized,
{
    let answer = resolver
        .lookup_txt(ctx.dns_key())
        .await
        .map_err(|e| KeyError::NoKey(e.kind()))?;

    let mut last_error = None;

    for txt in answer {
        let txt = match txt {
            Ok(data) => data,
            Err(e) => {
                last_error = Some(KeyError::NoKey(e.kind()));
                continue;
            }
        };

        let txt = match String::from_utf8(txt) {
            Ok(s) => s,
            Err(_) => {
                last_error = Some(KeyError::Fail);
                continue;
            }
        };

        match record::extract_key_data(&txt).and_then(PublicKey::from_record_data) {
            Ok(key) => {
                trace!(name = ctx.dns_key(), "obtained public key");
                return Ok(key);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or(KeyError::NoKey(ErrorKind::NotFound)))
}

/// Verifies one signature against the message, consuming the context.
///
/// The canonicalized body is hashed and compared against the bh= tag before
/// the headers digest is finalized; a body hash mismatch never reaches the
/// RSA primitive.
pub fn check(
    mut ctx: SignatureContext,
    key: &PublicKey,
    message: &Message<'_>,
) -> Result<(), VerifierError> {
    let body = message.body();
    let body = match ctx.body_length {
        Some(len) => {
            let len = usize::try_from(len).unwrap_or(usize::MAX);
            &body[..len.min(body.len())]
        }
        None => body,
    };

    canonicalize::hash_body(&mut ctx.body_hash_state, ctx.canonicalization.body, body);

    let mut headers = HeaderCanonicalizer::new(message, ctx.canonicalization.header);

    for name in &ctx.signed_headers {
        if !headers.feed(&mut ctx.headers_hash_state, name) {
            // absent signed headers contribute nothing
            trace!(%name, "signed header not present in message");
        }
    }

    if !headers.feed_signature(&mut ctx.headers_hash_state, ctx.raw_value.as_bytes()) {
        trace!("DKIM-Signature header not found in message");
        return Err(VerifierError::SignatureHeaderMissing);
    }

    let body_digest = ctx.body_hash_state.finalize();
    if body_digest.as_ref() != ctx.body_hash.as_slice() {
        trace!("body hash mismatch");
        return Err(VerifierError::BodyHashMismatch);
    }
    trace!("body hash matched");

    let headers_digest = ctx.headers_hash_state.finalize();

    match crypto::verify_rsa(
        ctx.algorithm.hash_algorithm(),
        key.rsa(),
        &headers_digest,
        &ctx.signature_data,
    ) {
        Ok(()) => {
            trace!("RSA verification successful");
            Ok(())
        }
        Err(e) => {
            trace!(%e, "RSA verification failed");
            Err(VerifierError::BadSignature)
        }
    }
}

/// The outcome of verifying one `DKIM-Signature` header.
#[derive(Debug)]
pub struct VerificationOutcome {
    /// The signing domain, when the signature could be parsed.
    pub domain: Option<String>,
    /// The selector, when the signature could be parsed.
    pub selector: Option<String>,
    pub verdict: Verdict,
    pub error: Option<VerifierError>,
}

/// Verifies every `DKIM-Signature` header of a message, at the current time.
pub async fn verify_message<T>(resolver: &T, message: &Message<'_>) -> Vec<VerificationOutcome>
where
    T: LookupTxt + ?Sized,
{
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_secs())
        .unwrap_or_default();

    verify_message_at(resolver, message, now).await
}

/// Verifies every `DKIM-Signature` header of a message against the given
/// verification time.
pub async fn verify_message_at<T>(
    resolver: &T,
    message: &Message<'_>,
    now: u64,
) -> Vec<VerificationOutcome>
where
    T: LookupTxt + ?Sized,
{
    let mut outcomes = Vec::new();

    for value in message.header_values(DKIM_SIGNATURE_NAME) {
        let parsed = str::from_utf8(value)
            .map_err(|_| SignatureError::Syntax)
            .and_then(|value| SignatureContext::parse(value, now));

        let ctx = match parsed {
            Ok(ctx) => ctx,
            Err(e) => {
                trace!(%e, "cannot parse DKIM-Signature header");
                let error = VerifierError::Signature(e);
                outcomes.push(VerificationOutcome {
                    domain: None,
                    selector: None,
                    verdict: error.verdict(),
                    error: Some(error),
                });
                continue;
            }
        };

        trace!(domain = %ctx.domain, selector = %ctx.selector, "processing DKIM-Signature");

        let domain = Some(ctx.domain.clone());
        let selector = Some(ctx.selector.clone());

        let result = match fetch_key(resolver, &ctx).await {
            Ok(key) => check(ctx, &key, message),
            Err(e) => Err(VerifierError::Key(e)),
        };

        let (verdict, error) = match result {
            Ok(()) => (Verdict::Continue, None),
            Err(e) => (e.verdict(), Some(e)),
        };

        outcomes.push(VerificationOutcome {
            domain,
            selector,
            verdict,
            error,
        });
    }

    outcomes
}
