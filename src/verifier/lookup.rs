use std::{future::Future, io};

/// A trait for looking up DNS TXT records.
///
/// This is the seam through which the verifier reaches a resolver; exactly
/// one TXT query is issued per signature. An error of kind
/// [`NotFound`][io::ErrorKind::NotFound] is understood as NXDOMAIN and is
/// permanent; `TimedOut` and all other kinds count as transient failures.
///
/// Cancellation is expressed by dropping the query future. A dropped query
/// never observes the verification context again; no additional liveness
/// flag is needed.
pub trait LookupTxt: Send + Sync {
    /// The answer: TXT records in reply order, with the character strings
    /// of each record already concatenated.
    type Answer: IntoIterator<Item = io::Result<Vec<u8>>>;

    /// The query future.
    type Query<'a>: Future<Output = io::Result<Self::Answer>> + Send + 'a
    where
        Self: 'a;

    /// Looks up TXT records for the given domain name.
    fn lookup_txt(&self, domain: &str) -> Self::Query<'_>;
}
