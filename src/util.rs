use base64ct::{Base64, Base64Unpadded, Encoding};
use std::fmt::{self, Display, Formatter};

/// A trait for entities that can be represented as a canonical string.
pub trait CanonicalStr {
    /// Returns the canonical representation as a static string slice.
    fn canonical_str(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Base64Error;

impl Display for Base64Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "could not decode Base64 data")
    }
}

impl std::error::Error for Base64Error {}

/// Decodes a Base64 string into bytes.
///
/// Folding whitespace within the input is ignored, and trailing padding is
/// optional, as both occur in tag values and key records in the wild.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, Base64Error> {
    let value: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect();

    Base64::decode_vec(&value)
        .or_else(|_| Base64Unpadded::decode_vec(&value))
        .map_err(|_| Base64Error)
}

/// Encodes binary data as a Base64 string.
pub fn encode_base64<T: AsRef<[u8]>>(input: T) -> String {
    Base64::encode_string(input.as_ref())
}
