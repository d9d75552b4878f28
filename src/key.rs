//! RSA public keys obtained from DNS key records.

use crate::util::decode_base64;
use rsa::{pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, PublicKeyParts, RsaPublicKey};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io,
};

/// An error arising from retrieving or decoding a public key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyError {
    /// The DNS lookup yielded no usable reply.
    NoKey(io::ErrorKind),
    /// The record or its key material could not be parsed.
    Fail,
    /// The record carries an empty `p=` tag.
    Revoked,
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKey(kind) => write!(f, "key record lookup failed: {kind:?}"),
            Self::Fail => write!(f, "unusable key record"),
            Self::Revoked => write!(f, "key was revoked"),
        }
    }
}

impl Error for KeyError {}

/// An RSA public key extracted from a key record.
///
/// The key owns its RSA material and is independent of the verification
/// context; callers may cache it across messages.
pub struct PublicKey {
    key: RsaPublicKey,
}

impl PublicKey {
    /// Decodes the Base64 key material of a `p=` tag into an RSA public key.
    ///
    /// The DER bytes are read as SubjectPublicKeyInfo first, the de facto
    /// format for DKIM keys in DNS, falling back to the bare RSAPublicKey
    /// form that RFC 6376 nominally specifies.
    pub fn from_record_data(data: &str) -> Result<Self, KeyError> {
        let der = decode_base64(data).map_err(|_| KeyError::Fail)?;

        let key = RsaPublicKey::from_public_key_der(&der)
            .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
            .map_err(|_| KeyError::Fail)?;

        Ok(Self { key })
    }

    /// The size of a signature made with this key, in bytes.
    pub fn signature_len(&self) -> usize {
        self.key.size()
    }

    pub(crate) fn rsa(&self) -> &RsaPublicKey {
        &self.key
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &(self.signature_len() * 8))
            .finish()
    }
}
