//! Cryptographic building blocks: hash algorithms, incremental digest
//! state, and the RSA signature primitive.

use rsa::{Pkcs1v15Sign, PublicKey, PublicKeyParts, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use std::fmt::{self, Display, Formatter};

/// The hash algorithm of a *rsa-sha1* or *rsa-sha256* signature.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Returns the digest length in bytes: 20 for SHA-1, 32 for SHA-256.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }
}

/// An incremental message digest.
///
/// Two of these live inside a signature context, one accumulating the
/// canonicalized body, the other the canonicalized headers.
pub struct DigestState {
    digest: Box<dyn digest::DynDigest + Send>,
}

impl DigestState {
    pub fn new(hash_alg: HashAlgorithm) -> Self {
        let digest: Box<dyn digest::DynDigest + Send> = match hash_alg {
            HashAlgorithm::Sha1 => Box::new(Sha1::default()),
            HashAlgorithm::Sha256 => Box::new(Sha256::default()),
        };

        Self { digest }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    pub fn finalize(self) -> Box<[u8]> {
        self.digest.finalize()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum VerificationError {
    /// The signature data does not have the length of the RSA modulus.
    SignatureLength,
    /// The RSA primitive rejected the signature.
    VerificationFailure,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureLength => write!(f, "signature has incorrect length"),
            Self::VerificationFailure => write!(f, "RSA verification failed"),
        }
    }
}

/// Verifies `signature_data` over the already-computed `digest` with the
/// given public key.
pub fn verify_rsa(
    hash_alg: HashAlgorithm,
    public_key: &RsaPublicKey,
    digest: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    if signature_data.len() != public_key.size() {
        return Err(VerificationError::SignatureLength);
    }

    let result = match hash_alg {
        HashAlgorithm::Sha1 => {
            public_key.verify(Pkcs1v15Sign::new::<Sha1>(), digest, signature_data)
        }
        HashAlgorithm::Sha256 => {
            public_key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature_data)
        }
    };

    result.map_err(|_| VerificationError::VerificationFailure)
}
