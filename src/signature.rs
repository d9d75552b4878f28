//! The `DKIM-Signature` header and its parsed form.

use crate::{
    crypto::{DigestState, HashAlgorithm},
    tag_list::{self, Tag},
    util::{decode_base64, encode_base64, CanonicalStr},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// The name of the signature header field.
pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

const DKIM_DNS_LABEL: &str = "_domainkey";

/// A signature algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    /// The historic *rsa-sha1* signature algorithm.
    RsaSha1,
    /// The *rsa-sha256* signature algorithm.
    RsaSha256,
}

impl SignatureAlgorithm {
    /// Returns this signature algorithm’s hash algorithm.
    pub fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            Self::RsaSha1 => HashAlgorithm::Sha1,
            Self::RsaSha256 => HashAlgorithm::Sha256,
        }
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

/// A canonicalization algorithm.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    /// The *simple* canonicalization algorithm.
    #[default]
    Simple,
    /// The *relaxed* canonicalization algorithm.
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl Display for CanonicalizationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

/// A pair of header/body canonicalization algorithms.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    /// The header canonicalization.
    pub header: CanonicalizationAlgorithm,
    /// The body canonicalization.
    pub body: CanonicalizationAlgorithm,
}

impl CanonicalStr for Canonicalization {
    fn canonical_str(&self) -> &'static str {
        use CanonicalizationAlgorithm::*;

        match (self.header, self.body) {
            (Simple, Simple) => "simple/simple",
            (Simple, Relaxed) => "simple/relaxed",
            (Relaxed, Simple) => "relaxed/simple",
            (Relaxed, Relaxed) => "relaxed/relaxed",
        }
    }
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl fmt::Debug for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", &self.header, &self.body)
    }
}

/// An error arising from parsing or validating a `DKIM-Signature` header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureError {
    VersionInvalid,
    InvalidAlgorithm,
    InvalidHeaderList,
    InvalidBodyLength,
    MissingSignature,
    MissingBodyHash,
    MissingDomain,
    MissingSelector,
    MissingVersion,
    MissingHeaderList,
    MissingAlgorithm,
    UnknownTag,
    Syntax,
    BodyHashLength,
    Future,
    Expired,
}

impl Display for SignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionInvalid => write!(f, "invalid version"),
            Self::InvalidAlgorithm => write!(f, "invalid signature algorithm"),
            Self::InvalidHeaderList => write!(f, "invalid signed header list"),
            Self::InvalidBodyLength => write!(f, "invalid body length"),
            Self::MissingSignature => write!(f, "b= tag missing"),
            Self::MissingBodyHash => write!(f, "bh= tag missing"),
            Self::MissingDomain => write!(f, "d= tag missing"),
            Self::MissingSelector => write!(f, "s= tag missing"),
            Self::MissingVersion => write!(f, "v= tag missing"),
            Self::MissingHeaderList => write!(f, "h= tag missing"),
            Self::MissingAlgorithm => write!(f, "a= tag missing"),
            Self::UnknownTag => write!(f, "unknown tag"),
            Self::Syntax => write!(f, "syntax error"),
            Self::BodyHashLength => write!(f, "body hash length does not match algorithm"),
            Self::Future => write!(f, "signature timestamp in the future"),
            Self::Expired => write!(f, "signature has expired"),
        }
    }
}

impl Error for SignatureError {}

/// The parsed form of one `DKIM-Signature` header, together with the two
/// running digests that accumulate the canonicalized body and headers.
///
/// A context is created per signature when the header arrives and lives for
/// the duration of one verification.
pub struct SignatureContext {
    /// The signature version; always 1.
    pub version: u8,
    pub algorithm: SignatureAlgorithm,
    pub canonicalization: Canonicalization,
    pub domain: String,
    pub selector: String,
    /// Signed header names, in the order given in the h= tag.
    pub signed_headers: Vec<String>,
    /// The decoded b= value.
    pub signature_data: Vec<u8>,
    /// The decoded bh= value.
    pub body_hash: Vec<u8>,
    pub body_length: Option<u64>,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,

    pub(crate) raw_value: String,
    dns_key: String,
    pub(crate) body_hash_state: DigestState,
    pub(crate) headers_hash_state: DigestState,
}

impl SignatureContext {
    /// Parses a `DKIM-Signature` header value into a signature context.
    ///
    /// `now` is the verification time in epoch seconds, checked against the
    /// t= and x= tags. A repeated tag overwrites the earlier value.
    pub fn parse(value: &str, now: u64) -> Result<Self, SignatureError> {
        let tags = tag_list::parse_tag_list(value)?;

        let mut version_seen = false;
        let mut algorithm = None;
        let mut canonicalization = Canonicalization::default();
        let mut domain = None;
        let mut selector = None;
        let mut signed_headers = None;
        let mut signature_data = None;
        let mut body_hash = None;
        let mut body_length = None;
        let mut timestamp = None;
        let mut expiration = None;

        for (tag, value) in tags {
            match tag {
                Tag::Version => {
                    if value != "1" {
                        return Err(SignatureError::VersionInvalid);
                    }
                    version_seen = true;
                }
                Tag::Algorithm => {
                    algorithm = Some(match value {
                        "rsa-sha1" => SignatureAlgorithm::RsaSha1,
                        "rsa-sha256" => SignatureAlgorithm::RsaSha256,
                        _ => return Err(SignatureError::InvalidAlgorithm),
                    });
                }
                Tag::Signature => {
                    let data = decode_base64(value).map_err(|_| SignatureError::Syntax)?;
                    if !data.is_empty() {
                        signature_data = Some(data);
                    }
                }
                Tag::BodyHash => {
                    let data = decode_base64(value).map_err(|_| SignatureError::Syntax)?;
                    if !data.is_empty() {
                        body_hash = Some(data);
                    }
                }
                Tag::Canonicalization => canonicalization = parse_canonicalization(value)?,
                Tag::Domain => {
                    if !value.is_empty() {
                        domain = Some(value.to_owned());
                    }
                }
                Tag::Selector => {
                    if !value.is_empty() {
                        selector = Some(value.to_owned());
                    }
                }
                Tag::HeaderList => {
                    let mut from_seen = false;
                    let mut names = Vec::new();
                    for name in value.split(':') {
                        let name = name.trim_matches(|c: char| c.is_ascii_whitespace());
                        if name.is_empty() {
                            continue;
                        }
                        if name.eq_ignore_ascii_case("from") {
                            from_seen = true;
                        }
                        names.push(name.to_owned());
                    }
                    if names.is_empty() || !from_seen {
                        return Err(SignatureError::InvalidHeaderList);
                    }
                    signed_headers = Some(names);
                }
                Tag::BodyLength => {
                    let value = value.parse().map_err(|_| SignatureError::InvalidBodyLength)?;
                    body_length = Some(value);
                }
                Tag::Timestamp => {
                    let value = value.parse().map_err(|_| SignatureError::Syntax)?;
                    timestamp = Some(value);
                }
                Tag::Expiration => {
                    let value = value.parse().map_err(|_| SignatureError::Syntax)?;
                    expiration = Some(value);
                }
                Tag::Identity | Tag::QueryMethods | Tag::CopiedHeaders => {}
            }
        }

        let signature_data = signature_data.ok_or(SignatureError::MissingSignature)?;
        let body_hash = body_hash.ok_or(SignatureError::MissingBodyHash)?;
        let domain = domain.ok_or(SignatureError::MissingDomain)?;
        let selector = selector.ok_or(SignatureError::MissingSelector)?;
        if !version_seen {
            return Err(SignatureError::MissingVersion);
        }
        let signed_headers = signed_headers.ok_or(SignatureError::MissingHeaderList)?;
        let algorithm = algorithm.ok_or(SignatureError::MissingAlgorithm)?;

        let hash_algorithm = algorithm.hash_algorithm();
        if body_hash.len() != hash_algorithm.digest_len() {
            return Err(SignatureError::BodyHashLength);
        }

        if matches!(timestamp, Some(t) if t > now) {
            return Err(SignatureError::Future);
        }
        if matches!(expiration, Some(x) if x <= now) {
            return Err(SignatureError::Expired);
        }

        let dns_key = format!("{selector}.{DKIM_DNS_LABEL}.{domain}");

        Ok(Self {
            version: 1,
            algorithm,
            canonicalization,
            domain,
            selector,
            signed_headers,
            signature_data,
            body_hash,
            body_length,
            timestamp,
            expiration,
            raw_value: value.to_owned(),
            dns_key,
            body_hash_state: DigestState::new(hash_algorithm),
            headers_hash_state: DigestState::new(hash_algorithm),
        })
    }

    /// The DNS name queried for the public key record.
    pub fn dns_key(&self) -> &str {
        &self.dns_key
    }
}

fn parse_canonicalization(value: &str) -> Result<Canonicalization, SignatureError> {
    fn algorithm(s: &str) -> Result<CanonicalizationAlgorithm, SignatureError> {
        match s {
            "simple" => Ok(CanonicalizationAlgorithm::Simple),
            "relaxed" => Ok(CanonicalizationAlgorithm::Relaxed),
            _ => Err(SignatureError::InvalidAlgorithm),
        }
    }

    Ok(match value.split_once('/') {
        Some((header, body)) => Canonicalization {
            header: algorithm(header)?,
            body: algorithm(body)?,
        },
        // The single form names the header canonicalization only; the body
        // canonicalization stays at its default.
        None => Canonicalization {
            header: algorithm(value)?,
            body: CanonicalizationAlgorithm::default(),
        },
    })
}

impl fmt::Debug for SignatureContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureContext")
            .field("algorithm", &self.algorithm)
            .field("canonicalization", &self.canonicalization)
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("signed_headers", &self.signed_headers)
            .field("signature_data", &encode_base64(&self.signature_data))
            .field("body_hash", &encode_base64(&self.body_hash))
            .field("body_length", &self.body_length)
            .field("timestamp", &self.timestamp)
            .field("expiration", &self.expiration)
            .field("dns_key", &self.dns_key)
            .finish()
    }
}

impl PartialEq for SignatureContext {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.algorithm == other.algorithm
            && self.canonicalization == other.canonicalization
            && self.domain == other.domain
            && self.selector == other.selector
            && self.signed_headers == other.signed_headers
            && self.signature_data == other.signature_data
            && self.body_hash == other.body_hash
            && self.body_length == other.body_length
            && self.timestamp == other.timestamp
            && self.expiration == other.expiration
            && self.raw_value == other.raw_value
            && self.dns_key == other.dns_key
    }
}
