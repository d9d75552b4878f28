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

//! A library implementing *DomainKeys Identified Mail* (DKIM, [RFC 6376])
//! signature verification for mail filters, together with the policy logic
//! a signer uses to decide whether a message should be signed at all.
//!
//! # Verification
//!
//! A [`DKIM-Signature`][signature::DKIM_SIGNATURE_NAME] header is parsed
//! into a [`SignatureContext`]; the public key is fetched over DNS through
//! the [`LookupTxt`] abstraction with [`verifier::fetch_key`]; and
//! [`verifier::check`] canonicalizes the message, compares the body hash
//! and verifies the RSA signature, yielding a [`Verdict`]. The convenience
//! driver [`verify_message`] runs all three steps for every signature of a
//! message.
//!
//! The message itself is consumed through the thin [`Message`] shim, which
//! splits headers from body and indexes raw header fields; full RFC 5322
//! parsing is the caller’s business.
//!
//! # Signing policy
//!
//! The [`policy`] module is independent of the verifier. Given a
//! [`SignTask`][policy::SignTask] describing one message and a
//! [`SigningConfig`][policy::SigningConfig], [`policy::evaluate`] returns
//! either signing parameters or a typed skip reason. Key material loading,
//! Redis, and the signing operation itself stay outside this crate.
//!
//! # Cargo features
//!
//! The feature **`hickory-resolver`** provides an implementation of
//! [`LookupTxt`] for the [hickory resolver]. `LookupTxt` is the only
//! abstraction used for DNS resolution during verification.
//!
//! # Trace logging
//!
//! This library uses the [tracing] crate for internal trace logging. For
//! insight into library operation, install a tracing subscriber and enable
//! logging at `trace` level.
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [hickory resolver]: https://crates.io/crates/hickory-resolver
//! [tracing]: https://crates.io/crates/tracing

pub mod canonicalize;
pub mod crypto;
pub mod key;
pub mod message;
pub mod policy;
pub mod record;
pub mod signature;
mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    crypto::HashAlgorithm,
    key::{KeyError, PublicKey},
    message::Message,
    policy::{SignTask, SigningConfig, SigningDecision},
    signature::{
        Canonicalization, CanonicalizationAlgorithm, SignatureAlgorithm, SignatureContext,
        SignatureError,
    },
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{verify_message, LookupTxt, VerificationOutcome, Verdict, VerifierError},
};
