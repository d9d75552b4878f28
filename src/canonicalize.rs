//! Canonicalization of message bodies and header fields.
//!
//! See RFC 6376, section 3.4.

use crate::{
    crypto::DigestState,
    message::Message,
    signature::{CanonicalizationAlgorithm, DKIM_SIGNATURE_NAME},
};
use bstr::ByteSlice;
use std::collections::HashMap;

const CRLF: &[u8] = b"\r\n";

// Relaxed body output is flushed to the digest in chunks of this size.
const BODY_CHUNK: usize = 4096;

/// Canonicalizes the message body and feeds it into the digest state.
///
/// Trailing empty lines are removed first; an empty body hashes as a single
/// CRLF. A body not ending in CRLF has one appended.
pub fn hash_body(state: &mut DigestState, canon: CanonicalizationAlgorithm, body: &[u8]) {
    let body = trim_trailing_empty_lines(body);

    if body.is_empty() || body == CRLF {
        state.update(CRLF);
        return;
    }

    match canon {
        CanonicalizationAlgorithm::Simple => state.update(body),
        CanonicalizationAlgorithm::Relaxed => {
            relaxed_body_chunks(body, |chunk| state.update(chunk));
        }
    }

    if !body.ends_with(CRLF) {
        state.update(CRLF);
    }
}

// Collapse all trailing CRLF sequences to exactly one.
fn trim_trailing_empty_lines(body: &[u8]) -> &[u8] {
    let mut len = body.len();
    while len >= 3 && body[..len].ends_with(CRLF) && body[len - 3] == b'\n' {
        len -= 2;
    }
    &body[..len]
}

// Streams the body with runs of horizontal whitespace collapsed to a single
// space and whitespace before a line break dropped.
fn relaxed_body_chunks(body: &[u8], mut emit: impl FnMut(&[u8])) {
    let mut buf = Vec::with_capacity(BODY_CHUNK);
    let mut got_sp = false;

    for &b in body {
        match b {
            b'\r' | b'\n' => {
                if got_sp {
                    buf.pop();
                    got_sp = false;
                }
                buf.push(b);
            }
            b' ' | b'\t' => {
                if !got_sp {
                    buf.push(b' ');
                    got_sp = true;
                }
            }
            _ => {
                got_sp = false;
                buf.push(b);
            }
        }

        // a pending space stays buffered, it may yet be dropped
        if buf.len() >= BODY_CHUNK && !got_sp {
            emit(&buf);
            buf.clear();
        }
    }

    if !buf.is_empty() {
        emit(&buf);
    }
}

/// Canonicalizes header fields of a message, one signed header at a time.
///
/// Header names listed several times consume occurrences bottom-up
/// (RFC 6376, section 5.4.2).
pub struct HeaderCanonicalizer<'a> {
    message: &'a Message<'a>,
    canon: CanonicalizationAlgorithm,
    consumed: HashMap<String, usize>,
}

impl<'a> HeaderCanonicalizer<'a> {
    pub fn new(message: &'a Message<'a>, canon: CanonicalizationAlgorithm) -> Self {
        Self {
            message,
            canon,
            consumed: HashMap::new(),
        }
    }

    /// Feeds the next unused occurrence of the named header into the digest
    /// state. Returns false when no occurrence is left; such headers
    /// contribute nothing.
    pub fn feed(&mut self, state: &mut DigestState, name: &str) -> bool {
        let occurrences = self.message.header_occurrences(name);

        let used = self.consumed.entry(name.to_ascii_lowercase()).or_insert(0);
        if *used >= occurrences.len() {
            return false;
        }
        let span = occurrences[occurrences.len() - 1 - *used];
        *used += 1;

        match self.canon {
            CanonicalizationAlgorithm::Simple => {
                state.update(self.message.raw_span(span));
            }
            CanonicalizationAlgorithm::Relaxed => {
                let line = relaxed_line(
                    self.message.name_bytes(span),
                    self.message.value_bytes(span),
                );
                state.update(&line);
            }
        }

        true
    }

    /// Canonicalizes the `DKIM-Signature` header under verification itself,
    /// with the value of its b= tag elided and the trailing line break
    /// stripped. `raw_value` selects the occurrence when a message carries
    /// several signatures. Returns false if the header cannot be located.
    pub fn feed_signature(&mut self, state: &mut DigestState, raw_value: &[u8]) -> bool {
        let span = self
            .message
            .header_occurrences(DKIM_SIGNATURE_NAME)
            .into_iter()
            .find(|&s| self.message.value_bytes(s) == raw_value);

        let Some(span) = span else {
            return false;
        };

        let line = match self.canon {
            CanonicalizationAlgorithm::Simple => self.message.raw_span(span).to_vec(),
            CanonicalizationAlgorithm::Relaxed => relaxed_line(
                self.message.name_bytes(span),
                self.message.value_bytes(span),
            ),
        };

        state.update(&strip_signature_value(&line));

        true
    }
}

/// Produces the relaxed canonical form of one header field:
/// lowercased name, `:`, whitespace-collapsed value, CRLF.
pub fn relaxed_line(name: &[u8], value: &[u8]) -> Vec<u8> {
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    let mut out = Vec::with_capacity(name.len() + value.len() + 3);

    for &b in name.trim_with(is_space) {
        out.push(b.to_ascii_lowercase());
    }
    out.push(b':');

    let mut compressing = false;
    for &b in value.trim_with(is_space) {
        if is_space(b.into()) {
            if !compressing {
                out.push(b' ');
                compressing = true;
            }
        } else {
            out.push(b);
            compressing = false;
        }
    }
    out.extend_from_slice(CRLF);

    out
}

/// Removes the value of the b= tag from a canonicalized `DKIM-Signature`
/// header, leaving the `b=` marker in place, and strips the trailing line
/// break. Whitespace around the `=` of a folded `b =` tag is tolerated.
pub fn strip_signature_value(header: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header.len());
    let mut elided = false;

    for (i, segment) in header.split(|&b| b == b';').enumerate() {
        if i > 0 {
            out.push(b';');
        }

        if !elided {
            if let Some(eq) = segment.iter().position(|&b| b == b'=') {
                let name = segment[..eq]
                    .rsplit(|&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b':'))
                    .find(|s| !s.is_empty());
                if name == Some(&b"b"[..]) {
                    out.extend_from_slice(&segment[..=eq]);
                    elided = true;
                    continue;
                }
            }
        }

        out.extend_from_slice(segment);
    }

    while matches!(out.last(), Some(b'\r') | Some(b'\n')) {
        out.pop();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HashAlgorithm;
    use bstr::BStr;

    fn canonical_body(canon: CanonicalizationAlgorithm, body: &[u8]) -> Vec<u8> {
        let body = trim_trailing_empty_lines(body);

        if body.is_empty() || body == CRLF {
            return CRLF.to_vec();
        }

        let mut out = Vec::new();
        match canon {
            CanonicalizationAlgorithm::Simple => out.extend_from_slice(body),
            CanonicalizationAlgorithm::Relaxed => {
                relaxed_body_chunks(body, |chunk| out.extend_from_slice(chunk));
            }
        }
        if !body.ends_with(CRLF) {
            out.extend_from_slice(CRLF);
        }
        out
    }

    #[test]
    fn body_canon_simple_ok() {
        let body = canonical_body(
            CanonicalizationAlgorithm::Simple,
            b"well  hello \r\n\r\n what agi \r\n\r\n\r\n",
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well  hello \r\n\r\n what agi \r\n"));
    }

    #[test]
    fn body_canon_relaxed_ok() {
        let body = canonical_body(
            CanonicalizationAlgorithm::Relaxed,
            b"well  hello \r\n\r\n what agi \r\n\r\n\r\n",
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well hello\r\n\r\n what agi\r\n"));
    }

    #[test]
    fn body_canon_empty_variants() {
        for body in [&b""[..], b"\r\n", b"\r\n\r\n", b"\r\n\r\n\r\n"] {
            assert_eq!(canonical_body(CanonicalizationAlgorithm::Simple, body), b"\r\n");
            assert_eq!(canonical_body(CanonicalizationAlgorithm::Relaxed, body), b"\r\n");
        }
    }

    #[test]
    fn body_canon_appends_final_crlf() {
        assert_eq!(
            canonical_body(CanonicalizationAlgorithm::Simple, b"abc"),
            b"abc\r\n"
        );
        assert_eq!(
            canonical_body(CanonicalizationAlgorithm::Relaxed, b"abc\tdef"),
            b"abc def\r\n"
        );
    }

    #[test]
    fn body_canon_simple_ignores_trailing_lines_only() {
        // bodies differing only in trailing empty lines canonicalize alike
        let a = canonical_body(CanonicalizationAlgorithm::Simple, b"a\r\nb\r\n");
        let b = canonical_body(CanonicalizationAlgorithm::Simple, b"a\r\nb\r\n\r\n\r\n");

        assert_eq!(a, b);
    }

    #[test]
    fn body_canon_relaxed_idempotent() {
        let bodies: [&[u8]; 4] = [
            b"well  hello \r\n\r\n what agi \r\n\r\n\r\n",
            b"a \t b\r\nc\r\n",
            b"no newline at all",
            b"trailing space \r\n",
        ];

        for body in bodies {
            let once = canonical_body(CanonicalizationAlgorithm::Relaxed, body);
            let twice = canonical_body(CanonicalizationAlgorithm::Relaxed, &once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn body_canon_relaxed_chunk_boundaries() {
        // whitespace runs crossing the flush boundary still collapse
        let mut body = vec![b'x'; BODY_CHUNK - 1];
        body.extend_from_slice(b"  \r\ny\r\n");

        let out = canonical_body(CanonicalizationAlgorithm::Relaxed, &body);

        let mut expected = vec![b'x'; BODY_CHUNK - 1];
        expected.extend_from_slice(b"\r\ny\r\n");
        assert_eq!(out, expected);
    }

    #[test]
    fn header_canon_relaxed_bottom_up() {
        let raw = b"from: Good \t \r\nto: see   me\r\nDate: Fri 24\r\n\tfoo\r\nTo: another one\r\n\r\n";
        let message = Message::parse(raw);

        let mut canonicalizer =
            HeaderCanonicalizer::new(&message, CanonicalizationAlgorithm::Relaxed);
        let mut state = DigestState::new(HashAlgorithm::Sha256);

        assert!(canonicalizer.feed(&mut state, "to"));
        assert!(canonicalizer.feed(&mut state, "from"));
        assert!(canonicalizer.feed(&mut state, "To"));
        assert!(!canonicalizer.feed(&mut state, "to"));
        assert!(!canonicalizer.feed(&mut state, "subject"));

        let mut expected = DigestState::new(HashAlgorithm::Sha256);
        expected.update(b"to:another one\r\nfrom:Good\r\nto:see me\r\n");

        assert_eq!(state.finalize(), expected.finalize());
    }

    #[test]
    fn header_canon_simple_uses_raw_bytes() {
        let raw = b"A: one\r\nSubject: Hello\r\nA: two\r\n\r\n";
        let message = Message::parse(raw);

        let mut canonicalizer =
            HeaderCanonicalizer::new(&message, CanonicalizationAlgorithm::Simple);
        let mut state = DigestState::new(HashAlgorithm::Sha256);

        assert!(canonicalizer.feed(&mut state, "a"));
        assert!(canonicalizer.feed(&mut state, "a"));
        assert!(!canonicalizer.feed(&mut state, "a"));

        let mut expected = DigestState::new(HashAlgorithm::Sha256);
        expected.update(b"A: two\r\nA: one\r\n");

        assert_eq!(state.finalize(), expected.finalize());
    }

    #[test]
    fn relaxed_line_collapses_whitespace() {
        let line = relaxed_line(b"  Subject ", b"  hello\t world\r\n");

        assert_eq!(BStr::new(&line), BStr::new(b"subject:hello world\r\n"));
    }

    #[test]
    fn relaxed_line_unfolds() {
        let line = relaxed_line(b"Date", b" Fri 24\r\n\tJune");

        assert_eq!(BStr::new(&line), BStr::new(b"date:Fri 24 June\r\n"));
    }

    #[test]
    fn strip_signature_value_basic() {
        assert_eq!(
            strip_signature_value(b"dkim-signature:a=1; b=2; c=3"),
            b"dkim-signature:a=1; b=; c=3"
        );
        assert_eq!(
            strip_signature_value(b"dkim-signature:a=1; b=2;"),
            b"dkim-signature:a=1; b=;"
        );
        assert_eq!(
            strip_signature_value(b"dkim-signature:a=1; b=2"),
            b"dkim-signature:a=1; b="
        );
        assert_eq!(
            strip_signature_value(b"dkim-signature:b=abc; a=1"),
            b"dkim-signature:b=; a=1"
        );
    }

    #[test]
    fn strip_signature_value_whitespace_around_equals() {
        assert_eq!(
            strip_signature_value(b"dkim-signature:a=1;\r\n b =2; c=3"),
            b"dkim-signature:a=1;\r\n b =; c=3"
        );
    }

    #[test]
    fn strip_signature_value_ignores_bh() {
        assert_eq!(
            strip_signature_value(b"dkim-signature:bh=xyz; b=abc"),
            b"dkim-signature:bh=xyz; b="
        );
    }

    #[test]
    fn strip_signature_value_drops_trailing_break() {
        assert_eq!(
            strip_signature_value(b"dkim-signature:a=1; b=abc\r\n"),
            b"dkim-signature:a=1; b="
        );
        assert_eq!(
            strip_signature_value(b"dkim-signature:a=1; c=3\r\n"),
            b"dkim-signature:a=1; c=3"
        );
    }

    #[test]
    fn signature_digest_ignores_b_value() {
        // mutating only bytes inside the b= value leaves the bytes fed to
        // the headers digest unchanged
        let original = b"dkim-signature:v=1; d=example.com; b=AAAA; s=sel\r\n";
        let mutated = b"dkim-signature:v=1; d=example.com; b=BBBB; s=sel\r\n";

        assert_eq!(
            strip_signature_value(original),
            strip_signature_value(mutated)
        );

        let mut state = DigestState::new(HashAlgorithm::Sha256);
        state.update(&strip_signature_value(original));
        let d1 = state.finalize();

        let mut state = DigestState::new(HashAlgorithm::Sha256);
        state.update(&strip_signature_value(mutated));
        let d2 = state.finalize();

        assert_eq!(d1, d2);
    }
}
