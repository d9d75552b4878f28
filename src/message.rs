//! A thin parsed-message shim: header/body split and a raw header table.
//!
//! The verifier only needs the byte extent of the body, the raw header
//! block, and case-insensitive access to header occurrences; full RFC 5322
//! message parsing stays outside this crate.

use bstr::ByteSlice;

/// A message split into its raw header block and body.
pub struct Message<'a> {
    raw: &'a [u8],
    headers_end: usize,
    headers: Vec<HeaderSpan>,
}

/// Byte extents of one header field within the raw message.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HeaderSpan {
    start: usize,
    name_end: usize,
    value_start: usize,
    value_end: usize,
    end: usize,
}

impl<'a> Message<'a> {
    /// Splits a raw message into headers and body.
    ///
    /// The header block ends at the first blank-line marker; besides
    /// CRLF CRLF, the malformed variants LF LF, CR CR and a line break
    /// followed by a stray CR or LF are accepted. A message without such a
    /// marker has an empty body.
    pub fn parse(raw: &'a [u8]) -> Self {
        let headers_end = find_headers_end(raw).unwrap_or(raw.len());
        let headers = parse_headers(raw, headers_end);

        Self {
            raw,
            headers_end,
            headers,
        }
    }

    /// The message body, beginning after the header-terminating blank line.
    pub fn body(&self) -> &'a [u8] {
        &self.raw[self.headers_end..]
    }

    /// The raw header block, folding included.
    pub fn raw_headers(&self) -> &'a [u8] {
        &self.raw[..self.headers_end]
    }

    /// Raw values of all occurrences of the named header, in message order.
    pub fn header_values(&self, name: &str) -> Vec<&'a [u8]> {
        self.header_occurrences(name)
            .into_iter()
            .map(|span| self.value_bytes(span))
            .collect()
    }

    pub(crate) fn header_occurrences(&self, name: &str) -> Vec<HeaderSpan> {
        self.headers
            .iter()
            .copied()
            .filter(|&span| {
                let field = self.raw[span.start..span.name_end]
                    .trim_end_with(|c| c == ' ' || c == '\t');
                field.eq_ignore_ascii_case(name.as_bytes())
            })
            .collect()
    }

    /// The raw bytes of a header, name through terminating line break.
    pub(crate) fn raw_span(&self, span: HeaderSpan) -> &'a [u8] {
        &self.raw[span.start..span.end]
    }

    pub(crate) fn name_bytes(&self, span: HeaderSpan) -> &'a [u8] {
        &self.raw[span.start..span.name_end]
    }

    pub(crate) fn value_bytes(&self, span: HeaderSpan) -> &'a [u8] {
        &self.raw[span.value_start..span.value_end]
    }
}

fn find_headers_end(raw: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < raw.len() {
        let rest = &raw[i..];

        if rest.starts_with(b"\r\n\r\n") {
            return Some(i + 4);
        }
        if rest.starts_with(b"\n\n") || rest.starts_with(b"\r\r") {
            return Some(i + 2);
        }
        // a stray CR after a bare LF also ends the headers; the LF of a
        // proper CRLF does not
        if rest.starts_with(b"\n\r") && (i == 0 || raw[i - 1] != b'\r') {
            return Some(i + 2);
        }

        i += 1;
    }

    None
}

fn parse_headers(raw: &[u8], headers_end: usize) -> Vec<HeaderSpan> {
    let region = &raw[..headers_end];
    let mut headers: Vec<HeaderSpan> = Vec::new();

    let mut i = 0;
    while i < region.len() {
        let line_end = region[i..].iter().position(|&b| b == b'\n').map(|p| i + p);
        let (content_end, next) = match line_end {
            Some(e) => {
                let c = if e > i && region[e - 1] == b'\r' { e - 1 } else { e };
                (c, e + 1)
            }
            None => (region.len(), region.len()),
        };

        let line = &region[i..content_end];

        if matches!(line.first(), Some(b' ') | Some(b'\t')) {
            // folded continuation line
            if let Some(last) = headers.last_mut() {
                last.value_end = content_end;
                last.end = next;
            }
        } else if let Some(colon) = line.iter().position(|&b| b == b':') {
            headers.push(HeaderSpan {
                start: i,
                name_end: i + colon,
                value_start: i + colon + 1,
                value_end: content_end,
                end: next,
            });
        }
        // lines without a colon do not form a header field

        i = next;
    }

    headers
}
