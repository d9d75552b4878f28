//! Tag-list scanning for `DKIM-Signature` header values.
//!
//! See RFC 6376, section 3.2.

use crate::signature::SignatureError;

/// The recognised tags of a `DKIM-Signature` header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Tag {
    Version,
    Algorithm,
    Signature,
    BodyHash,
    Canonicalization,
    Domain,
    HeaderList,
    Identity,
    BodyLength,
    QueryMethods,
    Selector,
    Timestamp,
    Expiration,
    CopiedHeaders,
}

impl Tag {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "v" => Some(Self::Version),
            "a" => Some(Self::Algorithm),
            "b" => Some(Self::Signature),
            "bh" => Some(Self::BodyHash),
            "c" => Some(Self::Canonicalization),
            "d" => Some(Self::Domain),
            "h" => Some(Self::HeaderList),
            "i" => Some(Self::Identity),
            "l" => Some(Self::BodyLength),
            "q" => Some(Self::QueryMethods),
            "s" => Some(Self::Selector),
            "t" => Some(Self::Timestamp),
            "x" => Some(Self::Expiration),
            "z" => Some(Self::CopiedHeaders),
            _ => None,
        }
    }
}

// Whitespace skipping is a transient state that returns to a preset
// follow-up state once a non-whitespace byte (or the end) is reached.
#[derive(Clone, Copy)]
enum State {
    Tag,
    AfterTag,
    Value,
    SkipWs,
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Scans a tag-list into `(tag, value)` pairs, values in their raw form.
///
/// Tag order is free and a trailing `;` is permitted. Unknown tag names
/// reject the whole list.
pub(crate) fn parse_tag_list(input: &str) -> Result<Vec<(Tag, &str)>, SignatureError> {
    let bytes = input.as_bytes();
    let mut tags = Vec::new();

    let mut state = State::SkipWs;
    let mut next_state = State::Tag;
    let mut mark = 0;
    let mut name = "";
    let mut tag = None;

    let mut i = 0;
    while i <= bytes.len() {
        let b = bytes.get(i).copied();

        match state {
            State::SkipWs => {
                if matches!(b, Some(c) if is_ws(c)) {
                    i += 1;
                } else {
                    mark = i;
                    state = next_state;
                }
            }
            State::Tag => match b {
                Some(c) if c == b'=' || is_ws(c) => {
                    name = &input[mark..i];
                    while matches!(bytes.get(i), Some(c) if is_ws(*c)) {
                        i += 1;
                    }
                    if bytes.get(i) != Some(&b'=') {
                        return Err(SignatureError::Syntax);
                    }
                    i += 1;
                    state = State::AfterTag;
                }
                Some(_) => i += 1,
                None => {
                    if i > mark {
                        // dangling tag name without a value
                        return Err(SignatureError::Syntax);
                    }
                    break;
                }
            },
            State::AfterTag => {
                if name.is_empty() {
                    return Err(SignatureError::Syntax);
                }
                tag = Some(Tag::from_name(name).ok_or(SignatureError::UnknownTag)?);
                state = State::SkipWs;
                next_state = State::Value;
            }
            State::Value => match b {
                Some(b';') | None => {
                    let value = input[mark..i].trim_end_matches(|c: char| c.is_ascii_whitespace());
                    let Some(tag) = tag.take() else {
                        return Err(SignatureError::Syntax);
                    };
                    tags.push((tag, value));

                    if b.is_some() {
                        i += 1;
                        state = State::SkipWs;
                        next_state = State::Tag;
                    } else {
                        break;
                    }
                }
                Some(_) => i += 1,
            },
        }
    }

    Ok(tags)
}
