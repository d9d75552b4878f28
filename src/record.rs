//! DKIM public key records published as DNS TXT records.
//!
//! See RFC 6376, section 3.6.1.

use crate::key::KeyError;

/// Extracts the Base64 key material following `p=` from a TXT record.
///
/// All other tags (`v=`, `k=`, `t=`, …) are ignored for verification. An
/// empty value means the key has been revoked; a record without a `p=` tag
/// is unusable. Multiple character strings of one TXT record must be
/// concatenated by the caller beforehand.
pub fn extract_key_data(txt: &str) -> Result<&str, KeyError> {
    let bytes = txt.as_bytes();

    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'p' && bytes[i + 1] == b'=' {
            let start = i + 2;
            let end = bytes[start..]
                .iter()
                .position(|&b| b == b';')
                .map_or(bytes.len(), |p| start + p);

            let value = &txt[start..end];
            if value.is_empty() {
                return Err(KeyError::Revoked);
            }
            return Ok(value);
        }
        i += 1;
    }

    Err(KeyError::Fail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_key_data_ok() {
        assert_eq!(extract_key_data("v=DKIM1; k=rsa; p=YWJj"), Ok("YWJj"));
        assert_eq!(extract_key_data("p=YWJj; t=y; n=note"), Ok("YWJj"));
        assert_eq!(extract_key_data("p=YWJj"), Ok("YWJj"));
    }

    #[test]
    fn extract_key_data_revoked() {
        assert_eq!(extract_key_data("v=DKIM1; p="), Err(KeyError::Revoked));
        assert_eq!(extract_key_data("v=DKIM1; p=; t=y"), Err(KeyError::Revoked));
    }

    #[test]
    fn extract_key_data_missing() {
        assert_eq!(extract_key_data("v=DKIM1; k=rsa"), Err(KeyError::Fail));
        assert_eq!(extract_key_data(""), Err(KeyError::Fail));
    }
}
