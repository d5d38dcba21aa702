//! URI helpers shared by both pipelines.

use url::Url;

use super::errors::DomainError;

/// Replaces the password component of `uri` so it can be logged.
///
/// Strings that do not parse as URLs are returned unchanged, since they
/// cannot carry a recognizable password component.
pub fn redact(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("xxxxx")).is_err() {
                return "<redacted>".to_string();
            }
            url.to_string()
        }
        _ => uri.to_string(),
    }
}

/// Decodes a form-encoded object key: `+` becomes a space and `%XX` becomes
/// the corresponding byte. The decoded bytes must be valid UTF-8.
///
/// Bucket notifications encode object keys this way, so `a+b%2Fc.txt` names
/// the object `a b/c.txt`.
pub fn query_unescape(input: &str) -> Result<String, DomainError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex_value);
                let lo = bytes.get(i + 2).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => {
                        let end = (i + 3).min(bytes.len());
                        return Err(DomainError::InvalidKey(format!(
                            "invalid escape '{}' in '{input}'",
                            String::from_utf8_lossy(&bytes[i..end])
                        )));
                    }
                }
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out)
        .map_err(|_| DomainError::InvalidKey(format!("'{input}' does not decode to UTF-8")))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
