//! Credential extraction from the `Authorization` header.

use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;

static DIGEST_USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"username="([^"]*)""#).expect("digest username regex"));

pub(crate) fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Decode `Authorization: Basic <base64(user:pass)>`.
pub(crate) fn basic_credentials(headers: &[(String, String)]) -> Option<(String, String)> {
    let value = header_value(headers, "authorization")?;
    let encoded = strip_prefix_ci(value, "basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Pull the `username` field out of `Authorization: Digest ...` without
/// validating the digest itself.
pub(crate) fn digest_username(headers: &[(String, String)]) -> Option<String> {
    let value = header_value(headers, "authorization")?;
    let fields = strip_prefix_ci(value, "digest ")?;
    DIGEST_USERNAME_RE
        .captures(fields)
        .map(|caps| caps[1].to_string())
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
