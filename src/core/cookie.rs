//! Cookie header parsing and `Set-Cookie` serialization.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while serializing a cookie
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CookieError {
    #[error("invalid cookie name '{0}'")]
    InvalidName(String),

    #[error("invalid cookie {attribute} '{value}'")]
    InvalidAttribute {
        attribute: &'static str,
        value: String,
    },
}

/// `SameSite` cookie attribute
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes attached to every serialized cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    /// Lifetime in seconds; `Some(0)` expires the cookie immediately
    pub max_age: Option<u64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: Some("/".to_string()),
            domain: None,
            max_age: None,
            http_only: true,
            secure: false,
            same_site: Some(SameSite::Lax),
        }
    }
}

/// Parse a `Cookie` request header (`a=1; b=2`) into a map.
///
/// Values are percent-decoded when possible and surrounding quotes are removed.
/// The first occurrence of a name wins; malformed pairs are skipped.
pub fn parse(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || cookies.contains_key(name) {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        let value = urlencoding::decode(value)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| value.to_string());
        cookies.insert(name.to_string(), value);
    }
    cookies
}

/// Serialize a cookie into a `Set-Cookie` header value.
///
/// The value is percent-encoded; the name must be an HTTP token.
pub fn serialize(name: &str, value: &str, options: &CookieOptions) -> Result<String, CookieError> {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(CookieError::InvalidName(name.to_string()));
    }

    let mut cookie = format!("{}={}", name, urlencoding::encode(value));

    if let Some(max_age) = options.max_age {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    if let Some(domain) = &options.domain {
        check_attribute("domain", domain)?;
        cookie.push_str(&format!("; Domain={domain}"));
    }
    if let Some(path) = &options.path {
        check_attribute("path", path)?;
        cookie.push_str(&format!("; Path={path}"));
    }
    if options.http_only {
        cookie.push_str("; HttpOnly");
    }
    if options.secure {
        cookie.push_str("; Secure");
    }
    if let Some(same_site) = options.same_site {
        cookie.push_str("; SameSite=");
        cookie.push_str(same_site.as_str());
    }

    Ok(cookie)
}

fn check_attribute(attribute: &'static str, value: &str) -> Result<(), CookieError> {
    if value.is_empty() || value.chars().any(|c| c == ';' || c.is_control()) {
        return Err(CookieError::InvalidAttribute {
            attribute,
            value: value.to_string(),
        });
    }
    Ok(())
}

// RFC 7230 tchar
fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}
