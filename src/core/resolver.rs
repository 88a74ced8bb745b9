//! Canonical URL derivation for both native request shapes.
//!
//! Socket-style requests carry a raw path (`/a/b?c=d`) plus connection facts,
//! Request-object style requests carry a full href. Both resolve to a
//! [`url::Url`]; resolution never fails; at worst it produces a syntactically
//! valid URL that points nowhere useful.
//!
//! Scheme precedence is header first: a `x-forwarded-proto` value is used as
//! given even when the transport itself is encrypted. Transport encryption only
//! decides when the header is absent.
use http::{HeaderMap, header};
use once_cell::sync::Lazy;
use url::{Position, Url};

/// Host placeholder used when a request carries no `host` header.
pub const UNDEFINED_HOST: &str = "undefined";

static FALLBACK_URL: Lazy<Url> =
    Lazy::new(|| Url::parse("http://undefined/").expect("valid fallback URL"));

/// Native request facts needed to derive a URL.
#[derive(Debug, Clone, Copy)]
pub enum UrlSource<'a> {
    /// Callback-style server: raw path from the request line plus connection state.
    Socket {
        headers: &'a HeaderMap,
        path: &'a str,
        encrypted: bool,
    },
    /// Request-object runtime: the message's declared href.
    Href { headers: &'a HeaderMap, href: &'a str },
}

/// First scheme token declared by `x-forwarded-proto`, lowercased.
///
/// Repeated headers use the first occurrence; a comma separated value uses its
/// first token.
pub fn forwarded_proto(headers: &HeaderMap) -> Option<String> {
    let value = headers.get_all("x-forwarded-proto").iter().next()?;
    let token = value.to_str().ok()?.split(',').next()?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_ascii_lowercase())
    }
}

fn transport_scheme(encrypted: bool) -> &'static str {
    if encrypted { "https" } else { "http" }
}

fn host_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|host| !host.is_empty())
}

/// Resolve the canonical URL of a request.
pub fn resolve(source: &UrlSource<'_>) -> Url {
    match *source {
        UrlSource::Socket {
            headers,
            path,
            encrypted,
        } => {
            let scheme = forwarded_proto(headers)
                .unwrap_or_else(|| transport_scheme(encrypted).to_string());
            let host = host_header(headers).unwrap_or(UNDEFINED_HOST);
            build(&scheme, host, path)
        }
        UrlSource::Href { headers, href } => match Url::parse(href) {
            Ok(parsed) => {
                let scheme = forwarded_proto(headers)
                    .unwrap_or_else(|| parsed.scheme().to_ascii_lowercase());
                let authority = &parsed[Position::BeforeHost..Position::AfterPort];
                let host = host_header(headers)
                    .or_else(|| Some(authority).filter(|authority| !authority.is_empty()))
                    .unwrap_or(UNDEFINED_HOST);
                let path = &parsed[Position::BeforePath..Position::AfterQuery];
                build(&scheme, host, path)
            }
            // Relative hrefs behave like a socket request on an unencrypted transport.
            Err(_) => {
                let scheme = forwarded_proto(headers).unwrap_or_else(|| "http".to_string());
                let host = host_header(headers).unwrap_or(UNDEFINED_HOST);
                build(&scheme, host, href)
            }
        },
    }
}

fn build(scheme: &str, host: &str, path: &str) -> Url {
    Url::parse(&format!("{scheme}://{host}{path}"))
        .or_else(|_| Url::parse(&format!("http://{host}{path}")))
        .unwrap_or_else(|err| {
            tracing::debug!(%host, %path, error = %err, "URL fallback exhausted");
            FALLBACK_URL.clone()
        })
}
