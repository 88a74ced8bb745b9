//! Route pattern parsing and structural matching.
use std::collections::HashMap;

use super::RouteError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

/// A parsed route pattern such as `/users/:id/files/*path`.
///
/// * literal segments match exactly,
/// * `:name` matches one non-empty segment,
/// * a final `*` or `*name` matches the rest of the path, possibly empty.
///   The unnamed wildcard binds the key `"*"`.
///
/// Empty segments are ignored on both sides, so trailing slashes do not matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let raw: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        let mut names: Vec<&str> = Vec::new();

        for (index, segment) in raw.iter().enumerate() {
            if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() {
                    return Err(invalid("parameter name is empty"));
                }
                if names.contains(&name) {
                    return Err(invalid(&format!("duplicate parameter '{name}'")));
                }
                names.push(name);
                segments.push(Segment::Param(name.to_string()));
            } else if let Some(name) = segment.strip_prefix('*') {
                if index + 1 != raw.len() {
                    return Err(invalid("wildcard must be the last segment"));
                }
                let name = if name.is_empty() { "*" } else { name };
                if names.contains(&name) {
                    return Err(invalid(&format!("duplicate parameter '{name}'")));
                }
                segments.push(Segment::Wildcard(name.to_string()));
            } else {
                segments.push(Segment::Literal(decode(segment)));
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) | Segment::Wildcard(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// True when two patterns accept exactly the same paths with the same bindings.
    pub fn same_shape(&self, other: &RoutePattern) -> bool {
        self.segments == other.segments
    }

    /// Match `path` and return the bound parameters. Path segments are
    /// percent-decoded before they are compared or bound.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(index).map(|part| decode(part)).as_ref() != Some(literal) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(index)?;
                    params.insert(name.clone(), decode(value));
                }
                Segment::Wildcard(name) => {
                    let rest = parts.get(index..).unwrap_or_default().join("/");
                    params.insert(name.clone(), decode(&rest));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Normalized mount prefix (`/api/`, `api` -> `/api`).
pub(crate) fn normalize_prefix(prefix: &str) -> Result<String, RouteError> {
    let parts: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
    if parts
        .iter()
        .any(|part| part.starts_with(':') || part.starts_with('*'))
    {
        return Err(RouteError::InvalidMount {
            prefix: prefix.to_string(),
            reason: "prefix must be literal".to_string(),
        });
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Remainder of `path` under `prefix`, rooted at `/`, or `None` when the prefix
/// does not cover the path at a segment boundary.
pub(crate) fn strip_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix == "/" {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_literal_and_params() {
        let pattern = RoutePattern::parse("/users/:id/posts/:post").unwrap();
        assert_eq!(
            pattern.matches("/users/42/posts/7"),
            Some(params(&[("id", "42"), ("post", "7")]))
        );
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["id", "post"]);
        assert!(pattern.matches("/users/42/posts").is_none());
        assert!(pattern.matches("/users/42/posts/7/extra").is_none());
        assert!(pattern.matches("/accounts/42/posts/7").is_none());
    }

    #[test]
    fn test_literals_match_percent_encoded_paths() {
        let pattern = RoutePattern::parse("/café/:name").unwrap();
        assert_eq!(
            pattern.matches("/caf%C3%A9/a%20b"),
            Some(params(&[("name", "a b")]))
        );
        assert!(pattern.matches("/cafe/x").is_none());

        let encoded = RoutePattern::parse("/caf%C3%A9").unwrap();
        assert!(encoded.same_shape(&RoutePattern::parse("/café").unwrap()));
        assert!(RoutePattern::parse("/a%20b").unwrap().matches("/a%20b").is_some());
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        let pattern = RoutePattern::parse("/users/").unwrap();
        assert!(pattern.matches("/users").is_some());
        assert!(pattern.matches("/users/").is_some());
        let root = RoutePattern::parse("/").unwrap();
        assert!(root.matches("/").is_some());
        assert!(root.matches("/x").is_none());
    }

    #[test]
    fn test_wildcards() {
        let named = RoutePattern::parse("/files/*path").unwrap();
        assert_eq!(
            named.matches("/files/a/b/c.txt"),
            Some(params(&[("path", "a/b/c.txt")]))
        );
        assert_eq!(named.matches("/files"), Some(params(&[("path", "")])));

        let unnamed = RoutePattern::parse("/static/*").unwrap();
        assert_eq!(unnamed.matches("/static/x"), Some(params(&[("*", "x")])));
    }

    #[test]
    fn test_params_are_percent_decoded() {
        let pattern = RoutePattern::parse("/tags/:tag").unwrap();
        assert_eq!(
            pattern.matches("/tags/rust%20lang"),
            Some(params(&[("tag", "rust lang")]))
        );
    }

    #[test]
    fn test_invalid_patterns() {
        for bad in ["users", "/a/:", "/a/:id/:id", "/a/*rest/b", "/:x/*x"] {
            assert!(
                matches!(RoutePattern::parse(bad), Err(RouteError::InvalidPattern { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_same_shape_ignores_trailing_slash() {
        let a = RoutePattern::parse("/users/:id").unwrap();
        let b = RoutePattern::parse("/users/:id/").unwrap();
        let c = RoutePattern::parse("/users/:name").unwrap();
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }

    #[test]
    fn test_prefix_helpers() {
        assert_eq!(normalize_prefix("api/v1/").unwrap(), "/api/v1");
        assert_eq!(normalize_prefix("/").unwrap(), "/");
        assert!(normalize_prefix("/api/:v").is_err());

        assert_eq!(strip_prefix("/api", "/api/users"), Some("/users"));
        assert_eq!(strip_prefix("/api", "/api"), Some("/"));
        assert_eq!(strip_prefix("/api", "/apiv2/users"), None);
        assert_eq!(strip_prefix("/", "/users"), Some("/users"));
    }
}
