//! Request body decoding by content type.
//!
//! | Media type | Result |
//! |---|---|
//! | `application/json`, `*/*+json` | [`DecodedBody::Json`] |
//! | `application/x-www-form-urlencoded` | [`DecodedBody::Form`] |
//! | `multipart/form-data; boundary=...` | [`DecodedBody::Multipart`] |
//! | anything else | [`DecodedBody::Empty`] |
//!
//! Unknown content types are not an error; malformed bodies of a known type are.
use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Errors produced while decoding a body of a recognised content type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("malformed JSON body: {0}")]
    Json(String),

    #[error("malformed form body: {0}")]
    Form(String),

    #[error("malformed multipart body: {0}")]
    Multipart(String),
}

/// An uploaded file part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Parsed `multipart/form-data` body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, FilePart>,
}

/// A decoded request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DecodedBody {
    /// No body, or a content type without a decoder.
    #[default]
    Empty,
    Json(Value),
    Form(HashMap<String, String>),
    Multipart(MultipartForm),
}

impl DecodedBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, DecodedBody::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            DecodedBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Look up a text field by name.
    ///
    /// JSON bodies answer with string members only.
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            DecodedBody::Empty => None,
            DecodedBody::Json(value) => value.get(name).and_then(Value::as_str),
            DecodedBody::Form(fields) => fields.get(name).map(String::as_str),
            DecodedBody::Multipart(form) => form.fields.get(name).map(String::as_str),
        }
    }

    pub fn file(&self, name: &str) -> Option<&FilePart> {
        match self {
            DecodedBody::Multipart(form) => form.files.get(name),
            _ => None,
        }
    }

    /// Render the body as a JSON mapping. Files are summarised, not inlined.
    pub fn to_value(&self) -> Value {
        match self {
            DecodedBody::Empty => Value::Object(Map::new()),
            DecodedBody::Json(value) => value.clone(),
            DecodedBody::Form(fields) => fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<_, _>>()
                .into(),
            DecodedBody::Multipart(form) => {
                let mut map: Map<String, Value> = form
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                for (name, file) in &form.files {
                    map.insert(
                        name.clone(),
                        json!({
                            "filename": file.filename,
                            "content_type": file.content_type,
                            "size": file.data.len(),
                        }),
                    );
                }
                Value::Object(map)
            }
        }
    }
}

/// Decode `raw` according to `content_type`.
pub fn decode(content_type: &str, raw: &[u8]) -> Result<DecodedBody, DecodeError> {
    let media_type = essence(content_type);

    if media_type == "application/json" || media_type.ends_with("+json") {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(DecodedBody::Empty);
        }
        return serde_json::from_slice(raw)
            .map(DecodedBody::Json)
            .map_err(|e| DecodeError::Json(e.to_string()));
    }

    if media_type == "application/x-www-form-urlencoded" {
        let fields = url::form_urlencoded::parse(raw).into_owned().collect();
        return Ok(DecodedBody::Form(fields));
    }

    if media_type == "multipart/form-data" {
        let boundary = boundary(content_type)?;
        return parse_multipart(raw, &boundary).map(DecodedBody::Multipart);
    }

    Ok(DecodedBody::Empty)
}

/// Media type without parameters, lowercased.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn boundary(content_type: &str) -> Result<String, DecodeError> {
    for param in content_type.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = unquote(value);
            if value.is_empty() {
                break;
            }
            return Ok(value.to_string());
        }
    }
    Err(DecodeError::Multipart("missing boundary".to_string()))
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_multipart(body: &[u8], boundary: &str) -> Result<MultipartForm, DecodeError> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut form = MultipartForm::default();

    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| DecodeError::Multipart("no opening boundary".to_string()))?;

    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            return Ok(form);
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(DecodeError::Multipart(
                "expected CRLF after boundary".to_string(),
            ));
        }
        pos += 2;

        let headers_end = find(body, b"\r\n\r\n", pos)
            .ok_or_else(|| DecodeError::Multipart("unterminated part headers".to_string()))?;
        let headers = std::str::from_utf8(&body[pos..headers_end])
            .map_err(|_| DecodeError::Multipart("part headers are not UTF-8".to_string()))?;
        let data_start = headers_end + 4;

        let next = find(body, &delimiter, data_start)
            .ok_or_else(|| DecodeError::Multipart("missing closing boundary".to_string()))?;
        let data_end = if next >= data_start + 2 && &body[next - 2..next] == b"\r\n" {
            next - 2
        } else {
            next
        };
        let data = &body[data_start..data_end];

        let mut disposition = None;
        let mut part_type = None;
        for line in headers.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-disposition") {
                disposition = Some(value.trim());
            } else if name.eq_ignore_ascii_case("content-type") {
                part_type = Some(value.trim().to_string());
            }
        }

        let disposition = disposition
            .ok_or_else(|| DecodeError::Multipart("part without Content-Disposition".to_string()))?;
        let (name, filename) = disposition_params(disposition);
        let name =
            name.ok_or_else(|| DecodeError::Multipart("part without a name".to_string()))?;

        match filename {
            Some(filename) => {
                form.files.insert(
                    name,
                    FilePart {
                        filename,
                        content_type: part_type,
                        data: Bytes::copy_from_slice(data),
                    },
                );
            }
            None => {
                form.fields
                    .insert(name, String::from_utf8_lossy(data).into_owned());
            }
        }

        pos = next;
    }
}

/// `name` and `filename` parameters of a `form-data` disposition.
fn disposition_params(value: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut filename = None;
    for param in value.split(';').skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("name") {
            name = Some(unquote(raw).to_string());
        } else if key.eq_ignore_ascii_case("filename") {
            filename = Some(unquote(raw).to_string());
        }
    }
    (name, filename)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_json_object() {
        let body = decode("application/json", br#"{"name":"test","value":123}"#).unwrap();
        assert_eq!(body, DecodedBody::Json(json!({"name": "test", "value": 123})));
        assert_eq!(body.field("name"), Some("test"));
    }

    #[test]
    fn test_decode_json_with_charset_and_suffix() {
        let body = decode("Application/JSON; charset=utf-8", b"[1,2]").unwrap();
        assert_eq!(body.as_json(), Some(&json!([1, 2])));

        let body = decode("application/problem+json", br#"{"title":"x"}"#).unwrap();
        assert_eq!(body.field("title"), Some("x"));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let result = decode("application/json", b"{\"name\":");
        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_empty_json_body_is_empty() {
        assert_eq!(decode("application/json", b"").unwrap(), DecodedBody::Empty);
    }

    #[test]
    fn test_decode_form() {
        let body = decode(
            "application/x-www-form-urlencoded",
            b"name=test&value=123",
        )
        .unwrap();
        let expected: HashMap<String, String> = [("name", "test"), ("value", "123")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(body, DecodedBody::Form(expected));
        assert_eq!(body.to_value(), json!({"name": "test", "value": "123"}));
    }

    #[test]
    fn test_decode_form_percent_and_plus() {
        let body = decode("application/x-www-form-urlencoded", b"q=a+b%26c&q=last").unwrap();
        assert_eq!(body.field("q"), Some("last"));
        let body = decode("application/x-www-form-urlencoded", b"q=a+b%26c").unwrap();
        assert_eq!(body.field("q"), Some("a b&c"));
    }

    #[test]
    fn test_unknown_content_type_is_empty() {
        assert_eq!(decode("text/plain", b"hello").unwrap(), DecodedBody::Empty);
        assert_eq!(decode("", b"hello").unwrap(), DecodedBody::Empty);
    }

    const MULTIPART: &[u8] = b"preamble\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
hello world\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a.bin\"\r\n\
Content-Type: application/octet-stream\r\n\
\r\n\
\x00\x01\xff\r\n\
--XyZ--\r\n";

    #[test]
    fn test_decode_multipart() {
        let body = decode("multipart/form-data; boundary=\"XyZ\"", MULTIPART).unwrap();
        assert_eq!(body.field("title"), Some("hello world"));

        let file = body.file("upload").unwrap();
        assert_eq!(file.filename, "a.bin");
        assert_eq!(file.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(file.data.as_ref(), &[0x00, 0x01, 0xff]);

        let value = body.to_value();
        assert_eq!(value["upload"]["size"], json!(3));
    }

    #[test]
    fn test_multipart_without_boundary_fails() {
        let result = decode("multipart/form-data", MULTIPART);
        assert!(matches!(result, Err(DecodeError::Multipart(_))));
    }

    #[test]
    fn test_multipart_truncated_fails() {
        let truncated = &MULTIPART[..MULTIPART.len() - 12];
        let result = decode("multipart/form-data; boundary=XyZ", truncated);
        assert!(matches!(result, Err(DecodeError::Multipart(_))));
    }
}
