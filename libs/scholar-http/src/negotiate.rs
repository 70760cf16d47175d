//! Chooses a parser for a successful response body.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, ClientError};
use crate::options::ExpectedContentType;

pub const INVALID_JSON_MESSAGE: &str = "Invalid JSON response from server";

/// A parsed 2xx body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary(Bytes),
}

impl ResponseBody {
    /// Deserialize into `T`. Text and binary bodies are parsed as JSON.
    ///
    /// # Errors
    /// Returns [`ClientError::Serialization`] when the body does not match `T`.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let value = match self {
            ResponseBody::Json(value) => serde_json::from_value(value)?,
            ResponseBody::Text(text) => serde_json::from_str(&text)?,
            ResponseBody::Binary(bytes) => serde_json::from_slice(&bytes)?,
        };
        Ok(value)
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parser {
    Json,
    Text,
    Binary,
}

/// Parse a successful body according to `expected`, consulting the response
/// `Content-Type` only in [`ExpectedContentType::Auto`] mode.
///
/// # Errors
/// Returns [`ClientError::Api`] with the message
/// `"Invalid JSON response from server"` and code `invalid_json` when JSON
/// parsing was selected and the body is not valid JSON.
pub fn negotiate_body(
    status: StatusCode,
    headers: &HeaderMap,
    body: Bytes,
    expected: ExpectedContentType,
) -> Result<ResponseBody, ClientError> {
    let parser = match expected {
        ExpectedContentType::Json => Parser::Json,
        ExpectedContentType::Text => Parser::Text,
        ExpectedContentType::Blob => Parser::Binary,
        ExpectedContentType::Auto => detect(headers),
    };

    match parser {
        Parser::Json => {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(ResponseBody::Json(Value::Object(serde_json::Map::new())));
            }
            serde_json::from_slice(&body).map(ResponseBody::Json).map_err(|e| {
                tracing::warn!(status = status.as_u16(), error = %e, "response body is not valid JSON");
                ClientError::Api(ApiError::new(INVALID_JSON_MESSAGE, status).with_code("invalid_json"))
            })
        }
        Parser::Text => Ok(ResponseBody::Text(String::from_utf8_lossy(&body).into_owned())),
        Parser::Binary => Ok(ResponseBody::Binary(body)),
    }
}

fn detect(headers: &HeaderMap) -> Parser {
    let Some(raw) = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return Parser::Json;
    };
    if raw.to_ascii_lowercase().contains("json") {
        return Parser::Json;
    }
    let Ok(mime) = raw.parse::<mime::Mime>() else {
        return Parser::Json;
    };
    let top = mime.type_();
    if top == mime::TEXT {
        Parser::Text
    } else if top == mime::IMAGE
        || top == mime::AUDIO
        || top == mime::VIDEO
        || mime.essence_str() == mime::APPLICATION_OCTET_STREAM.essence_str()
    {
        Parser::Binary
    } else {
        Parser::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde::Deserialize;
    use serde_json::json;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    fn auto(content_type: &'static str, body: &'static [u8]) -> Result<ResponseBody, ClientError> {
        negotiate_body(
            StatusCode::OK,
            &headers(content_type),
            Bytes::from_static(body),
            ExpectedContentType::Auto,
        )
    }

    #[test]
    fn test_auto_json() {
        let body = auto("application/json", br#"{"id":1}"#).unwrap();
        assert_eq!(body, ResponseBody::Json(json!({"id": 1})));
    }

    #[test]
    fn test_auto_missing_content_type_parses_json() {
        let body = negotiate_body(
            StatusCode::OK,
            &HeaderMap::new(),
            Bytes::from_static(b"[1,2]"),
            ExpectedContentType::Auto,
        )
        .unwrap();
        assert_eq!(body, ResponseBody::Json(json!([1, 2])));
    }

    #[test]
    fn test_auto_text() {
        let body = auto("text/csv; charset=utf-8", b"a,b\n1,2\n").unwrap();
        assert_eq!(body.as_text(), Some("a,b\n1,2\n"));
    }

    #[test]
    fn test_auto_binary_families() {
        for content_type in ["image/png", "audio/mpeg", "video/mp4", "application/octet-stream"] {
            let body = negotiate_body(
                StatusCode::OK,
                &headers(content_type),
                Bytes::from_static(&[0x89, 0x50, 0x4e, 0x47]),
                ExpectedContentType::Auto,
            )
            .unwrap();
            assert!(body.as_bytes().is_some(), "{content_type} should be binary");
        }
    }

    #[test]
    fn test_explicit_text_overrides_image() {
        let body = negotiate_body(
            StatusCode::OK,
            &headers("image/png"),
            Bytes::from_static(b"not really a png"),
            ExpectedContentType::Text,
        )
        .unwrap();
        assert_eq!(body, ResponseBody::Text("not really a png".to_owned()));
    }

    #[test]
    fn test_explicit_blob_overrides_json() {
        let body = negotiate_body(
            StatusCode::OK,
            &headers("application/json"),
            Bytes::from_static(br#"{"a":1}"#),
            ExpectedContentType::Blob,
        )
        .unwrap();
        assert_eq!(body.as_bytes().unwrap().as_ref(), br#"{"a":1}"#);
    }

    #[test]
    fn test_empty_bodies() {
        assert_eq!(auto("application/json", b"").unwrap(), ResponseBody::Json(json!({})));
        assert_eq!(auto("text/plain", b"").unwrap(), ResponseBody::Text(String::new()));
    }

    #[test]
    fn test_invalid_json_is_non_retryable_api_error() {
        let err = auto("application/json", b"{not json").unwrap_err();
        let api = err.api_error().unwrap();
        assert_eq!(api.message, INVALID_JSON_MESSAGE);
        assert_eq!(api.status, StatusCode::OK);
        assert_eq!(api.code.as_deref(), Some("invalid_json"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_into_json_typed() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Project {
            id: u32,
        }
        let project: Project = ResponseBody::Json(json!({"id": 7})).into_json().unwrap();
        assert_eq!(project, Project { id: 7 });
    }
}
