//! Turns a non-2xx response into an [`ApiError`] with a readable message.

use std::sync::LazyLock;

use http::{HeaderMap, StatusCode};
use regex::Regex;
use serde_json::Value;

use crate::error::ApiError;

/// Free-text details longer than this are cut unless the caller asked for the
/// detail verbatim.
const MAX_DETAIL_CHARS: usize = 300;

static TITLE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok());

/// Where a message came from. Only free text is tidied and capped.
enum Detail {
    Field(String),
    FreeText(String),
}

/// Body families the classifier distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorBodyKind {
    Json,
    Html,
    Text,
    Unlabelled,
    Other,
}

/// Build the error for a non-2xx response.
///
/// The message is the most specific detail recoverable from the body, falling
/// back to the canonical status text. With `preserve_detail` the detail is
/// used verbatim and the full body is kept in [`ApiError::raw_response`];
/// otherwise free-text details (HTML title, plain text) are
/// whitespace-collapsed and capped. JSON `message`/`error` fields are kept as
/// sent, apart from trimming.
#[must_use]
pub fn classify_error(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
    preserve_detail: bool,
) -> ApiError {
    let text = String::from_utf8_lossy(body);
    let (detail, code) = match body_kind(headers) {
        ErrorBodyKind::Json => field_detail(&text),
        ErrorBodyKind::Html => (html_title(&text).map(Detail::FreeText), None),
        ErrorBodyKind::Text => (non_empty(&text).map(Detail::FreeText), None),
        ErrorBodyKind::Unlabelled => match field_detail(&text) {
            (Some(detail), code) => (Some(detail), code),
            (None, _) if serde_json::from_str::<Value>(&text).is_ok() => (None, None),
            (None, _) => (non_empty(&text).map(Detail::FreeText), None),
        },
        ErrorBodyKind::Other => (None, None),
    };

    let message = match detail {
        Some(Detail::Field(detail)) => detail,
        Some(Detail::FreeText(detail)) if preserve_detail => detail,
        Some(Detail::FreeText(detail)) => tidy(&detail),
        None => status_text(status),
    };

    let mut error = ApiError::new(message, status);
    if let Some(code) = code {
        error = error.with_code(code);
    }
    if preserve_detail && !body.is_empty() {
        error = error.with_raw_response(text.into_owned());
    }
    error
}

/// Canonical reason phrase, e.g. `Not Found`.
#[must_use]
pub fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_owned)
}

/// Reads `message`, then `error`, from a JSON object body.
#[must_use]
pub fn json_message(text: &str) -> Option<String> {
    json_detail(text).0
}

fn json_detail(text: &str) -> (Option<String>, Option<String>) {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) else {
        return (None, None);
    };
    let detail = ["message", "error"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str).and_then(non_empty));
    let code = map.get("code").and_then(Value::as_str).map(str::to_owned);
    (detail, code)
}

fn field_detail(text: &str) -> (Option<Detail>, Option<String>) {
    let (detail, code) = json_detail(text);
    (detail.map(Detail::Field), code)
}

fn body_kind(headers: &HeaderMap) -> ErrorBodyKind {
    let Some(raw) = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return ErrorBodyKind::Unlabelled;
    };
    let Ok(mime) = raw.parse::<mime::Mime>() else {
        return if raw.contains("json") {
            ErrorBodyKind::Json
        } else {
            ErrorBodyKind::Other
        };
    };
    if mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON) {
        ErrorBodyKind::Json
    } else if mime.type_() == mime::TEXT && mime.subtype() == mime::HTML {
        ErrorBodyKind::Html
    } else if mime.type_() == mime::TEXT {
        ErrorBodyKind::Text
    } else {
        ErrorBodyKind::Other
    }
}

fn html_title(text: &str) -> Option<String> {
    TITLE_RE
        .as_ref()?
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| non_empty(m.as_str()))
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn tidy(detail: &str) -> String {
    let collapsed = detail.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_DETAIL_CHARS {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(MAX_DETAIL_CHARS).collect();
    cut.push_str("...");
    cut
}
