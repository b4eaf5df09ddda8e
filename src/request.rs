//! Inbound request parsing and body rewriting.
//!
//! Clients name the inference target in the request body, either as a
//! top-level `model` field in a JSON document or as a `model` part in a
//! `multipart/form-data` upload. The requested name may carry an adapter
//! suffix (`"<model>_<adapter>"`). Parsing buffers the whole body so the
//! proxy can replay it across retries, and rewrites it where needed: JSON
//! bodies get the adapter substituted into the `model` field, form bodies
//! get the `model` part removed with the remaining parts preserved
//! byte-for-byte.

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use bytes::Bytes;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::Value;

/// Split a requested model name into `(model, adapter)` on the first `_`.
/// The adapter is empty when the name has no underscore.
pub fn split_model_adapter(requested: &str) -> (String, String) {
    match requested.split_once('_') {
        Some((model, adapter)) => (model.to_string(), adapter.to_string()),
        None => (requested.to_string(), String::new()),
    }
}

/// Inverse of [`split_model_adapter`] for non-empty adapters.
pub fn merge_model_adapter(model: &str, adapter: &str) -> String {
    if adapter.is_empty() {
        model.to_string()
    } else {
        format!("{model}_{adapter}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("reading model from body: {0}")]
pub struct ParseError(#[from] pub BodyError);

#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("missing 'model' field")]
    MissingModel,
    #[error("'model' field should be a string")]
    ModelNotString,
    #[error("decoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("form content type missing boundary")]
    MissingBoundary,
    #[error("malformed multipart body")]
    MalformedMultipart,
}

/// One inbound HTTP request, parsed and ready to forward.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Short random identifier for log correlation.
    pub id: String,
    /// The model name exactly as the client sent it.
    pub requested_model: String,
    pub model: String,
    pub adapter: String,
    /// Label selectors from `X-Label-Selector` headers, passed through to
    /// model lookup.
    pub selectors: Vec<String>,
    /// The possibly-rewritten body, buffered for retry replay.
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn parse(headers: &HeaderMap, body: Bytes) -> Result<Self, ParseError> {
        let selectors = headers
            .get_all("x-label-selector")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        let (requested_model, body) = if content_type.starts_with("multipart/form-data") {
            let boundary = boundary_from_content_type(content_type)
                .ok_or(ParseError(BodyError::MissingBoundary))?;
            let (model, rewritten) = rewrite_multipart(&body, &boundary)?;
            (model, Bytes::from(rewritten))
        } else {
            read_model_from_json(body)?
        };

        let (model, adapter) = split_model_adapter(&requested_model);
        Ok(Self {
            id: request_id(),
            requested_model,
            model,
            adapter,
            selectors,
            body,
        })
    }
}

fn request_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Extract the model from a JSON body. When the requested name carries an
/// adapter, the `model` field is replaced with just the adapter (backends
/// address adapters through the model field) and the body re-marshalled;
/// otherwise the original bytes pass through untouched.
fn read_model_from_json(body: Bytes) -> Result<(String, Bytes), BodyError> {
    let mut document: serde_json::Map<String, Value> = serde_json::from_slice(&body)?;
    let requested = match document.get("model") {
        None => return Err(BodyError::MissingModel),
        Some(Value::String(name)) => name.clone(),
        Some(_) => return Err(BodyError::ModelNotString),
    };

    let (_, adapter) = split_model_adapter(&requested);
    if adapter.is_empty() {
        return Ok((requested, body));
    }
    document.insert("model".to_string(), Value::String(adapter));
    let rewritten = serde_json::to_vec(&document)?;
    Ok((requested, Bytes::from(rewritten)))
}

fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let boundary = content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))?;
    Some(boundary.trim_matches('"').to_string())
}

struct RawPart<'a> {
    headers: &'a [u8],
    content: &'a [u8],
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Pull the `model` part out of a multipart body.
///
/// Returns the model value and a rebuilt body that omits the `model` part
/// while carrying every other part byte-identically. The rebuilt framing is
/// the conventional writer output: `--B\r\n` before the first part,
/// `\r\n--B\r\n` between parts, `\r\n--B--\r\n` after the last, which means
/// a body whose only part was `model` collapses to `\r\n--B--\r\n`.
fn rewrite_multipart(body: &[u8], boundary: &str) -> Result<(String, Vec<u8>), BodyError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let separator: Vec<u8> = [b"\r\n" as &[u8], delimiter].concat();

    let mut pos = if body.starts_with(delimiter) {
        delimiter.len()
    } else {
        // Anything before the first boundary is preamble; skip it.
        find(body, &separator).ok_or(BodyError::MalformedMultipart)? + separator.len()
    };

    let mut parts = Vec::new();
    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(BodyError::MalformedMultipart);
        }
        pos += 2;
        let headers_len = find(&body[pos..], b"\r\n\r\n").ok_or(BodyError::MalformedMultipart)?;
        let headers = &body[pos..pos + headers_len];
        let content_start = pos + headers_len + 4;
        let content_len =
            find(&body[content_start..], &separator).ok_or(BodyError::MalformedMultipart)?;
        parts.push(RawPart {
            headers,
            content: &body[content_start..content_start + content_len],
        });
        pos = content_start + content_len + separator.len();
    }

    let mut model = None;
    let mut kept = Vec::new();
    for part in parts {
        if model.is_none() && part_name(part.headers).as_deref() == Some("model") {
            model = Some(String::from_utf8_lossy(part.content).into_owned());
        } else {
            kept.push(part);
        }
    }
    let model = model.ok_or(BodyError::MissingModel)?;

    let mut rebuilt = Vec::with_capacity(body.len());
    for (index, part) in kept.iter().enumerate() {
        if index > 0 {
            rebuilt.extend_from_slice(b"\r\n");
        }
        rebuilt.extend_from_slice(delimiter);
        rebuilt.extend_from_slice(b"\r\n");
        rebuilt.extend_from_slice(part.headers);
        rebuilt.extend_from_slice(b"\r\n\r\n");
        rebuilt.extend_from_slice(part.content);
    }
    rebuilt.extend_from_slice(b"\r\n");
    rebuilt.extend_from_slice(delimiter);
    rebuilt.extend_from_slice(b"--\r\n");

    Ok((model, rebuilt))
}

/// The `name` parameter of a part's Content-Disposition header.
fn part_name(headers: &[u8]) -> Option<String> {
    for line in headers.split(|&b| b == b'\n') {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        let Some((header, value)) = line.split_once(':') else {
            continue;
        };
        if !header.eq_ignore_ascii_case("content-disposition") {
            continue;
        }
        for param in value.split(';').map(str::trim) {
            if let Some(name) = param.strip_prefix("name=") {
                return Some(name.trim_matches('"').to_string());
            }
        }
    }
    None
}
