//! Extended error information parsing.
//!
//! The service reports failures as either
//! `{"odata.error":{"code":..,"message":{"value":..}}}` or
//! `<error><code>..</code><message>..</message></error>`. When the body is
//! empty or unreadable, the `x-ms-error-code` header is used.

use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::Value;

use super::xml::{local_name, read_text};
use crate::error::{ExtendedErrorInformation, SerializationError};

pub(crate) const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// Builds error details from a failed response.
pub(crate) fn parse_error(
    body: &[u8],
    error_code_header: Option<&str>,
    reason: &str,
) -> ExtendedErrorInformation {
    let trimmed = body.trim_ascii_start();
    let parsed = match trimmed.first() {
        Some(b'{') => parse_json(trimmed),
        Some(b'<') => parse_xml(trimmed).ok(),
        _ => None,
    };

    let mut info = parsed.unwrap_or_default();
    if info.error_code.is_empty() {
        info.error_code = error_code_header.unwrap_or_default().to_string();
    }
    if info.error_message.is_empty() {
        info.error_message = reason.to_string();
    }
    info
}

fn parse_json(body: &[u8]) -> Option<ExtendedErrorInformation> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let error = value.get("odata.error").or_else(|| value.get("error"))?;

    let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
    let message = match error.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(m) => m
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        None => String::new(),
    };

    let mut info = ExtendedErrorInformation::new(code, message);
    if let Some(Value::Object(inner)) = error.get("innererror") {
        for (key, value) in inner {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            info.additional_details.insert(key.clone(), text);
        }
    }
    Some(info)
}

fn parse_xml(body: &[u8]) -> Result<ExtendedErrorInformation, SerializationError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut info = ExtendedErrorInformation::default();
    let mut in_error = false;

    loop {
        buf.clear();
        let name = match reader.read_event_into(&mut buf)? {
            Event::Start(e) => local_name(&e).to_vec(),
            Event::Eof => return Ok(info),
            _ => continue,
        };
        if !in_error {
            in_error = name == b"error";
            continue;
        }
        let text = read_text(&mut reader, &mut buf)?;
        match name.as_slice() {
            b"code" => info.error_code = text,
            b"message" => info.error_message = text,
            other => {
                info.additional_details
                    .insert(String::from_utf8_lossy(other).into_owned(), text);
            }
        }
    }
}
