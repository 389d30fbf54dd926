//! `multipart/mixed` batch request writer and response reader.
//!
//! Mutations travel inside a single changeset; a lone retrieve is sent as a
//! bare part of the batch. Responses mirror that layout, so the reader
//! descends into any nested multipart body it finds.

use std::io::Write;

use http::Method;

use crate::error::SerializationError;

const CRLF: &str = "\r\n";

/// One sub-request of a batch.
#[derive(Debug, Clone)]
pub(crate) struct BatchPart {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Writes the batch body.
///
/// `changeset_boundary` is `None` for a retrieve-only batch.
pub(crate) fn write_batch<W: Write>(
    out: &mut W,
    batch_boundary: &str,
    changeset_boundary: Option<&str>,
    parts: &[BatchPart],
) -> std::io::Result<()> {
    match changeset_boundary {
        Some(changeset) => {
            write!(out, "--{batch_boundary}{CRLF}")?;
            write!(out, "Content-Type: multipart/mixed; boundary={changeset}{CRLF}{CRLF}")?;
            for (index, part) in parts.iter().enumerate() {
                write!(out, "--{changeset}{CRLF}")?;
                write_part(out, part, Some(index))?;
            }
            write!(out, "--{changeset}--{CRLF}")?;
        }
        None => {
            for part in parts {
                write!(out, "--{batch_boundary}{CRLF}")?;
                write_part(out, part, None)?;
            }
        }
    }
    write!(out, "--{batch_boundary}--{CRLF}")?;
    Ok(())
}

fn write_part<W: Write>(
    out: &mut W,
    part: &BatchPart,
    content_id: Option<usize>,
) -> std::io::Result<()> {
    write!(out, "Content-Type: application/http{CRLF}")?;
    write!(out, "Content-Transfer-Encoding: binary{CRLF}{CRLF}")?;
    write!(out, "{} {} HTTP/1.1{CRLF}", part.method, part.url)?;
    if let Some(id) = content_id {
        write!(out, "Content-ID: {id}{CRLF}")?;
    }
    for (name, value) in &part.headers {
        write!(out, "{name}: {value}{CRLF}")?;
    }
    match &part.body {
        Some(body) => {
            write!(out, "Content-Length: {}{CRLF}{CRLF}", body.len())?;
            out.write_all(body)?;
            write!(out, "{CRLF}")?;
        }
        None => write!(out, "{CRLF}")?,
    }
    Ok(())
}

/// One embedded HTTP response of a batch response.
#[derive(Debug, Clone)]
pub(crate) struct SubResponse {
    pub status: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SubResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Extracts the `boundary` parameter of a multipart content type.
pub(crate) fn boundary(content_type: &str) -> Option<&str> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Reads every embedded response, in order, from a batch response body.
pub(crate) fn read_batch_response(
    body: &[u8],
    content_type: &str,
) -> Result<Vec<SubResponse>, SerializationError> {
    let boundary = boundary(content_type).ok_or_else(|| {
        SerializationError::malformed(format!(
            "batch response content type has no boundary: {content_type}"
        ))
    })?;
    let text = std::str::from_utf8(body)
        .map_err(|e| SerializationError::malformed(format!("batch response is not UTF-8: {e}")))?;
    let mut responses = Vec::new();
    read_multipart(text, boundary, &mut responses)?;
    Ok(responses)
}

fn read_multipart(
    text: &str,
    boundary: &str,
    responses: &mut Vec<SubResponse>,
) -> Result<(), SerializationError> {
    let delimiter = format!("--{boundary}");
    let mut sections = text.split(delimiter.as_str());
    // preamble
    sections.next();

    for section in sections {
        if section.starts_with("--") {
            return Ok(());
        }
        let section = section
            .strip_prefix(CRLF)
            .or_else(|| section.strip_prefix('\n'))
            .unwrap_or(section);
        let (headers, content) = split_head(section);
        let headers = parse_headers(headers);
        let content_type = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .unwrap_or_default();

        if content_type.to_ascii_lowercase().starts_with("multipart/mixed") {
            let nested = boundary_of(content_type)?;
            read_multipart(content, nested, responses)?;
        } else {
            responses.push(read_http_response(content)?);
        }
    }
    Err(SerializationError::malformed(format!(
        "multipart body is missing its closing delimiter --{boundary}--"
    )))
}

fn boundary_of(content_type: &str) -> Result<&str, SerializationError> {
    boundary(content_type).ok_or_else(|| {
        SerializationError::malformed(format!(
            "nested multipart part has no boundary: {content_type}"
        ))
    })
}

fn read_http_response(content: &str) -> Result<SubResponse, SerializationError> {
    let (head, body) = split_head(content);
    let mut lines = head.lines();
    let status_line = lines
        .next()
        .ok_or_else(|| SerializationError::malformed("embedded response has no status line"))?;

    let mut parts = status_line.trim().splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(SerializationError::malformed(format!(
            "invalid embedded status line: {status_line}"
        )));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| SerializationError::malformed(format!("invalid status in: {status_line}")))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let headers = parse_headers(&lines.collect::<Vec<_>>().join("\n"));
    let body = body
        .strip_suffix(CRLF)
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body);

    Ok(SubResponse {
        status,
        reason,
        headers,
        body: body.as_bytes().to_vec(),
    })
}

/// Splits at the first blank line.
fn split_head(section: &str) -> (&str, &str) {
    if let Some(pos) = section.find("\r\n\r\n") {
        (&section[..pos], &section[pos + 4..])
    } else if let Some(pos) = section.find("\n\n") {
        (&section[..pos], &section[pos + 2..])
    } else {
        (section, "")
    }
}

fn parse_headers(head: &str) -> Vec<(String, String)> {
    head.lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}
