//! Low-level helpers shared by the XML readers.

use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::{BytesRef, BytesStart, BytesText, Event};

use crate::error::SerializationError;

type Result<T> = std::result::Result<T, SerializationError>;

pub(crate) fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| SerializationError::malformed(format!("invalid UTF-8 in XML: {e}")))
}

/// Local (unprefixed) name of an element.
pub(crate) fn local_name<'a>(e: &'a BytesStart<'_>) -> &'a [u8] {
    e.local_name().into_inner()
}

/// Finds an attribute by local name and returns its unescaped value.
pub(crate) fn attribute(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| {
            SerializationError::malformed(format!("failed to parse attribute: {e}"))
        })?;
        if attr.key.local_name().as_ref() == local {
            let raw = utf8(&attr.value)?;
            let value = quick_xml::escape::unescape(raw).map_err(|e| {
                SerializationError::malformed(format!("invalid escape in attribute: {e}"))
            })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn push_text(out: &mut String, text: &BytesText<'_>) -> Result<()> {
    out.push_str(utf8(text.as_ref())?);
    Ok(())
}

fn push_reference(out: &mut String, reference: &BytesRef<'_>) -> Result<()> {
    let name = utf8(&**reference)?;
    let resolved = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            code.and_then(char::from_u32).ok_or_else(|| {
                SerializationError::malformed(format!("unknown entity reference &{name};"))
            })?
        }
    };
    out.push(resolved);
    Ok(())
}

/// Reads the text content of the element whose start tag was just consumed,
/// leaving the reader positioned after its end tag. Text of nested elements
/// is ignored.
pub(crate) fn read_text<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<String> {
    let mut out = String::new();
    let mut depth = 0usize;
    loop {
        buf.clear();
        match reader.read_event_into(buf)? {
            Event::Text(text) if depth == 0 => push_text(&mut out, &text)?,
            Event::CData(data) if depth == 0 => out.push_str(utf8(data.as_ref())?),
            Event::GeneralRef(reference) if depth == 0 => push_reference(&mut out, &reference)?,
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(out);
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(SerializationError::malformed(
                    "unexpected end of document inside element",
                ));
            }
            _ => {}
        }
    }
}

/// Skips the element whose start tag was just consumed.
pub(crate) fn skip_element<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<()> {
    let mut depth = 0usize;
    loop {
        buf.clear();
        match reader.read_event_into(buf)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(SerializationError::malformed(
                    "unexpected end of document while skipping element",
                ));
            }
            _ => {}
        }
    }
}
