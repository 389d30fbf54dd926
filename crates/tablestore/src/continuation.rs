//! Continuation tokens for segmented queries and table listings.
//!
//! A [`ContinuationToken`] is opaque to callers but must survive being
//! persisted and restored. Two XML paths are supported:
//!
//! - serde: the type derives `Serialize`/`Deserialize`, so any serde format
//!   (including `quick_xml::se`/`quick_xml::de`) can carry it.
//! - [`ContinuationToken::write_xml`] / [`ContinuationToken::read_xml`]: a
//!   hand-written pair that operates on a caller-owned `quick_xml` writer or
//!   reader. Both can be called in the middle of a larger document; the
//!   reader returns with the cursor positioned right after the token's own
//!   end tag.

use std::fmt;
use std::io::{BufRead, Write};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SerializationError;
use crate::wire::xml;

const TOKEN_ELEMENT: &str = "ContinuationToken";
const VERSION_ELEMENT: &str = "Version";
const TYPE_ELEMENT: &str = "Type";
const NEXT_PARTITION_KEY_ELEMENT: &str = "NextPartitionKey";
const NEXT_ROW_KEY_ELEMENT: &str = "NextRowKey";
const NEXT_TABLE_NAME_ELEMENT: &str = "NextTableName";
const TARGET_LOCATION_ELEMENT: &str = "TargetLocation";

const TOKEN_VERSION: &str = "2.0";
const TOKEN_TYPE: &str = "Table";

/// A service endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageLocation {
    Primary,
    Secondary,
}

impl StorageLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageLocation::Primary => "Primary",
            StorageLocation::Secondary => "Secondary",
        }
    }

    /// Parses `Primary` or `Secondary`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Primary" => Some(StorageLocation::Primary),
            "Secondary" => Some(StorageLocation::Secondary),
            _ => None,
        }
    }

    /// The other endpoint.
    pub fn other(&self) -> Self {
        match self {
            StorageLocation::Primary => StorageLocation::Secondary,
            StorageLocation::Secondary => StorageLocation::Primary,
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Serialized as plain text so every serde format sees a scalar.
impl Serialize for StorageLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StorageLocation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StorageLocation::parse(s.trim()).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown storage location '{s}'"))
        })
    }
}

/// Resumption state for a segmented query or table listing.
///
/// `target_location` records the endpoint that produced the segment so the
/// next segment is read from the same replica. It is `None` when the token
/// was not produced by a request (for example, built by hand).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "ContinuationToken", rename_all = "PascalCase")]
pub struct ContinuationToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_partition_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_row_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_table_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_location: Option<StorageLocation>,
}

impl ContinuationToken {
    /// Token resuming an entity query at the given key.
    pub fn for_entities(
        next_partition_key: Option<String>,
        next_row_key: Option<String>,
        target_location: Option<StorageLocation>,
    ) -> Self {
        Self {
            next_partition_key,
            next_row_key,
            next_table_name: None,
            target_location,
        }
    }

    /// Token resuming a table listing at the given table name.
    pub fn for_tables(next_table_name: String, target_location: Option<StorageLocation>) -> Self {
        Self {
            next_partition_key: None,
            next_row_key: None,
            next_table_name: Some(next_table_name),
            target_location,
        }
    }

    /// Writes the token as a `<ContinuationToken>` element at the writer's
    /// current position.
    pub fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), SerializationError> {
        writer.write_event(Event::Start(BytesStart::new(TOKEN_ELEMENT)))?;

        write_text_element(writer, VERSION_ELEMENT, TOKEN_VERSION)?;
        write_text_element(writer, TYPE_ELEMENT, TOKEN_TYPE)?;

        if let Some(pk) = &self.next_partition_key {
            write_text_element(writer, NEXT_PARTITION_KEY_ELEMENT, pk)?;
        }
        if let Some(rk) = &self.next_row_key {
            write_text_element(writer, NEXT_ROW_KEY_ELEMENT, rk)?;
        }
        if let Some(table) = &self.next_table_name {
            write_text_element(writer, NEXT_TABLE_NAME_ELEMENT, table)?;
        }
        if let Some(location) = &self.target_location {
            write_text_element(writer, TARGET_LOCATION_ELEMENT, location.as_str())?;
        }

        writer.write_event(Event::End(BytesEnd::new(TOKEN_ELEMENT)))?;
        Ok(())
    }

    /// Reads a token from the reader's current position.
    ///
    /// Content before the `<ContinuationToken>` start tag, including complete
    /// sibling elements, is skipped; unknown
    /// child elements are ignored. On success the reader is positioned right
    /// after `</ContinuationToken>` (or after `<ContinuationToken/>`).
    ///
    /// # Errors
    ///
    /// Returns `Malformed` when the document ends or an enclosing element
    /// closes before a token is found, or when `TargetLocation` holds an
    /// unknown value.
    pub fn read_xml<R: BufRead>(reader: &mut Reader<R>) -> Result<Self, SerializationError> {
        let mut buf = Vec::new();
        let mut depth = 0usize;

        loop {
            buf.clear();
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if xml::local_name(&e) == TOKEN_ELEMENT.as_bytes() => break,
                Event::Empty(e) if xml::local_name(&e) == TOKEN_ELEMENT.as_bytes() => {
                    return Ok(Self::default());
                }
                Event::Start(_) => depth += 1,
                Event::End(_) if depth > 0 => depth -= 1,
                Event::End(_) => {
                    return Err(SerializationError::malformed(
                        "enclosing element closed before a ContinuationToken was found",
                    ));
                }
                Event::Eof => {
                    return Err(SerializationError::malformed(
                        "no ContinuationToken element found",
                    ));
                }
                _ => {}
            }
        }

        let mut token = Self::default();
        loop {
            buf.clear();
            let name = match reader.read_event_into(&mut buf)? {
                Event::Start(e) => xml::local_name(&e).to_vec(),
                Event::Empty(e) => {
                    token.assign(xml::local_name(&e), String::new())?;
                    continue;
                }
                Event::End(_) => return Ok(token),
                Event::Eof => {
                    return Err(SerializationError::malformed(
                        "unexpected end of document inside ContinuationToken",
                    ));
                }
                _ => continue,
            };
            let value = xml::read_text(reader, &mut buf)?;
            token.assign(&name, value)?;
        }
    }

    /// Serializes the token to a standalone XML string.
    pub fn to_xml_string(&self) -> Result<String, SerializationError> {
        let mut writer = Writer::new(Vec::new());
        self.write_xml(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| SerializationError::malformed(format!("invalid UTF-8: {e}")))
    }

    /// Parses a token from a standalone XML string.
    pub fn from_xml_str(s: &str) -> Result<Self, SerializationError> {
        let mut reader = Reader::from_reader(s.as_bytes());
        reader.config_mut().trim_text(false);
        Self::read_xml(&mut reader)
    }

    fn assign(&mut self, element: &[u8], value: String) -> Result<(), SerializationError> {
        match element {
            b"NextPartitionKey" => self.next_partition_key = Some(value),
            b"NextRowKey" => self.next_row_key = Some(value),
            b"NextTableName" => self.next_table_name = Some(value),
            b"TargetLocation" => {
                let trimmed = value.trim();
                self.target_location = if trimmed.is_empty() {
                    None
                } else {
                    Some(StorageLocation::parse(trimmed).ok_or_else(|| {
                        SerializationError::malformed(format!(
                            "unknown TargetLocation '{trimmed}'"
                        ))
                    })?)
                };
            }
            _ => {}
        }
        Ok(())
    }
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), SerializationError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_token() -> ContinuationToken {
        ContinuationToken {
            next_partition_key: Some("a".to_string()),
            next_row_key: Some("b".to_string()),
            next_table_name: Some("c".to_string()),
            target_location: Some(StorageLocation::Primary),
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename = "Wrapper")]
    struct Wrapper {
        #[serde(rename = "Before")]
        before: String,
        #[serde(rename = "ContinuationToken")]
        token: ContinuationToken,
        #[serde(rename = "After")]
        after: String,
    }

    #[test]
    fn test_serde_xml_round_trip() {
        let token = full_token();
        let xml = quick_xml::se::to_string(&token).unwrap();
        assert!(xml.starts_with("<ContinuationToken>"));
        let back: ContinuationToken = quick_xml::de::from_str(&xml).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_hand_written_round_trip() {
        let token = full_token();
        let xml = token.to_xml_string().unwrap();
        assert_eq!(ContinuationToken::from_xml_str(&xml).unwrap(), token);
    }

    #[test]
    fn test_key_whitespace_and_escapes_survive_round_trip() {
        let token = ContinuationToken {
            next_partition_key: Some(" lead".to_string()),
            next_row_key: Some("a & b".to_string()),
            next_table_name: Some("trail  ".to_string()),
            target_location: Some(StorageLocation::Secondary),
        };
        let xml = token.to_xml_string().unwrap();
        assert!(xml.contains("<NextRowKey>a &amp; b</NextRowKey>"));
        assert_eq!(ContinuationToken::from_xml_str(&xml).unwrap(), token);
    }

    #[test]
    fn test_indented_document_keeps_key_whitespace() {
        let xml = "<ContinuationToken>\n  <NextPartitionKey> lead</NextPartitionKey>\n  \
                   <NextRowKey>x &lt;'y' </NextRowKey>\n  \
                   <TargetLocation> Primary </TargetLocation>\n</ContinuationToken>";
        let token = ContinuationToken::from_xml_str(xml).unwrap();
        assert_eq!(token.next_partition_key.as_deref(), Some(" lead"));
        assert_eq!(token.next_row_key.as_deref(), Some("x <'y' "));
        assert_eq!(token.target_location, Some(StorageLocation::Primary));
    }

    #[test]
    fn test_paths_are_interchangeable() {
        let token = full_token();

        let generic = quick_xml::se::to_string(&token).unwrap();
        assert_eq!(ContinuationToken::from_xml_str(&generic).unwrap(), token);

        let manual = token.to_xml_string().unwrap();
        let back: ContinuationToken = quick_xml::de::from_str(&manual).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_null_target_location_round_trips_as_none() {
        let token = ContinuationToken {
            target_location: None,
            ..full_token()
        };

        let manual = token.to_xml_string().unwrap();
        assert!(!manual.contains("TargetLocation"));
        assert_eq!(
            ContinuationToken::from_xml_str(&manual).unwrap().target_location,
            None
        );

        let generic = quick_xml::se::to_string(&token).unwrap();
        let back: ContinuationToken = quick_xml::de::from_str(&generic).unwrap();
        assert_eq!(back.target_location, None);

        let json = serde_json::to_string(&token).unwrap();
        let back: ContinuationToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_embedded_in_enclosing_document_hand_written() {
        let token = full_token();

        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Start(BytesStart::new("Wrapper")))
            .unwrap();
        write_text_element(&mut writer, "Before", "x").unwrap();
        token.write_xml(&mut writer).unwrap();
        write_text_element(&mut writer, "After", "y").unwrap();
        writer
            .write_event(Event::End(BytesEnd::new("Wrapper")))
            .unwrap();
        let doc = String::from_utf8(writer.into_inner()).unwrap();

        let mut reader = Reader::from_reader(doc.as_bytes());
        reader.config_mut().trim_text(false);
        let mut buf = Vec::new();

        // Consume <Wrapper><Before>x</Before> so the token reader starts mid-document.
        for _ in 0..4 {
            buf.clear();
            reader.read_event_into(&mut buf).unwrap();
        }

        let back = ContinuationToken::read_xml(&mut reader).unwrap();
        assert_eq!(back, token);

        buf.clear();
        match reader.read_event_into(&mut buf).unwrap() {
            Event::Start(e) => assert_eq!(e.name().as_ref(), b"After"),
            other => panic!("reader not positioned after the token: {other:?}"),
        }
    }

    #[test]
    fn test_embedded_in_enclosing_document_serde() {
        let wrapper = Wrapper {
            before: "x".to_string(),
            token: full_token(),
            after: "y".to_string(),
        };
        let xml = quick_xml::se::to_string(&wrapper).unwrap();
        let back: Wrapper = quick_xml::de::from_str(&xml).unwrap();
        assert_eq!(back, wrapper);

        // The hand-written reader finds the token inside the generic output.
        let token = ContinuationToken::from_xml_str(&xml).unwrap();
        assert_eq!(token, wrapper.token);
    }

    #[test]
    fn test_read_skips_unknown_children_and_handles_empty_elements() {
        let xml = "<ContinuationToken><Version>2.0</Version><Extra><Deep>1</Deep></Extra>\
                   <NextPartitionKey/><NextRowKey>r&amp;1</NextRowKey></ContinuationToken>";
        let token = ContinuationToken::from_xml_str(xml).unwrap();
        assert_eq!(token.next_partition_key.as_deref(), Some(""));
        assert_eq!(token.next_row_key.as_deref(), Some("r&1"));
        assert_eq!(token.target_location, None);
    }

    #[test]
    fn test_read_rejects_unknown_location() {
        let xml =
            "<ContinuationToken><TargetLocation>Tertiary</TargetLocation></ContinuationToken>";
        assert!(ContinuationToken::from_xml_str(xml).is_err());
    }

    #[test]
    fn test_read_fails_when_enclosing_element_closes() {
        let mut reader = Reader::from_reader("<Outer></Outer>".as_bytes());
        let mut buf = Vec::new();
        reader.read_event_into(&mut buf).unwrap();
        assert!(ContinuationToken::read_xml(&mut reader).is_err());
    }
}
