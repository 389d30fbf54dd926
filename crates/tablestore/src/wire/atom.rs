//! AtomPub XML entity codec.
//!
//! Entities are `<entry>` elements whose `<m:properties>` hold one `d:`
//! element per property. Types travel in `m:type` (absent means
//! `Edm.String`) and nulls are written as `m:null="true"` with the declared
//! type, so they read back with the same type.

use std::io::{BufRead, Write};

use chrono::Utc;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::xml::{attribute, local_name, read_text, skip_element};
use super::{format_datetime, parse_datetime, parse_property_text, property_text};
use crate::entity::{
    DynamicEntity, EdmType, EntityProperty, PARTITION_KEY, PropertyMap, ROW_KEY, TIMESTAMP,
};
use crate::error::{SerializationError, TableResult};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const DATA_NS: &str = "http://schemas.microsoft.com/ado/2007/08/dataservices";
const METADATA_NS: &str = "http://schemas.microsoft.com/ado/2007/08/dataservices/metadata";

type Result<T> = std::result::Result<T, SerializationError>;

/// Writes an `<entry>` document for an entity.
pub(crate) fn write_entity<W: Write>(
    out: W,
    partition_key: &str,
    row_key: &str,
    properties: &PropertyMap,
) -> Result<()> {
    write_entry(out, |writer| {
        write_property(writer, PARTITION_KEY, None, Some(partition_key))?;
        write_property(writer, ROW_KEY, None, Some(row_key))?;
        for (name, property) in properties {
            let edm_type = property.edm_type();
            let type_attr = (edm_type != EdmType::String || property.is_null()).then_some(edm_type);
            write_property(writer, name, type_attr, property_text(property).as_deref())?;
        }
        Ok(())
    })
}

/// Writes an `<entry>` document for a create-table request.
pub(crate) fn write_table<W: Write>(out: W, name: &str) -> Result<()> {
    write_entry(out, |writer| write_property(writer, "TableName", None, Some(name)))
}

fn write_entry<W, F>(out: W, properties: F) -> Result<()>
where
    W: Write,
    F: FnOnce(&mut Writer<W>) -> Result<()>,
{
    let mut writer = Writer::new(out);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;

    let mut entry = BytesStart::new("entry");
    entry.push_attribute(("xmlns", ATOM_NS));
    entry.push_attribute(("xmlns:d", DATA_NS));
    entry.push_attribute(("xmlns:m", METADATA_NS));
    writer.write_event(Event::Start(entry))?;

    writer.write_event(Event::Empty(BytesStart::new("title")))?;
    writer.write_event(Event::Start(BytesStart::new("author")))?;
    writer.write_event(Event::Empty(BytesStart::new("name")))?;
    writer.write_event(Event::End(BytesEnd::new("author")))?;
    writer.write_event(Event::Start(BytesStart::new("updated")))?;
    writer.write_event(Event::Text(BytesText::new(&format_datetime(&Utc::now()))))?;
    writer.write_event(Event::End(BytesEnd::new("updated")))?;
    writer.write_event(Event::Empty(BytesStart::new("id")))?;

    let mut content = BytesStart::new("content");
    content.push_attribute(("type", "application/xml"));
    writer.write_event(Event::Start(content))?;
    writer.write_event(Event::Start(BytesStart::new("m:properties")))?;
    properties(&mut writer)?;
    writer.write_event(Event::End(BytesEnd::new("m:properties")))?;
    writer.write_event(Event::End(BytesEnd::new("content")))?;
    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

fn write_property<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    edm_type: Option<EdmType>,
    text: Option<&str>,
) -> Result<()> {
    let qualified = format!("d:{name}");
    let mut element = BytesStart::new(qualified.as_str());
    if let Some(t) = edm_type {
        element.push_attribute(("m:type", t.as_str()));
    }
    match text {
        Some(text) => {
            writer.write_event(Event::Start(element))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new(qualified.as_str())))?;
        }
        None => {
            element.push_attribute(("m:null", "true"));
            writer.write_event(Event::Empty(element))?;
        }
    }
    Ok(())
}

/// One `<entry>` as read from a response.
#[derive(Debug, Default)]
struct RawEntry {
    etag: Option<String>,
    properties: Vec<RawProperty>,
}

#[derive(Debug)]
struct RawProperty {
    name: String,
    edm_type: Option<String>,
    is_null: bool,
    text: String,
}

/// Reads every `<entry>` of a feed or single-entry document.
fn read_entries<R: BufRead>(reader: &mut Reader<R>) -> Result<Vec<RawEntry>> {
    let mut buf = Vec::new();
    let mut entries = Vec::new();
    loop {
        buf.clear();
        let etag = match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(&e) == b"entry" => attribute(&e, b"etag")?,
            Event::Eof => return Ok(entries),
            _ => continue,
        };
        let mut entry = read_entry(reader, &mut buf)?;
        entry.etag = etag;
        entries.push(entry);
    }
}

enum EntryChild {
    Properties,
    Content,
    Other,
    Done,
    Ignored,
}

fn read_entry<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<RawEntry> {
    let mut entry = RawEntry::default();
    loop {
        buf.clear();
        let child = match reader.read_event_into(buf)? {
            Event::Start(e) => match local_name(&e) {
                b"properties" => EntryChild::Properties,
                b"content" => EntryChild::Content,
                _ => EntryChild::Other,
            },
            Event::End(e) if e.local_name().as_ref() == b"entry" => EntryChild::Done,
            Event::Eof => {
                return Err(SerializationError::malformed(
                    "unexpected end of document inside entry",
                ));
            }
            _ => EntryChild::Ignored,
        };
        match child {
            EntryChild::Properties => entry.properties = read_properties(reader, buf)?,
            EntryChild::Other => skip_element(reader, buf)?,
            EntryChild::Done => return Ok(entry),
            EntryChild::Content | EntryChild::Ignored => {}
        }
    }
}

fn read_properties<R: BufRead>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
) -> Result<Vec<RawProperty>> {
    let mut properties = Vec::new();
    loop {
        buf.clear();
        let (name, edm_type, is_null, empty) = match reader.read_event_into(buf)? {
            Event::Start(e) => (
                String::from_utf8_lossy(local_name(&e)).into_owned(),
                attribute(&e, b"type")?,
                attribute(&e, b"null")?.as_deref() == Some("true"),
                false,
            ),
            Event::Empty(e) => (
                String::from_utf8_lossy(local_name(&e)).into_owned(),
                attribute(&e, b"type")?,
                attribute(&e, b"null")?.as_deref() == Some("true"),
                true,
            ),
            Event::End(_) => return Ok(properties),
            Event::Eof => {
                return Err(SerializationError::malformed(
                    "unexpected end of document inside m:properties",
                ));
            }
            _ => continue,
        };
        let text = if empty { String::new() } else { read_text(reader, buf)? };
        properties.push(RawProperty {
            name,
            edm_type,
            is_null,
            text,
        });
    }
}

fn into_entity(raw: RawEntry) -> TableResult<DynamicEntity> {
    let mut partition_key = String::new();
    let mut row_key = String::new();
    let mut timestamp = None;
    let mut properties = PropertyMap::new();

    for p in raw.properties {
        match p.name.as_str() {
            PARTITION_KEY => partition_key = p.text,
            ROW_KEY => row_key = p.text,
            TIMESTAMP => {
                if !p.is_null {
                    timestamp = Some(parse_datetime(&p.text)?);
                }
            }
            _ => {
                let edm_type = match p.edm_type.as_deref() {
                    None => EdmType::String,
                    Some(t) => EdmType::parse(t).ok_or_else(|| {
                        SerializationError::malformed(format!("unknown m:type '{t}' on {}", p.name))
                    })?,
                };
                let value = if p.is_null {
                    EntityProperty::null(edm_type)
                } else {
                    parse_property_text(edm_type, &p.text)?
                };
                properties.insert(p.name, value);
            }
        }
    }

    let mut entity = DynamicEntity::with_properties(partition_key, row_key, properties)?;
    entity.timestamp = timestamp;
    entity.etag = raw.etag;
    Ok(entity)
}

fn reader_for(body: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(false);
    reader
}

/// Reads every entity in a feed or entry document.
pub(crate) fn read_entities(body: &[u8]) -> TableResult<Vec<DynamicEntity>> {
    read_entries(&mut reader_for(body))?
        .into_iter()
        .map(into_entity)
        .collect()
}

/// Reads the single entity of an entry document.
pub(crate) fn read_entity_body(body: &[u8]) -> TableResult<DynamicEntity> {
    read_entities(body)?
        .into_iter()
        .next()
        .ok_or_else(|| SerializationError::malformed("response contains no entry").into())
}

/// Reads table names from a table feed.
pub(crate) fn read_table_names(body: &[u8]) -> TableResult<Vec<String>> {
    Ok(read_entries(&mut reader_for(body))?
        .into_iter()
        .filter_map(|entry| {
            entry
                .properties
                .into_iter()
                .find(|p| p.name == "TableName")
                .map(|p| p.text)
        })
        .collect())
}
