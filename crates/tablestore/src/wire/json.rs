//! OData JSON entity codec.
//!
//! Requests always carry `@odata.type` annotations for the types JSON cannot
//! express natively (Int64, Binary, Guid, DateTime and Double). Responses
//! carry annotations depending on the negotiated metadata level; when they
//! are absent the type is taken from the property resolver, or inferred
//! from the JSON value.

use serde_json::{Map, Value};

use super::{encode_binary, format_datetime, parse_datetime, parse_property_text};
use crate::config::PropertyResolver;
use crate::entity::{
    DynamicEntity, EdmType, EntityProperty, PARTITION_KEY, PropertyMap, ROW_KEY, TIMESTAMP,
};
use crate::error::{RequestError, SerializationError, TableError, TableResult};

const TYPE_ANNOTATION_SUFFIX: &str = "@odata.type";
const ODATA_PREFIX: &str = "odata.";
const ODATA_ETAG: &str = "odata.etag";

/// Writes an entity body.
///
/// Null-valued properties are omitted.
pub(crate) fn write_entity(
    partition_key: &str,
    row_key: &str,
    properties: &PropertyMap,
) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(PARTITION_KEY.to_string(), Value::String(partition_key.to_string()));
    map.insert(ROW_KEY.to_string(), Value::String(row_key.to_string()));

    for (name, property) in properties {
        let (value, annotate) = match property {
            EntityProperty::String(Some(s)) => (Value::String(s.clone()), false),
            EntityProperty::Binary(Some(b)) => (Value::String(encode_binary(b)), true),
            EntityProperty::Boolean(Some(b)) => (Value::Bool(*b), false),
            EntityProperty::Int32(Some(i)) => (Value::from(*i), false),
            EntityProperty::Int64(Some(i)) => (Value::String(i.to_string()), true),
            EntityProperty::Double(Some(d)) => match serde_json::Number::from_f64(*d) {
                Some(n) => (Value::Number(n), true),
                None => (Value::String(super::format_double(*d)), true),
            },
            EntityProperty::Guid(Some(g)) => (Value::String(g.hyphenated().to_string()), true),
            EntityProperty::DateTime(Some(dt)) => (Value::String(format_datetime(dt)), true),
            _ => continue,
        };
        if annotate {
            map.insert(
                format!("{name}{TYPE_ANNOTATION_SUFFIX}"),
                Value::String(property.edm_type().as_str().to_string()),
            );
        }
        map.insert(name.clone(), value);
    }
    map
}

/// Writes the body of a create-table request.
pub(crate) fn write_table(name: &str) -> Value {
    let mut map = Map::new();
    map.insert("TableName".to_string(), Value::String(name.to_string()));
    Value::Object(map)
}

/// Reads a single entity object.
pub(crate) fn read_entity(
    value: &Value,
    resolver: Option<&PropertyResolver>,
) -> TableResult<DynamicEntity> {
    let object = value
        .as_object()
        .ok_or_else(|| SerializationError::malformed("entity payload is not a JSON object"))?;

    let partition_key = string_field(object, PARTITION_KEY)?.unwrap_or_default();
    let row_key = string_field(object, ROW_KEY)?.unwrap_or_default();
    let timestamp = string_field(object, TIMESTAMP)?
        .map(|s| parse_datetime(&s))
        .transpose()?;
    let etag = string_field(object, ODATA_ETAG)?;

    let mut properties = PropertyMap::new();
    for (name, raw) in object {
        if name.starts_with(ODATA_PREFIX)
            || name.contains('@')
            || matches!(name.as_str(), PARTITION_KEY | ROW_KEY | TIMESTAMP)
        {
            continue;
        }

        let annotated = match object.get(&format!("{name}{TYPE_ANNOTATION_SUFFIX}")) {
            Some(Value::String(t)) => Some(EdmType::parse(t).ok_or_else(|| {
                SerializationError::malformed(format!("unknown type annotation '{t}' on {name}"))
            })?),
            _ => None,
        };

        let declared = match (annotated, resolver) {
            (Some(t), _) => Some(t),
            (None, Some(resolver)) => resolver
                .resolve(&partition_key, &row_key, name, raw)
                .map_err(|source| TableError::Request(RequestError::Resolver { source }))?,
            (None, None) => None,
        };

        properties.insert(name.clone(), read_property(name, raw, declared)?);
    }

    let mut entity = DynamicEntity::with_properties(partition_key, row_key, properties)?;
    entity.timestamp = timestamp;
    entity.etag = etag;
    Ok(entity)
}

/// Reads the `value` array of a query response.
pub(crate) fn read_entities(
    body: &[u8],
    resolver: Option<&PropertyResolver>,
) -> TableResult<Vec<DynamicEntity>> {
    let value: Value = serde_json::from_slice(body)?;
    value_array(&value)?
        .iter()
        .map(|v| read_entity(v, resolver))
        .collect()
}

/// Reads one entity from a response body.
pub(crate) fn read_entity_body(
    body: &[u8],
    resolver: Option<&PropertyResolver>,
) -> TableResult<DynamicEntity> {
    let value: Value = serde_json::from_slice(body)?;
    read_entity(&value, resolver)
}

/// Reads table names from a table listing response.
pub(crate) fn read_table_names(body: &[u8]) -> TableResult<Vec<String>> {
    let value: Value = serde_json::from_slice(body)?;
    value_array(&value)?
        .iter()
        .map(|v| {
            v.get("TableName")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    SerializationError::malformed("table entry without TableName").into()
                })
        })
        .collect()
}

fn value_array(value: &Value) -> Result<&Vec<Value>, SerializationError> {
    value
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| SerializationError::malformed("response has no 'value' array"))
}

fn string_field(
    object: &Map<String, Value>,
    name: &str,
) -> Result<Option<String>, SerializationError> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SerializationError::malformed(format!(
            "expected a string for {name}, found {other}"
        ))),
    }
}

fn read_property(
    name: &str,
    raw: &Value,
    declared: Option<EdmType>,
) -> Result<EntityProperty, SerializationError> {
    let mismatch = |t: EdmType| {
        SerializationError::malformed(format!("property {name}: cannot read {raw} as {t}"))
    };

    match (declared, raw) {
        (Some(t), Value::Null) => Ok(EntityProperty::null(t)),
        (None, Value::Null) => Ok(EntityProperty::String(None)),

        (Some(EdmType::Boolean), Value::Bool(b)) | (None, Value::Bool(b)) => {
            Ok(EntityProperty::Boolean(Some(*b)))
        }
        (Some(EdmType::String), Value::Bool(b)) => Ok(EntityProperty::String(Some(b.to_string()))),

        (Some(t), Value::String(s)) => parse_property_text(t, s),
        (None, Value::String(s)) => Ok(EntityProperty::String(Some(s.clone()))),

        (Some(EdmType::Int32), Value::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(|i| EntityProperty::Int32(Some(i)))
            .ok_or_else(|| mismatch(EdmType::Int32)),
        (Some(EdmType::Int64), Value::Number(n)) => n
            .as_i64()
            .map(|i| EntityProperty::Int64(Some(i)))
            .ok_or_else(|| mismatch(EdmType::Int64)),
        (Some(EdmType::Double), Value::Number(n)) => n
            .as_f64()
            .map(|d| EntityProperty::Double(Some(d)))
            .ok_or_else(|| mismatch(EdmType::Double)),
        (Some(EdmType::String), Value::Number(n)) => {
            Ok(EntityProperty::String(Some(n.to_string())))
        }
        (None, Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(match i32::try_from(i) {
                    Ok(small) => EntityProperty::Int32(Some(small)),
                    Err(_) => EntityProperty::Int64(Some(i)),
                })
            } else {
                n.as_f64()
                    .map(|d| EntityProperty::Double(Some(d)))
                    .ok_or_else(|| mismatch(EdmType::Double))
            }
        }

        (Some(t), _) => Err(mismatch(t)),
        (None, _) => Err(SerializationError::malformed(format!(
            "property {name} has an unsupported JSON value {raw}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn sample_properties() -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("Str".to_string(), "hello".into());
        props.insert("Bin".to_string(), vec![1u8, 2, 3].into());
        props.insert("Bool".to_string(), true.into());
        props.insert("I32".to_string(), 7i32.into());
        props.insert("I64".to_string(), (1i64 << 40).into());
        props.insert("Dbl".to_string(), 1.5f64.into());
        props.insert("Guid".to_string(), Uuid::nil().into());
        props.insert(
            "Date".to_string(),
            Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap().into(),
        );
        props
    }

    #[test]
    fn test_write_annotates_non_native_types() {
        let body = write_entity("p", "r", &sample_properties());
        assert_eq!(body["PartitionKey"], "p");
        assert_eq!(body["I64"], "1099511627776");
        assert_eq!(body["I64@odata.type"], "Edm.Int64");
        assert_eq!(body["Bin"], "AQID");
        assert_eq!(body["Bin@odata.type"], "Edm.Binary");
        assert_eq!(body["Date"], "2020-01-02T03:04:05.0000000Z");
        assert!(!body.contains_key("Str@odata.type"));
        assert!(!body.contains_key("I32@odata.type"));
    }

    #[test]
    fn test_write_omits_nulls_and_encodes_non_finite_doubles() {
        let mut props = PropertyMap::new();
        props.insert("Missing".to_string(), EntityProperty::Int64(None));
        props.insert("Inf".to_string(), f64::INFINITY.into());
        let body = write_entity("p", "r", &props);
        assert!(!body.contains_key("Missing"));
        assert_eq!(body["Inf"], "Infinity");
        assert_eq!(body["Inf@odata.type"], "Edm.Double");
    }

    #[test]
    fn test_annotated_round_trip() {
        let props = sample_properties();
        let mut body = write_entity("p", "r", &props);
        body.insert("odata.etag".to_string(), json!("W/\"datetime'1'\""));
        body.insert("Timestamp".to_string(), json!("2020-01-02T03:04:05.1234567Z"));

        let entity = read_entity(&Value::Object(body), None).unwrap();
        assert_eq!(entity.partition_key, "p");
        assert_eq!(entity.etag.as_deref(), Some("W/\"datetime'1'\""));
        assert!(entity.timestamp.is_some());
        assert_eq!(entity.properties(), &props);
    }

    #[test]
    fn test_no_metadata_inference() {
        let body = json!({
            "PartitionKey": "p",
            "RowKey": "r",
            "Small": 5,
            "Large": 5_000_000_000i64,
            "Frac": 0.25,
            "Id": "00000000-0000-0000-0000-000000000000",
            "Nothing": null
        });
        let entity = read_entity(&body, None).unwrap();
        assert_eq!(entity.get("Small"), Some(&EntityProperty::Int32(Some(5))));
        assert_eq!(entity.get("Large"), Some(&EntityProperty::Int64(Some(5_000_000_000))));
        assert_eq!(entity.get("Frac"), Some(&EntityProperty::Double(Some(0.25))));
        assert!(matches!(entity.get("Id"), Some(EntityProperty::String(Some(_)))));
        assert_eq!(entity.get("Nothing"), Some(&EntityProperty::String(None)));
    }

    #[test]
    fn test_resolver_types_no_metadata_values() {
        let resolver = PropertyResolver::new(|_, _, name, _| {
            Ok(match name {
                "Id" => Some(EdmType::Guid),
                "Count" => Some(EdmType::Int64),
                _ => None,
            })
        });
        let body = json!({
            "PartitionKey": "p",
            "RowKey": "r",
            "Id": "00000000-0000-0000-0000-000000000000",
            "Count": "12",
            "Name": "x"
        });
        let entity = read_entity(&body, Some(&resolver)).unwrap();
        assert_eq!(entity.get("Id"), Some(&EntityProperty::Guid(Some(Uuid::nil()))));
        assert_eq!(entity.get("Count"), Some(&EntityProperty::Int64(Some(12))));
        assert_eq!(entity.get("Name").and_then(|p| p.as_str()), Some("x"));
    }

    #[test]
    fn test_resolver_error_is_wrapped() {
        let resolver = PropertyResolver::new(|_, _, _, _| Err("boom".into()));
        let body = json!({"PartitionKey": "p", "RowKey": "r", "A": 1});
        let err = read_entity(&body, Some(&resolver)).unwrap_err();
        assert!(matches!(err, TableError::Request(RequestError::Resolver { .. })));
    }

    #[test]
    fn test_read_table_names() {
        let body = br#"{"odata.metadata":"x","value":[{"TableName":"a"},{"TableName":"b"}]}"#;
        assert_eq!(read_table_names(body).unwrap(), ["a", "b"]);
    }
}
