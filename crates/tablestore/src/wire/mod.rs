//! Payload codecs.
//!
//! - [`json`] - OData JSON entities in the three metadata levels
//! - [`atom`] - AtomPub XML entries and feeds
//! - [`batch`] - `multipart/mixed` batch requests and responses
//! - [`error`] - extended error information in JSON and XML bodies
//!
//! The scalar text forms below are shared by every codec.

pub(crate) mod atom;
pub(crate) mod batch;
pub(crate) mod error;
pub(crate) mod json;
pub(crate) mod xml;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::entity::{EdmType, EntityProperty};
use crate::error::SerializationError;

/// Formats a timestamp with the service's 7 fractional digits.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    let ticks = dt.timestamp_subsec_nanos().min(999_999_999) / 100;
    format!("{}.{ticks:07}Z", dt.format("%Y-%m-%dT%H:%M:%S"))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SerializationError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| SerializationError::malformed(format!("invalid DateTime '{s}': {e}")))
}

/// Formats a double so that it always reads back as a double.
pub(crate) fn format_double(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        let s = v.to_string();
        if s.contains(['.', 'e', 'E']) {
            s
        } else {
            format!("{s}.0")
        }
    }
}

pub(crate) fn parse_double(s: &str) -> Result<f64, SerializationError> {
    match s.trim() {
        "NaN" => Ok(f64::NAN),
        "Infinity" | "INF" => Ok(f64::INFINITY),
        "-Infinity" | "-INF" => Ok(f64::NEG_INFINITY),
        other => other
            .parse::<f64>()
            .map_err(|e| SerializationError::malformed(format!("invalid Double '{other}': {e}"))),
    }
}

pub(crate) fn encode_binary(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn decode_binary(s: &str) -> Result<Vec<u8>, SerializationError> {
    STANDARD
        .decode(s.trim())
        .map_err(|e| SerializationError::malformed(format!("invalid Binary value: {e}")))
}

/// Text form of a non-null value, as used by AtomPub and string-encoded JSON.
pub(crate) fn property_text(property: &EntityProperty) -> Option<String> {
    match property {
        EntityProperty::String(v) => v.clone(),
        EntityProperty::Binary(v) => v.as_deref().map(encode_binary),
        EntityProperty::Boolean(v) => v.map(|b| b.to_string()),
        EntityProperty::Int32(v) => v.map(|i| i.to_string()),
        EntityProperty::Int64(v) => v.map(|i| i.to_string()),
        EntityProperty::Double(v) => v.map(format_double),
        EntityProperty::Guid(v) => v.map(|g| g.hyphenated().to_string()),
        EntityProperty::DateTime(v) => v.as_ref().map(format_datetime),
    }
}

/// Parses the text form of a value of the given type.
pub(crate) fn parse_property_text(
    edm_type: EdmType,
    text: &str,
) -> Result<EntityProperty, SerializationError> {
    let invalid = |e: String| {
        SerializationError::malformed(format!("invalid {edm_type} value '{text}': {e}"))
    };
    Ok(match edm_type {
        EdmType::String => EntityProperty::String(Some(text.to_string())),
        EdmType::Binary => EntityProperty::Binary(Some(decode_binary(text)?)),
        EdmType::Boolean => match text.trim() {
            "true" | "True" | "1" => EntityProperty::Boolean(Some(true)),
            "false" | "False" | "0" => EntityProperty::Boolean(Some(false)),
            _ => return Err(invalid("expected true or false".to_string())),
        },
        EdmType::Int32 => {
            let value = text
                .trim()
                .parse::<i32>()
                .map_err(|e| invalid(e.to_string()))?;
            EntityProperty::Int32(Some(value))
        }
        EdmType::Int64 => {
            let value = text
                .trim()
                .parse::<i64>()
                .map_err(|e| invalid(e.to_string()))?;
            EntityProperty::Int64(Some(value))
        }
        EdmType::Double => EntityProperty::Double(Some(parse_double(text)?)),
        EdmType::Guid => {
            let value = Uuid::parse_str(text.trim()).map_err(|e| invalid(e.to_string()))?;
            EntityProperty::Guid(Some(value))
        }
        EdmType::DateTime => EntityProperty::DateTime(Some(parse_datetime(text)?)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_datetime_has_seven_fractional_digits() {
        let dt = Utc.with_ymd_and_hms(2013, 8, 22, 1, 12, 6).unwrap()
            + chrono::Duration::nanoseconds(260_859_500);
        assert_eq!(format_datetime(&dt), "2013-08-22T01:12:06.2608595Z");
        assert_eq!(parse_datetime("2013-08-22T01:12:06.2608595Z").unwrap(), dt);
        assert_eq!(
            parse_datetime("2013-08-22T01:12:06").unwrap(),
            Utc.with_ymd_and_hms(2013, 8, 22, 1, 12, 6).unwrap()
        );
    }

    #[test]
    fn test_double_text() {
        assert_eq!(format_double(1.0), "1.0");
        assert_eq!(format_double(0.5), "0.5");
        assert_eq!(format_double(f64::NEG_INFINITY), "-Infinity");
        assert!(parse_double("NaN").unwrap().is_nan());
        assert_eq!(parse_double("1e3").unwrap(), 1000.0);
    }

    #[test]
    fn test_property_text_round_trip_for_each_type() {
        let guid = Uuid::new_v4();
        for property in [
            EntityProperty::from("a & b"),
            EntityProperty::from(vec![0u8, 255, 7]),
            EntityProperty::from(true),
            EntityProperty::from(-5i32),
            EntityProperty::from(i64::MAX),
            EntityProperty::from(2.25f64),
            EntityProperty::from(guid),
        ] {
            let text = property_text(&property).unwrap();
            assert_eq!(parse_property_text(property.edm_type(), &text).unwrap(), property);
        }
        assert_eq!(property_text(&EntityProperty::Int32(None)), None);
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(parse_property_text(EdmType::Int32, "12x").is_err());
        assert!(parse_property_text(EdmType::Guid, "not-a-guid").is_err());
        assert!(parse_property_text(EdmType::Boolean, "yes").is_err());
    }

    #[test]
    fn test_parse_integer_text_keeps_declared_width() {
        assert_eq!(
            parse_property_text(EdmType::Int32, " -42 ").unwrap(),
            EntityProperty::Int32(Some(-42))
        );
        assert_eq!(
            parse_property_text(EdmType::Int64, "9223372036854775807").unwrap(),
            EntityProperty::Int64(Some(i64::MAX))
        );
        assert!(parse_property_text(EdmType::Int32, "2147483648").is_err());
        assert!(parse_property_text(EdmType::Int64, "9223372036854775808").is_err());
    }
}
