//! Typed property values.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The declared scalar type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdmType {
    /// `Edm.String`
    String,
    /// `Edm.Binary`
    Binary,
    /// `Edm.Boolean`
    Boolean,
    /// `Edm.Int32`
    Int32,
    /// `Edm.Int64`
    Int64,
    /// `Edm.Double`
    Double,
    /// `Edm.Guid`
    Guid,
    /// `Edm.DateTime`
    DateTime,
}

impl EdmType {
    /// Returns the OData type name, e.g. `Edm.Int64`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdmType::String => "Edm.String",
            EdmType::Binary => "Edm.Binary",
            EdmType::Boolean => "Edm.Boolean",
            EdmType::Int32 => "Edm.Int32",
            EdmType::Int64 => "Edm.Int64",
            EdmType::Double => "Edm.Double",
            EdmType::Guid => "Edm.Guid",
            EdmType::DateTime => "Edm.DateTime",
        }
    }

    /// Parses an OData type name. Returns `None` for unknown types.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Edm.String" => Some(EdmType::String),
            "Edm.Binary" => Some(EdmType::Binary),
            "Edm.Boolean" => Some(EdmType::Boolean),
            "Edm.Int32" => Some(EdmType::Int32),
            "Edm.Int64" => Some(EdmType::Int64),
            "Edm.Double" => Some(EdmType::Double),
            "Edm.Guid" => Some(EdmType::Guid),
            "Edm.DateTime" => Some(EdmType::DateTime),
            _ => None,
        }
    }
}

impl fmt::Display for EdmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, nullable property value.
///
/// Equality and hashing are content based: two binary values holding the
/// same bytes are equal and hash the same, and a value never equals a value
/// of another declared type (so `Int32(None) != Int64(None)`). Doubles
/// compare by bit pattern, which makes `NaN` equal to itself.
#[derive(Debug, Clone)]
pub enum EntityProperty {
    String(Option<String>),
    Binary(Option<Vec<u8>>),
    Boolean(Option<bool>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    Double(Option<f64>),
    Guid(Option<Uuid>),
    DateTime(Option<DateTime<Utc>>),
}

impl EntityProperty {
    /// A null value of the given declared type.
    pub fn null(edm_type: EdmType) -> Self {
        match edm_type {
            EdmType::String => EntityProperty::String(None),
            EdmType::Binary => EntityProperty::Binary(None),
            EdmType::Boolean => EntityProperty::Boolean(None),
            EdmType::Int32 => EntityProperty::Int32(None),
            EdmType::Int64 => EntityProperty::Int64(None),
            EdmType::Double => EntityProperty::Double(None),
            EdmType::Guid => EntityProperty::Guid(None),
            EdmType::DateTime => EntityProperty::DateTime(None),
        }
    }

    /// The type-appropriate default for a property that was not returned.
    ///
    /// Strings and binaries default to null, scalars to their zero value.
    pub fn default_for(edm_type: EdmType) -> Self {
        match edm_type {
            EdmType::String => EntityProperty::String(None),
            EdmType::Binary => EntityProperty::Binary(None),
            EdmType::Boolean => EntityProperty::Boolean(Some(false)),
            EdmType::Int32 => EntityProperty::Int32(Some(0)),
            EdmType::Int64 => EntityProperty::Int64(Some(0)),
            EdmType::Double => EntityProperty::Double(Some(0.0)),
            EdmType::Guid => EntityProperty::Guid(Some(Uuid::nil())),
            EdmType::DateTime => EntityProperty::DateTime(Some(DateTime::<Utc>::UNIX_EPOCH)),
        }
    }

    /// The declared type of this value.
    pub fn edm_type(&self) -> EdmType {
        match self {
            EntityProperty::String(_) => EdmType::String,
            EntityProperty::Binary(_) => EdmType::Binary,
            EntityProperty::Boolean(_) => EdmType::Boolean,
            EntityProperty::Int32(_) => EdmType::Int32,
            EntityProperty::Int64(_) => EdmType::Int64,
            EntityProperty::Double(_) => EdmType::Double,
            EntityProperty::Guid(_) => EdmType::Guid,
            EntityProperty::DateTime(_) => EdmType::DateTime,
        }
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        match self {
            EntityProperty::String(v) => v.is_none(),
            EntityProperty::Binary(v) => v.is_none(),
            EntityProperty::Boolean(v) => v.is_none(),
            EntityProperty::Int32(v) => v.is_none(),
            EntityProperty::Int64(v) => v.is_none(),
            EntityProperty::Double(v) => v.is_none(),
            EntityProperty::Guid(v) => v.is_none(),
            EntityProperty::DateTime(v) => v.is_none(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EntityProperty::String(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            EntityProperty::Binary(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EntityProperty::Boolean(v) => *v,
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            EntityProperty::Int32(v) => *v,
            _ => None,
        }
    }

    /// Returns the value as an `i64`, widening `Int32` values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EntityProperty::Int64(v) => *v,
            EntityProperty::Int32(v) => v.map(i64::from),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EntityProperty::Double(v) => *v,
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            EntityProperty::Guid(v) => *v,
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            EntityProperty::DateTime(v) => *v,
            _ => None,
        }
    }
}

impl PartialEq for EntityProperty {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EntityProperty::String(a), EntityProperty::String(b)) => a == b,
            (EntityProperty::Binary(a), EntityProperty::Binary(b)) => a == b,
            (EntityProperty::Boolean(a), EntityProperty::Boolean(b)) => a == b,
            (EntityProperty::Int32(a), EntityProperty::Int32(b)) => a == b,
            (EntityProperty::Int64(a), EntityProperty::Int64(b)) => a == b,
            (EntityProperty::Double(a), EntityProperty::Double(b)) => {
                a.map(f64::to_bits) == b.map(f64::to_bits)
            }
            (EntityProperty::Guid(a), EntityProperty::Guid(b)) => a == b,
            (EntityProperty::DateTime(a), EntityProperty::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for EntityProperty {}

impl Hash for EntityProperty {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.edm_type().hash(state);
        match self {
            EntityProperty::String(v) => v.hash(state),
            EntityProperty::Binary(v) => v.hash(state),
            EntityProperty::Boolean(v) => v.hash(state),
            EntityProperty::Int32(v) => v.hash(state),
            EntityProperty::Int64(v) => v.hash(state),
            EntityProperty::Double(v) => v.map(f64::to_bits).hash(state),
            EntityProperty::Guid(v) => v.hash(state),
            EntityProperty::DateTime(v) => v.hash(state),
        }
    }
}

impl From<String> for EntityProperty {
    fn from(v: String) -> Self {
        EntityProperty::String(Some(v))
    }
}

impl From<&str> for EntityProperty {
    fn from(v: &str) -> Self {
        EntityProperty::String(Some(v.to_string()))
    }
}

impl From<Vec<u8>> for EntityProperty {
    fn from(v: Vec<u8>) -> Self {
        EntityProperty::Binary(Some(v))
    }
}

impl From<&[u8]> for EntityProperty {
    fn from(v: &[u8]) -> Self {
        EntityProperty::Binary(Some(v.to_vec()))
    }
}

impl From<bool> for EntityProperty {
    fn from(v: bool) -> Self {
        EntityProperty::Boolean(Some(v))
    }
}

impl From<i32> for EntityProperty {
    fn from(v: i32) -> Self {
        EntityProperty::Int32(Some(v))
    }
}

impl From<i64> for EntityProperty {
    fn from(v: i64) -> Self {
        EntityProperty::Int64(Some(v))
    }
}

impl From<f64> for EntityProperty {
    fn from(v: f64) -> Self {
        EntityProperty::Double(Some(v))
    }
}

impl From<Uuid> for EntityProperty {
    fn from(v: Uuid) -> Self {
        EntityProperty::Guid(Some(v))
    }
}

impl From<DateTime<Utc>> for EntityProperty {
    fn from(v: DateTime<Utc>) -> Self {
        EntityProperty::DateTime(Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(p: &EntityProperty) -> u64 {
        let mut h = DefaultHasher::new();
        p.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_binary_equality_is_content_based() {
        let a = EntityProperty::from(vec![1u8, 2, 3]);
        let b = EntityProperty::from(vec![1u8, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = EntityProperty::from(vec![1u8, 2, 4]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_declared_type_participates_in_equality() {
        assert_ne!(EntityProperty::Int32(None), EntityProperty::Int64(None));
        assert_ne!(EntityProperty::from(1i32), EntityProperty::from(1i64));
        assert_eq!(
            EntityProperty::null(EdmType::Guid),
            EntityProperty::Guid(None)
        );
    }

    #[test]
    fn test_double_nan_equals_itself() {
        let a = EntityProperty::from(f64::NAN);
        assert_eq!(a, a.clone());
        assert_eq!(hash_of(&a), hash_of(&a.clone()));
    }

    #[test]
    fn test_edm_type_names() {
        for t in [
            EdmType::String,
            EdmType::Binary,
            EdmType::Boolean,
            EdmType::Int32,
            EdmType::Int64,
            EdmType::Double,
            EdmType::Guid,
            EdmType::DateTime,
        ] {
            assert_eq!(EdmType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EdmType::parse("Edm.Decimal"), None);
    }

    #[test]
    fn test_accessors() {
        assert_eq!(EntityProperty::from("x").as_str(), Some("x"));
        assert_eq!(EntityProperty::from(7i32).as_i64(), Some(7));
        assert_eq!(EntityProperty::from(7i32).as_f64(), None);
        assert!(EntityProperty::Boolean(None).is_null());
        assert_eq!(
            EntityProperty::default_for(EdmType::Int64),
            EntityProperty::Int64(Some(0))
        );
    }
}
