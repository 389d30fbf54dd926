//! Entity model.
//!
//! A row is identified by its partition key and row key and carries a bag of
//! named, typed properties. [`DynamicEntity`] is the untyped representation
//! used on the wire; application types implement [`TableEntity`] to convert
//! to and from a [`PropertyMap`].

mod property;

pub use property::{EdmType, EntityProperty};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, TableError, TableResult};

/// Property name to value, ordered by name.
pub type PropertyMap = BTreeMap<String, EntityProperty>;

/// Maximum length of a property name, in characters.
pub const MAX_PROPERTY_NAME_LENGTH: usize = 255;

/// Maximum serialized size of a single entity accepted by the service.
pub const MAX_ENTITY_SIZE: usize = 1024 * 1024;

/// Names that identify system properties and cannot be used as property names.
pub const PARTITION_KEY: &str = "PartitionKey";
pub const ROW_KEY: &str = "RowKey";
pub const TIMESTAMP: &str = "Timestamp";

/// The ETag value that matches any version of an entity.
pub const ETAG_WILDCARD: &str = "*";

/// Conversion between an application type and the table row representation.
///
/// The service identifies rows by `(partition_key, row_key)`. `etag` is the
/// concurrency token last seen for the row; `None` means the entity has not
/// been read from the service.
pub trait TableEntity: Sized + Send + Sync + 'static {
    fn partition_key(&self) -> &str;

    fn row_key(&self) -> &str;

    fn etag(&self) -> Option<&str>;

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Writes the non-key properties.
    fn write_properties(&self) -> PropertyMap;

    /// Builds an instance from a row returned by the service.
    ///
    /// Properties that were not selected or do not exist on the row are
    /// absent from `properties`; implementations should fall back to a
    /// type-appropriate default rather than fail.
    fn read_entity(
        partition_key: String,
        row_key: String,
        timestamp: Option<DateTime<Utc>>,
        properties: PropertyMap,
        etag: Option<String>,
    ) -> Result<Self, BoxError>;
}

/// An untyped entity: keys, system metadata, and a property bag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicEntity {
    pub partition_key: String,
    pub row_key: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    properties: PropertyMap,
}

impl DynamicEntity {
    /// Creates an entity with the given keys and no properties.
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            ..Default::default()
        }
    }

    /// Creates an entity from keys and an existing property map.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if any property name is invalid.
    pub fn with_properties(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
        properties: PropertyMap,
    ) -> TableResult<Self> {
        for name in properties.keys() {
            validate_property_name(name)?;
        }
        Ok(Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            timestamp: None,
            etag: None,
            properties,
        })
    }

    /// Converts any [`TableEntity`] into its dynamic form.
    pub fn from_entity<T: TableEntity>(entity: &T) -> Self {
        Self {
            partition_key: entity.partition_key().to_string(),
            row_key: entity.row_key().to_string(),
            timestamp: entity.timestamp(),
            etag: entity.etag().map(str::to_string),
            properties: entity.write_properties(),
        }
    }

    /// Converts this entity into an application type.
    pub fn into_entity<T: TableEntity>(self) -> Result<T, BoxError> {
        T::read_entity(
            self.partition_key,
            self.row_key,
            self.timestamp,
            self.properties,
            self.etag,
        )
    }

    /// Sets the ETag, returning the entity for chaining.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Sets a property, returning the entity for chaining.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the name is longer than
    /// [`MAX_PROPERTY_NAME_LENGTH`] characters, empty, or a system property name.
    pub fn with(
        mut self,
        name: impl Into<String>,
        value: impl Into<EntityProperty>,
    ) -> TableResult<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Sets a property, returning the previous value.
    ///
    /// # Errors
    ///
    /// See [`DynamicEntity::with`].
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<EntityProperty>,
    ) -> TableResult<Option<EntityProperty>> {
        let name = name.into();
        validate_property_name(&name)?;
        Ok(self.properties.insert(name, value.into()))
    }

    pub fn get(&self, name: &str) -> Option<&EntityProperty> {
        self.properties.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<EntityProperty> {
        self.properties.remove(name)
    }

    /// Returns the named property, or the default for `edm_type` when the
    /// property is absent.
    pub fn property_or_default(&self, name: &str, edm_type: EdmType) -> EntityProperty {
        self.properties
            .get(name)
            .cloned()
            .unwrap_or_else(|| EntityProperty::default_for(edm_type))
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn into_properties(self) -> PropertyMap {
        self.properties
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl TableEntity for DynamicEntity {
    fn partition_key(&self) -> &str {
        &self.partition_key
    }

    fn row_key(&self) -> &str {
        &self.row_key
    }

    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    fn write_properties(&self) -> PropertyMap {
        self.properties.clone()
    }

    fn read_entity(
        partition_key: String,
        row_key: String,
        timestamp: Option<DateTime<Utc>>,
        properties: PropertyMap,
        etag: Option<String>,
    ) -> Result<Self, BoxError> {
        Ok(Self {
            partition_key,
            row_key,
            timestamp,
            etag,
            properties,
        })
    }
}

/// The key of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub partition_key: String,
    pub row_key: String,
}

impl EntityKey {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }
}

pub(crate) fn validate_property_name(name: &str) -> TableResult<()> {
    if name.is_empty() {
        return Err(TableError::invalid_argument(
            "name",
            "Property name must not be empty.",
        ));
    }
    if name.chars().count() > MAX_PROPERTY_NAME_LENGTH {
        return Err(TableError::invalid_argument(
            "name",
            format!(
                "The property name exceeds the maximum allowed length ({MAX_PROPERTY_NAME_LENGTH})."
            ),
        ));
    }
    if matches!(name, PARTITION_KEY | ROW_KEY | TIMESTAMP) {
        return Err(TableError::invalid_argument(
            "name",
            format!("'{name}' is a system property and cannot be set as a property."),
        ));
    }
    Ok(())
}
