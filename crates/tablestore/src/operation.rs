//! Operation descriptors and their results.
//!
//! A [`TableOperation`] describes one intended mutation or retrieval. It
//! performs the cheap checks up front (a concurrency token is present where
//! one is required) and leaves everything else to submission.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::entity::{DynamicEntity, PropertyMap, TableEntity};
use crate::error::{BoxError, RequestError, TableError, TableResult};

/// Kind of a table operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableOperationType {
    Insert,
    Delete,
    Replace,
    Merge,
    InsertOrReplace,
    InsertOrMerge,
    Retrieve,
}

impl TableOperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableOperationType::Insert => "Insert",
            TableOperationType::Delete => "Delete",
            TableOperationType::Replace => "Replace",
            TableOperationType::Merge => "Merge",
            TableOperationType::InsertOrReplace => "InsertOrReplace",
            TableOperationType::InsertOrMerge => "InsertOrMerge",
            TableOperationType::Retrieve => "Retrieve",
        }
    }

    /// Whether the operation carries an `If-Match` concurrency token.
    pub fn requires_etag(&self) -> bool {
        matches!(
            self,
            TableOperationType::Delete | TableOperationType::Replace | TableOperationType::Merge
        )
    }
}

impl fmt::Display for TableOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Projects a returned row into an arbitrary shape.
///
/// Arguments are `(partition_key, row_key, timestamp, properties, etag)`.
pub type EntityResolver<T> = Arc<
    dyn Fn(&str, &str, Option<DateTime<Utc>>, &PropertyMap, Option<&str>) -> Result<T, BoxError>
        + Send
        + Sync,
>;

pub(crate) type ErasedResolver = Arc<
    dyn Fn(
            &str,
            &str,
            Option<DateTime<Utc>>,
            &PropertyMap,
            Option<&str>,
        ) -> Result<Box<dyn Any + Send + Sync>, BoxError>
        + Send
        + Sync,
>;

pub(crate) fn erase_resolver<T: Send + Sync + 'static>(
    resolver: EntityResolver<T>,
) -> ErasedResolver {
    Arc::new(
        move |pk: &str,
              rk: &str,
              ts: Option<DateTime<Utc>>,
              props: &PropertyMap,
              etag: Option<&str>| {
            resolver(pk, rk, ts, props, etag).map(|v| Box::new(v) as Box<dyn Any + Send + Sync>)
        },
    )
}

/// A single operation against a table.
#[derive(Clone)]
pub struct TableOperation {
    kind: TableOperationType,
    entity: Option<DynamicEntity>,
    partition_key: String,
    row_key: String,
    echo_content: bool,
    select_columns: Option<Vec<String>>,
    resolver: Option<ErasedResolver>,
}

impl fmt::Debug for TableOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableOperation")
            .field("kind", &self.kind)
            .field("partition_key", &self.partition_key)
            .field("row_key", &self.row_key)
            .field("entity", &self.entity)
            .field("echo_content", &self.echo_content)
            .field("select_columns", &self.select_columns)
            .field("resolver", &self.resolver.as_ref().map(|_| "custom"))
            .finish()
    }
}

impl TableOperation {
    fn with_entity<T: TableEntity>(kind: TableOperationType, entity: &T) -> Self {
        let entity = DynamicEntity::from_entity(entity);
        Self {
            kind,
            partition_key: entity.partition_key.clone(),
            row_key: entity.row_key.clone(),
            entity: Some(entity),
            echo_content: false,
            select_columns: None,
            resolver: None,
        }
    }

    fn with_required_etag<T: TableEntity>(
        kind: TableOperationType,
        entity: &T,
    ) -> TableResult<Self> {
        if entity.etag().is_none() {
            return Err(TableError::invalid_argument(
                "entity",
                format!("{kind} requires an ETag (which may be the '*' wildcard)."),
            ));
        }
        Ok(Self::with_entity(kind, entity))
    }

    /// Inserts a new entity. The service does not return the entity body.
    pub fn insert<T: TableEntity>(entity: &T) -> Self {
        Self::insert_with_echo(entity, false)
    }

    /// Inserts a new entity, optionally asking the service to echo the
    /// stored entity back in the response.
    pub fn insert_with_echo<T: TableEntity>(entity: &T, echo_content: bool) -> Self {
        let mut op = Self::with_entity(TableOperationType::Insert, entity);
        op.echo_content = echo_content;
        op
    }

    /// Deletes an entity if its ETag matches.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the entity has no ETag.
    pub fn delete<T: TableEntity>(entity: &T) -> TableResult<Self> {
        Self::with_required_etag(TableOperationType::Delete, entity)
    }

    /// Replaces an entity if its ETag matches.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the entity has no ETag.
    pub fn replace<T: TableEntity>(entity: &T) -> TableResult<Self> {
        Self::with_required_etag(TableOperationType::Replace, entity)
    }

    /// Merges properties into an entity if its ETag matches.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the entity has no ETag.
    pub fn merge<T: TableEntity>(entity: &T) -> TableResult<Self> {
        Self::with_required_etag(TableOperationType::Merge, entity)
    }

    /// Inserts the entity or replaces it unconditionally.
    pub fn insert_or_replace<T: TableEntity>(entity: &T) -> Self {
        Self::with_entity(TableOperationType::InsertOrReplace, entity)
    }

    /// Inserts the entity or merges it unconditionally.
    pub fn insert_or_merge<T: TableEntity>(entity: &T) -> Self {
        Self::with_entity(TableOperationType::InsertOrMerge, entity)
    }

    /// Retrieves a single entity by key.
    pub fn retrieve(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            kind: TableOperationType::Retrieve,
            entity: None,
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            echo_content: false,
            select_columns: None,
            resolver: None,
        }
    }

    /// Retrieves a single entity and projects it with `resolver`.
    ///
    /// The projection is available through [`OperationResult::projected`].
    pub fn retrieve_with_resolver<T, F>(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
        resolver: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&str, &str, Option<DateTime<Utc>>, &PropertyMap, Option<&str>) -> Result<T, BoxError>
            + Send
            + Sync
            + 'static,
    {
        let mut op = Self::retrieve(partition_key, row_key);
        op.resolver = Some(erase_resolver(Arc::new(resolver)));
        op
    }

    /// Restricts a retrieve to the given columns.
    pub fn with_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn kind(&self) -> TableOperationType {
        self.kind
    }

    /// The entity payload. `None` for retrieves.
    pub fn entity(&self) -> Option<&DynamicEntity> {
        self.entity.as_ref()
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn row_key(&self) -> &str {
        &self.row_key
    }

    pub fn echo_content(&self) -> bool {
        self.echo_content
    }

    pub fn select_columns(&self) -> Option<&[String]> {
        self.select_columns.as_deref()
    }

    /// Whether the operation may be served by a secondary endpoint.
    pub fn is_read_only(&self) -> bool {
        self.kind == TableOperationType::Retrieve
    }

    pub(crate) fn resolver(&self) -> Option<&ErasedResolver> {
        self.resolver.as_ref()
    }

    pub(crate) fn etag(&self) -> Option<&str> {
        self.entity.as_ref().and_then(|e| e.etag.as_deref())
    }

    /// Same kind and same row.
    pub(crate) fn same_target(&self, other: &TableOperation) -> bool {
        self.kind == other.kind
            && self.partition_key == other.partition_key
            && self.row_key == other.row_key
    }
}

/// What an operation returned.
#[derive(Clone)]
pub enum ResultValue {
    /// The entity read or echoed by the service.
    Entity(DynamicEntity),
    /// The value produced by a retrieve resolver.
    Projected(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Entity(e) => f.debug_tuple("Entity").field(e).finish(),
            ResultValue::Projected(_) => f.write_str("Projected(..)"),
        }
    }
}

/// Outcome of one operation.
///
/// A retrieve that found nothing is a successful result with `value == None`
/// and `etag == None`, not an error.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub http_status_code: u16,
    pub etag: Option<String>,
    pub value: Option<ResultValue>,
}

impl OperationResult {
    pub(crate) fn new(
        http_status_code: u16,
        etag: Option<String>,
        value: Option<ResultValue>,
    ) -> Self {
        Self {
            http_status_code,
            etag,
            value,
        }
    }

    /// The returned entity, if any.
    pub fn entity(&self) -> Option<&DynamicEntity> {
        match &self.value {
            Some(ResultValue::Entity(e)) => Some(e),
            _ => None,
        }
    }

    /// Converts the returned entity into an application type.
    ///
    /// # Errors
    ///
    /// Returns `RequestError::Resolver` if the type's `read_entity` fails.
    pub fn entity_as<T: TableEntity>(&self) -> TableResult<Option<T>> {
        self.entity()
            .cloned()
            .map(|e| {
                e.into_entity::<T>()
                    .map_err(|source| TableError::Request(RequestError::Resolver { source }))
            })
            .transpose()
    }

    /// The value produced by a retrieve resolver, if it has type `T`.
    pub fn projected<T: Send + Sync + 'static>(&self) -> Option<&T> {
        match &self.value {
            Some(ResultValue::Projected(v)) => v.downcast_ref::<T>(),
            _ => None,
        }
    }
}
