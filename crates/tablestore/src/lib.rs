//! Helios Table Storage Client
//!
//! A client for key/attribute table services that speak the Azure Table
//! REST protocol. Rows are identified by a partition key and a row key and
//! carry a bag of typed properties.
//!
//! # Features
//!
//! - **Entities**: untyped [`DynamicEntity`] rows or any type implementing
//!   [`TableEntity`]
//! - **Operations**: insert, delete, replace, merge, insert-or-replace,
//!   insert-or-merge and retrieve, with ETag-based optimistic concurrency
//! - **Batches**: up to 100 operations on one partition, applied atomically
//! - **Queries**: filter builder, projection, segmented execution with
//!   continuation tokens and lazy streams
//! - **Payload formats**: JSON in three metadata levels and AtomPub XML
//! - **Resilience**: retry policies, a maximum execution time spanning all
//!   retries, cancellation and primary/secondary location routing
//!
//! # Architecture
//!
//! - [`entity`] - entity model and property values
//! - [`operation`] - operation descriptors and results
//! - [`batch`] - batch builder
//! - [`query`] - queries, filter builder and segments
//! - [`continuation`] - continuation tokens
//! - [`engine`] - transport seam, retry policies, operation context
//! - [`client`] - async entry points
//! - [`blocking`] - blocking entry points over the same engine
//! - [`config`] - client configuration and per-request options
//! - [`error`] - error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use helios_tablestore::{DynamicEntity, TableBatch, TableOperation};
//!
//! let first = DynamicEntity::new("customer-1", "order-1").with("Total", 12.5).unwrap();
//! let second = DynamicEntity::new("customer-1", "order-2").with("Total", 3.0).unwrap();
//!
//! let mut batch = TableBatch::new();
//! batch.insert(&first).unwrap();
//! batch.insert(&second).unwrap();
//! assert_eq!(batch.partition_key(), Some("customer-1"));
//!
//! // Operations on another partition are refused.
//! let other = DynamicEntity::new("customer-2", "order-1");
//! assert!(batch.add(TableOperation::insert(&other)).is_err());
//! ```
//!
//! # Filters
//!
//! ```
//! use helios_tablestore::query::{QueryComparison, TableOperator, combine_filters,
//!     generate_filter_condition, generate_filter_condition_for_double};
//!
//! let filter = combine_filters(
//!     &generate_filter_condition("PartitionKey", QueryComparison::Equal, "customer-1"),
//!     TableOperator::And,
//!     &generate_filter_condition_for_double("Total", QueryComparison::GreaterThan, 10.0),
//! );
//! assert_eq!(filter, "(PartitionKey eq 'customer-1') and (Total gt 10.0)");
//! ```

pub mod batch;
pub mod blocking;
pub mod client;
pub mod config;
pub mod continuation;
pub mod engine;
pub mod entity;
pub mod error;
pub mod operation;
pub mod query;
pub(crate) mod wire;

// Re-export commonly used types at crate root
pub use batch::TableBatch;
pub use client::{TableClient, TableServiceClient};
pub use config::{
    Credentials, LocationMode, PayloadFormat, PropertyResolver, RetryConfig, RetryKind,
    TableClientConfig, TableRequestOptions,
};
pub use continuation::{ContinuationToken, StorageLocation};
pub use engine::{OperationContext, RequestResult};
pub use entity::{DynamicEntity, EdmType, EntityProperty, PropertyMap, TableEntity};
pub use error::{
    ExtendedErrorInformation, RequestError, SerializationError, TableError, TableResult,
    ValidationError,
};
pub use operation::{
    EntityResolver, OperationResult, ResultValue, TableOperation, TableOperationType,
};
pub use query::{TableQuery, TableQuerySegment};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
