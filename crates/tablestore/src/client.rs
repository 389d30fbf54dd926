//! Public entry points.
//!
//! [`TableServiceClient`] is scoped to an account and owns the executor,
//! the transport and the buffer pool. [`TableClient`] is a cheap handle on
//! one table that shares them.
//!
//! # Example
//!
//! ```no_run
//! use helios_tablestore::{DynamicEntity, TableClientConfig, TableOperation, TableServiceClient};
//!
//! # async fn run() -> helios_tablestore::TableResult<()> {
//! let config = TableClientConfig::new("http://127.0.0.1:10002/devstoreaccount1");
//! let client = TableServiceClient::new(config)?;
//! let table = client.table("orders");
//! table.create_if_not_exists(None).await?;
//!
//! let order = DynamicEntity::new("customer-1", "order-1").with("Total", 12.5)?;
//! let result = table.execute(&TableOperation::insert(&order), None).await?;
//! println!("stored with etag {:?}", result.etag);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tracing::info;

use crate::batch::TableBatch;
use crate::config::{MAX_RESULTS_PER_SEGMENT, TableClientConfig, TableRequestOptions};
use crate::continuation::ContinuationToken;
use crate::engine::commands::{
    BatchCommand, CreateTableCommand, DeleteTableCommand, ListTablesCommand, OperationCommand,
    QueryCommand, RestCommand, TableExistsCommand,
};
use crate::engine::context::OperationContext;
use crate::engine::executor::Executor;
use crate::engine::pool::BufferPool;
use crate::engine::retry::RetryPolicy;
use crate::engine::transport::{HttpTransport, TableTransport, TransportError};
use crate::entity::{DynamicEntity, TableEntity};
use crate::error::{RequestError, TableError, TableResult, error_codes};
use crate::operation::{EntityResolver, OperationResult, TableOperation};
use crate::query::{TableQuery, TableQuerySegment, paged};

/// Maximum length of a table name.
pub const MAX_TABLE_NAME_LENGTH: usize = 63;

/// Client for the tables of one storage account.
#[derive(Clone)]
pub struct TableServiceClient {
    executor: Arc<Executor>,
    config: Arc<TableClientConfig>,
    default_retry: Arc<dyn RetryPolicy>,
}

impl std::fmt::Debug for TableServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableServiceClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TableServiceClient {
    /// Creates a client sending requests over HTTP.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the configuration is invalid, or a
    /// transport error when the HTTP client cannot be built.
    pub fn new(config: TableClientConfig) -> TableResult<Self> {
        let transport = HttpTransport::new().map_err(transport_error)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(
        config: TableClientConfig,
        transport: Arc<dyn TableTransport>,
    ) -> TableResult<Self> {
        config.validate()?;
        let default_retry = config.retry.build_policy();
        let config = Arc::new(config);
        Ok(Self {
            executor: Arc::new(Executor::new(Arc::clone(&config), transport)),
            config,
            default_retry,
        })
    }

    pub fn config(&self) -> &TableClientConfig {
        &self.config
    }

    /// Pool the request bodies are borrowed from.
    pub fn buffer_pool(&self) -> &BufferPool {
        self.executor.pool()
    }

    /// Returns a handle on a table. No request is sent.
    pub fn table(&self, name: impl Into<String>) -> TableClient {
        TableClient {
            service: self.clone(),
            name: name.into(),
        }
    }

    /// Lists one page of table names, optionally restricted to a prefix.
    pub async fn list_tables_segmented(
        &self,
        prefix: Option<&str>,
        token: Option<&ContinuationToken>,
        max_results: Option<u32>,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<TableQuerySegment<String>> {
        if max_results == Some(0) {
            return Err(TableError::invalid_argument(
                "max_results",
                "max_results must be positive and greater than 0.",
            ));
        }
        let command = ListTablesCommand {
            prefix,
            token,
            top: page_size(max_results, self.config.max_results_per_segment),
        };
        let (results, continuation_token) = self.run(&command, options).await?;
        Ok(TableQuerySegment {
            results,
            continuation_token,
        })
    }

    /// Lists every table name, following continuation tokens lazily.
    pub fn list_tables(
        &self,
        prefix: Option<&str>,
        options: Option<&TableRequestOptions>,
    ) -> BoxStream<'static, TableResult<String>> {
        let client = self.clone();
        let prefix = prefix.map(str::to_string);
        let options = options.cloned();
        paged(None, move |token, _remaining| {
            let client = client.clone();
            let prefix = prefix.clone();
            let options = options.clone();
            async move {
                client
                    .list_tables_segmented(
                        prefix.as_deref(),
                        token.as_ref(),
                        None,
                        options.as_ref(),
                    )
                    .await
            }
        })
    }

    /// Runs a command with the effective options of this call.
    pub(crate) async fn run<C: RestCommand>(
        &self,
        command: &C,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<C::Output> {
        let (resolved, context) = match options {
            Some(options) => (
                options.resolve(&self.config, &self.default_retry),
                options.context(),
            ),
            None => (
                TableRequestOptions::default().resolve(&self.config, &self.default_retry),
                OperationContext::new(),
            ),
        };
        self.executor.execute(command, &resolved, &context).await
    }
}

/// Client for a single table.
#[derive(Debug, Clone)]
pub struct TableClient {
    service: TableServiceClient,
    name: String,
}

impl TableClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &TableServiceClient {
        &self.service
    }

    /// Creates the table.
    ///
    /// # Errors
    ///
    /// Fails with status 409 and `TableAlreadyExists` if the table exists.
    pub async fn create(&self, options: Option<&TableRequestOptions>) -> TableResult<()> {
        let name = self.checked_name()?;
        self.service.run(&CreateTableCommand { name }, options).await?;
        info!(table = name, "created table");
        Ok(())
    }

    /// Creates the table unless it exists. Returns whether it was created.
    pub async fn create_if_not_exists(
        &self,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<bool> {
        match self.create(options).await {
            Ok(()) => Ok(true),
            Err(e)
                if e.status_code() == Some(409)
                    && e.error_code() == Some(error_codes::TABLE_ALREADY_EXISTS) =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes the table.
    ///
    /// # Errors
    ///
    /// Fails with status 404 if the table does not exist.
    pub async fn delete(&self, options: Option<&TableRequestOptions>) -> TableResult<()> {
        let name = self.checked_name()?;
        self.service.run(&DeleteTableCommand { name }, options).await?;
        info!(table = name, "deleted table");
        Ok(())
    }

    /// Deletes the table if it exists. Returns whether it was deleted.
    pub async fn delete_if_exists(
        &self,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<bool> {
        match self.delete(options).await {
            Ok(()) => Ok(true),
            Err(e) if e.status_code() == Some(404) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, options: Option<&TableRequestOptions>) -> TableResult<bool> {
        let name = self.checked_name()?;
        self.service.run(&TableExistsCommand { name }, options).await
    }

    /// Executes a single operation.
    ///
    /// A retrieve of a missing row succeeds with no value and no ETag.
    pub async fn execute(
        &self,
        operation: &TableOperation,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<OperationResult> {
        let table = self.checked_name()?;
        self.service
            .run(&OperationCommand { table, operation }, options)
            .await
    }

    /// Executes a batch atomically. Results are in operation order.
    ///
    /// # Errors
    ///
    /// Empty or oversized batches fail with `InvalidOperation` before any
    /// request is sent. A rejected batch fails as a whole, with
    /// [`TableError::operation_index`] naming the offending operation.
    pub async fn execute_batch(
        &self,
        batch: &TableBatch,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<Vec<OperationResult>> {
        batch.validate_for_execution()?;
        let table = self.checked_name()?;
        self.service.run(&BatchCommand { table, batch }, options).await
    }

    /// Runs one segment of a query.
    ///
    /// Pass the token of the previous segment to continue; a segment without
    /// a token is the last one. The take count, when set, bounds the size of
    /// this segment only.
    pub async fn execute_query_segmented(
        &self,
        query: &TableQuery,
        token: Option<&ContinuationToken>,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<TableQuerySegment<DynamicEntity>> {
        let top = page_size(query.take_count(), self.service.config.max_results_per_segment);
        let (results, continuation_token) = self.query_page(query, token, top, options).await?;
        Ok(TableQuerySegment {
            results,
            continuation_token,
        })
    }

    /// Like [`execute_query_segmented`](Self::execute_query_segmented), read
    /// into an application type.
    pub async fn execute_query_segmented_as<T: TableEntity>(
        &self,
        query: &TableQuery,
        token: Option<&ContinuationToken>,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<TableQuerySegment<T>> {
        let segment = self.execute_query_segmented(query, token, options).await?;
        Ok(TableQuerySegment {
            results: segment
                .results
                .into_iter()
                .map(into_typed)
                .collect::<TableResult<_>>()?,
            continuation_token: segment.continuation_token,
        })
    }

    /// Like [`execute_query_segmented`](Self::execute_query_segmented), with
    /// each row projected by `resolver`.
    pub async fn execute_query_segmented_with_resolver<T: Send + 'static>(
        &self,
        query: &TableQuery,
        resolver: EntityResolver<T>,
        token: Option<&ContinuationToken>,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<TableQuerySegment<T>> {
        let segment = self.execute_query_segmented(query, token, options).await?;
        Ok(TableQuerySegment {
            results: segment
                .results
                .into_iter()
                .map(|entity| resolve_with(&resolver, entity))
                .collect::<TableResult<_>>()?,
            continuation_token: segment.continuation_token,
        })
    }

    /// Streams every matching entity, fetching segments as needed.
    ///
    /// The stream stops after the query's take count. Each call starts a
    /// fresh enumeration from the first segment.
    pub fn execute_query(
        &self,
        query: &TableQuery,
        options: Option<&TableRequestOptions>,
    ) -> BoxStream<'static, TableResult<DynamicEntity>> {
        self.query_stream(query, options, Ok)
    }

    pub fn execute_query_as<T: TableEntity>(
        &self,
        query: &TableQuery,
        options: Option<&TableRequestOptions>,
    ) -> BoxStream<'static, TableResult<T>> {
        self.query_stream(query, options, into_typed)
    }

    pub fn execute_query_with_resolver<T: Send + 'static>(
        &self,
        query: &TableQuery,
        resolver: EntityResolver<T>,
        options: Option<&TableRequestOptions>,
    ) -> BoxStream<'static, TableResult<T>> {
        self.query_stream(query, options, move |entity| resolve_with(&resolver, entity))
    }

    /// Executes an operation on a spawned task and hands the result to
    /// `callback`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn begin_execute<F>(
        &self,
        operation: TableOperation,
        options: Option<TableRequestOptions>,
        callback: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(TableResult<OperationResult>) + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            let result = client.execute(&operation, options.as_ref()).await;
            callback(result);
        })
    }

    /// Batch counterpart of [`begin_execute`](Self::begin_execute).
    pub fn begin_execute_batch<F>(
        &self,
        batch: TableBatch,
        options: Option<TableRequestOptions>,
        callback: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(TableResult<Vec<OperationResult>>) + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            let result = client.execute_batch(&batch, options.as_ref()).await;
            callback(result);
        })
    }

    async fn query_page(
        &self,
        query: &TableQuery,
        token: Option<&ContinuationToken>,
        top: Option<u32>,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<(Vec<DynamicEntity>, Option<ContinuationToken>)> {
        let table = self.checked_name()?;
        let command = QueryCommand {
            table,
            query,
            token,
            top,
        };
        self.service.run(&command, options).await
    }

    fn query_stream<T, M>(
        &self,
        query: &TableQuery,
        options: Option<&TableRequestOptions>,
        map: M,
    ) -> BoxStream<'static, TableResult<T>>
    where
        T: Send + 'static,
        M: Fn(DynamicEntity) -> TableResult<T> + Send + Sync + 'static,
    {
        let client = self.clone();
        let query = query.clone();
        let options = options.cloned();
        let map = Arc::new(map);
        paged(query.take_count(), move |token, remaining| {
            let client = client.clone();
            let query = query.clone();
            let options = options.clone();
            let map = Arc::clone(&map);
            async move {
                let top = page_size(remaining, client.service.config.max_results_per_segment);
                let (entities, continuation_token) = client
                    .query_page(&query, token.as_ref(), top, options.as_ref())
                    .await?;
                let results = entities
                    .into_iter()
                    .map(|entity| map(entity))
                    .collect::<TableResult<Vec<T>>>()?;
                Ok(TableQuerySegment {
                    results,
                    continuation_token,
                })
            }
        })
    }

    fn checked_name(&self) -> TableResult<&str> {
        validate_table_name(&self.name)?;
        Ok(&self.name)
    }
}

/// Table names are 1 to 63 ASCII letters and digits.
fn validate_table_name(name: &str) -> TableResult<()> {
    if name.is_empty() || name.len() > MAX_TABLE_NAME_LENGTH {
        return Err(TableError::invalid_argument(
            "table_name",
            format!("table name must be 1 to {MAX_TABLE_NAME_LENGTH} characters long"),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TableError::invalid_argument(
            "table_name",
            format!("table name '{name}' may only contain letters and digits"),
        ));
    }
    Ok(())
}

/// Page size for the next request: what is left of the take count, capped
/// by the configured maximum.
fn page_size(remaining: Option<u32>, configured: Option<u32>) -> Option<u32> {
    match remaining {
        Some(remaining) => Some(remaining.min(configured.unwrap_or(MAX_RESULTS_PER_SEGMENT))),
        None => configured,
    }
}

fn into_typed<T: TableEntity>(entity: DynamicEntity) -> TableResult<T> {
    entity
        .into_entity()
        .map_err(|source| RequestError::Resolver { source }.into())
}

fn resolve_with<T>(resolver: &EntityResolver<T>, entity: DynamicEntity) -> TableResult<T> {
    resolver(
        &entity.partition_key,
        &entity.row_key,
        entity.timestamp,
        entity.properties(),
        entity.etag.as_deref(),
    )
    .map_err(|source| RequestError::Resolver { source }.into())
}

fn transport_error(error: TransportError) -> TableError {
    RequestError::Transport {
        message: error.message,
        source: error.source,
    }
    .into()
}
