//! Blocking clients.
//!
//! Each call blocks the current thread on the async client. The clients own
//! a Tokio runtime and must not be used from inside another runtime.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::runtime::{Builder, Runtime};

use crate::batch::TableBatch;
use crate::client;
use crate::config::{TableClientConfig, TableRequestOptions};
use crate::continuation::ContinuationToken;
use crate::engine::transport::TableTransport;
use crate::entity::{DynamicEntity, TableEntity};
use crate::error::{RequestError, TableResult};
use crate::operation::{EntityResolver, OperationResult, TableOperation};
use crate::query::{TableQuery, TableQuerySegment};

/// Blocking counterpart of [`client::TableServiceClient`].
#[derive(Debug, Clone)]
pub struct TableServiceClient {
    inner: client::TableServiceClient,
    runtime: Arc<Runtime>,
}

impl TableServiceClient {
    pub fn new(config: TableClientConfig) -> TableResult<Self> {
        let runtime = build_runtime()?;
        let inner = {
            let _guard = runtime.enter();
            client::TableServiceClient::new(config)?
        };
        Ok(Self { inner, runtime })
    }

    pub fn with_transport(
        config: TableClientConfig,
        transport: Arc<dyn TableTransport>,
    ) -> TableResult<Self> {
        Ok(Self {
            inner: client::TableServiceClient::with_transport(config, transport)?,
            runtime: build_runtime()?,
        })
    }

    /// The async client sharing this client's executor.
    pub fn as_async(&self) -> &client::TableServiceClient {
        &self.inner
    }

    pub fn table(&self, name: impl Into<String>) -> TableClient {
        TableClient {
            inner: self.inner.table(name),
            runtime: Arc::clone(&self.runtime),
        }
    }

    pub fn list_tables_segmented(
        &self,
        prefix: Option<&str>,
        token: Option<&ContinuationToken>,
        max_results: Option<u32>,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<TableQuerySegment<String>> {
        self.runtime.block_on(
            self.inner
                .list_tables_segmented(prefix, token, max_results, options),
        )
    }

    pub fn list_tables(
        &self,
        prefix: Option<&str>,
        options: Option<&TableRequestOptions>,
    ) -> QueryIter<String> {
        QueryIter::new(self.inner.list_tables(prefix, options), &self.runtime)
    }
}

/// Blocking counterpart of [`client::TableClient`].
#[derive(Debug, Clone)]
pub struct TableClient {
    inner: client::TableClient,
    runtime: Arc<Runtime>,
}

impl TableClient {
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn create(&self, options: Option<&TableRequestOptions>) -> TableResult<()> {
        self.runtime.block_on(self.inner.create(options))
    }

    pub fn create_if_not_exists(&self, options: Option<&TableRequestOptions>) -> TableResult<bool> {
        self.runtime.block_on(self.inner.create_if_not_exists(options))
    }

    pub fn delete(&self, options: Option<&TableRequestOptions>) -> TableResult<()> {
        self.runtime.block_on(self.inner.delete(options))
    }

    pub fn delete_if_exists(&self, options: Option<&TableRequestOptions>) -> TableResult<bool> {
        self.runtime.block_on(self.inner.delete_if_exists(options))
    }

    pub fn exists(&self, options: Option<&TableRequestOptions>) -> TableResult<bool> {
        self.runtime.block_on(self.inner.exists(options))
    }

    pub fn execute(
        &self,
        operation: &TableOperation,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<OperationResult> {
        self.runtime.block_on(self.inner.execute(operation, options))
    }

    pub fn execute_batch(
        &self,
        batch: &TableBatch,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<Vec<OperationResult>> {
        self.runtime.block_on(self.inner.execute_batch(batch, options))
    }

    pub fn execute_query_segmented(
        &self,
        query: &TableQuery,
        token: Option<&ContinuationToken>,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<TableQuerySegment<DynamicEntity>> {
        self.runtime
            .block_on(self.inner.execute_query_segmented(query, token, options))
    }

    pub fn execute_query_segmented_as<T: TableEntity>(
        &self,
        query: &TableQuery,
        token: Option<&ContinuationToken>,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<TableQuerySegment<T>> {
        self.runtime
            .block_on(self.inner.execute_query_segmented_as(query, token, options))
    }

    pub fn execute_query_segmented_with_resolver<T: Send + 'static>(
        &self,
        query: &TableQuery,
        resolver: EntityResolver<T>,
        token: Option<&ContinuationToken>,
        options: Option<&TableRequestOptions>,
    ) -> TableResult<TableQuerySegment<T>> {
        self.runtime.block_on(
            self.inner
                .execute_query_segmented_with_resolver(query, resolver, token, options),
        )
    }

    /// Iterates every matching entity, fetching one segment at a time.
    pub fn execute_query(
        &self,
        query: &TableQuery,
        options: Option<&TableRequestOptions>,
    ) -> QueryIter<DynamicEntity> {
        QueryIter::new(self.inner.execute_query(query, options), &self.runtime)
    }

    pub fn execute_query_as<T: TableEntity>(
        &self,
        query: &TableQuery,
        options: Option<&TableRequestOptions>,
    ) -> QueryIter<T> {
        QueryIter::new(self.inner.execute_query_as(query, options), &self.runtime)
    }

    pub fn execute_query_with_resolver<T: Send + 'static>(
        &self,
        query: &TableQuery,
        resolver: EntityResolver<T>,
        options: Option<&TableRequestOptions>,
    ) -> QueryIter<T> {
        QueryIter::new(
            self.inner
                .execute_query_with_resolver(query, resolver, options),
            &self.runtime,
        )
    }
}

/// Blocking iterator over a lazily fetched result set.
///
/// A request is only sent when the buffered segment is exhausted.
pub struct QueryIter<T> {
    stream: BoxStream<'static, TableResult<T>>,
    runtime: Arc<Runtime>,
}

impl<T> QueryIter<T> {
    fn new(stream: BoxStream<'static, TableResult<T>>, runtime: &Arc<Runtime>) -> Self {
        Self {
            stream,
            runtime: Arc::clone(runtime),
        }
    }
}

impl<T> Iterator for QueryIter<T> {
    type Item = TableResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

fn build_runtime() -> TableResult<Arc<Runtime>> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("tablestore-blocking")
        .enable_all()
        .build()
        .map_err(|e| RequestError::Transport {
            message: "failed to start the blocking runtime".to_string(),
            source: Some(Box::new(e)),
        })?;
    Ok(Arc::new(runtime))
}
