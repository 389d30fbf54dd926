//! REST commands.
//!
//! A command turns one public call into request parts and reads the
//! matching response. Commands hold borrowed inputs; the executor may build
//! a command's request several times when an attempt is retried.

use std::sync::Arc;

use http::Method;
use http::header::CONTENT_TYPE;
use url::Url;
use uuid::Uuid;

use super::pool::{BufferPool, PooledBuffer};
use super::request::{
    CONTINUATION_NEXT_PARTITION_KEY, CONTINUATION_NEXT_ROW_KEY, CONTINUATION_NEXT_TABLE_NAME,
    DATA_SERVICE_VERSION, ETAG, IF_MATCH, PREFER, PREFER_RETURN_CONTENT,
    PREFER_RETURN_NO_CONTENT, RequestParts, X_MS_REQUEST_ID, entity_resource, merge_method,
    quote, read_entities, read_entity, read_table_names, resource_url, write_entity_body,
    write_table_body,
};
use super::transport::TransportResponse;
use crate::batch::TableBatch;
use crate::config::{MAX_RESULTS_PER_SEGMENT, RequestOptions};
use crate::continuation::{ContinuationToken, StorageLocation};
use crate::entity::{DynamicEntity, PARTITION_KEY, ROW_KEY, TIMESTAMP};
use crate::error::{RequestError, SerializationError, TableError, TableResult};
use crate::operation::{OperationResult, ResultValue, TableOperation, TableOperationType};
use crate::query::TableQuery;
use crate::wire::batch::{BatchPart, read_batch_response, write_batch};
use crate::wire::error::{ERROR_CODE_HEADER, parse_error};

const TABLES_RESOURCE: &str = "Tables";
const BATCH_RESOURCE: &str = "$batch";

/// Inputs available when building a request.
pub(crate) struct BuildEnv<'a> {
    pub base_url: &'a Url,
    pub options: &'a RequestOptions,
    pub pool: &'a BufferPool,
}

/// One REST call.
pub(crate) trait RestCommand: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    /// Whether a secondary endpoint may serve the command.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Location the command must be sent to, e.g. the one a continuation
    /// token was issued by.
    fn pinned_location(&self) -> Option<StorageLocation> {
        None
    }

    fn build(&self, env: &BuildEnv<'_>) -> TableResult<RequestParts>;

    /// Statuses handed to [`RestCommand::parse`]; any other status fails the
    /// attempt with the service's error details.
    fn accepts(&self, status: u16) -> bool {
        (200..300).contains(&status)
    }

    fn parse(
        &self,
        response: TransportResponse,
        location: StorageLocation,
        options: &RequestOptions,
    ) -> TableResult<Self::Output>;
}

fn request_id(response: &TransportResponse) -> Option<String> {
    response.header(X_MS_REQUEST_ID).map(str::to_string)
}

/// Request of a single operation, shared by direct and batched execution.
struct OperationRequest {
    method: Method,
    resource: String,
    query: Vec<(String, String)>,
    headers: Vec<(&'static str, String)>,
    body: Option<PooledBuffer>,
}

fn required_entity(operation: &TableOperation) -> TableResult<&DynamicEntity> {
    operation.entity().ok_or_else(|| {
        TableError::invalid_argument(
            "entity",
            format!("{} requires an entity", operation.kind()),
        )
    })
}

fn describe_operation(
    table: &str,
    operation: &TableOperation,
    env: &BuildEnv<'_>,
) -> TableResult<OperationRequest> {
    let format = env.options.payload_format;
    let kind = operation.kind();

    let mut request = OperationRequest {
        method: Method::GET,
        resource: entity_resource(table, operation.partition_key(), operation.row_key()),
        query: Vec::new(),
        headers: Vec::new(),
        body: None,
    };

    if kind == TableOperationType::Retrieve {
        if let Some(columns) = operation.select_columns() {
            request
                .query
                .push(("$select".to_string(), select_list(columns)));
        }
        return Ok(request);
    }

    let entity = required_entity(operation)?;
    if kind != TableOperationType::Delete {
        let mut body = env.pool.acquire();
        write_entity_body(&mut body, format, entity)?;
        request.body = Some(body);
    }

    match kind {
        TableOperationType::Insert => {
            let echo = env.options.echo_content.unwrap_or(operation.echo_content());
            request.method = Method::POST;
            request.resource = table.to_string();
            let prefer = if echo {
                PREFER_RETURN_CONTENT
            } else {
                PREFER_RETURN_NO_CONTENT
            };
            request.headers.push((PREFER, prefer.to_string()));
        }
        TableOperationType::Replace | TableOperationType::InsertOrReplace => {
            request.method = Method::PUT;
        }
        TableOperationType::Merge | TableOperationType::InsertOrMerge => {
            request.method = merge_method()?;
        }
        TableOperationType::Delete => {
            request.method = Method::DELETE;
        }
        TableOperationType::Retrieve => {}
    }

    if kind.requires_etag() {
        let etag = operation.etag().ok_or_else(|| {
            TableError::invalid_argument(
                "entity",
                format!("{kind} requires an ETag (which may be the '*' wildcard)."),
            )
        })?;
        request.headers.push((IF_MATCH, etag.to_string()));
    }

    Ok(request)
}

fn select_list(columns: &[String]) -> String {
    let mut list: Vec<&str> = vec![PARTITION_KEY, ROW_KEY, TIMESTAMP];
    for column in columns {
        if !list.contains(&column.as_str()) {
            list.push(column);
        }
    }
    list.join(",")
}

/// Interprets the response of a single operation.
fn operation_result(
    operation: &TableOperation,
    status: u16,
    etag: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
    options: &RequestOptions,
) -> TableResult<OperationResult> {
    let etag = etag.map(str::to_string);
    let format = options.payload_format;
    let resolver = options.property_resolver.as_ref();

    if operation.kind() == TableOperationType::Retrieve {
        if status == 404 {
            return Ok(OperationResult::new(status, None, None));
        }
        let mut entity = read_entity(content_type, body, format, resolver)?;
        if entity.etag.is_none() {
            entity.etag = etag;
        }
        let etag = entity.etag.clone();
        let value = match operation.resolver() {
            Some(resolve) => {
                let projected = resolve(
                    &entity.partition_key,
                    &entity.row_key,
                    entity.timestamp,
                    entity.properties(),
                    entity.etag.as_deref(),
                )
                .map_err(|source| TableError::Request(RequestError::Resolver { source }))?;
                ResultValue::Projected(Arc::from(projected))
            }
            None => ResultValue::Entity(entity),
        };
        return Ok(OperationResult::new(status, etag, Some(value)));
    }

    let mut entity = if body.is_empty() {
        required_entity(operation)?.clone()
    } else {
        read_entity(content_type, body, format, resolver)?
    };
    if etag.is_some() {
        entity.etag = etag;
    }
    Ok(OperationResult::new(
        status,
        entity.etag.clone(),
        Some(ResultValue::Entity(entity)),
    ))
}

/// Executes one [`TableOperation`].
pub(crate) struct OperationCommand<'a> {
    pub table: &'a str,
    pub operation: &'a TableOperation,
}

impl RestCommand for OperationCommand<'_> {
    type Output = OperationResult;

    fn name(&self) -> &'static str {
        self.operation.kind().as_str()
    }

    fn is_read_only(&self) -> bool {
        self.operation.is_read_only()
    }

    fn build(&self, env: &BuildEnv<'_>) -> TableResult<RequestParts> {
        let request = describe_operation(self.table, self.operation, env)?;
        let mut parts = RequestParts::new(request.method, request.resource);
        parts.query = request.query;
        for (name, value) in request.headers {
            parts = parts.header(name, &value)?;
        }
        if let Some(body) = request.body {
            parts = parts.body(env.options.payload_format.content_type(), body)?;
        }
        Ok(parts)
    }

    fn accepts(&self, status: u16) -> bool {
        (200..300).contains(&status)
            || (status == 404 && self.operation.kind() == TableOperationType::Retrieve)
    }

    fn parse(
        &self,
        response: TransportResponse,
        _location: StorageLocation,
        options: &RequestOptions,
    ) -> TableResult<OperationResult> {
        operation_result(
            self.operation,
            response.status,
            response.header(ETAG),
            response.header(CONTENT_TYPE.as_str()),
            &response.body,
            options,
        )
    }
}

/// Executes a [`TableBatch`] as one `multipart/mixed` request.
pub(crate) struct BatchCommand<'a> {
    pub table: &'a str,
    pub batch: &'a TableBatch,
}

impl RestCommand for BatchCommand<'_> {
    type Output = Vec<OperationResult>;

    fn name(&self) -> &'static str {
        "ExecuteBatch"
    }

    fn is_read_only(&self) -> bool {
        self.batch.has_query()
    }

    fn build(&self, env: &BuildEnv<'_>) -> TableResult<RequestParts> {
        let format = env.options.payload_format;
        let mut parts = Vec::with_capacity(self.batch.len());
        for operation in self.batch.iter() {
            let request = describe_operation(self.table, operation, env)?;
            let url = resource_url(env.base_url, &request.resource, &request.query)?;
            let mut headers: Vec<(String, String)> = request
                .headers
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect();
            headers.push(("Accept".to_string(), format.accept_header().to_string()));
            headers.push(("DataServiceVersion".to_string(), DATA_SERVICE_VERSION.to_string()));
            if request.body.is_some() {
                headers.push(("Content-Type".to_string(), format.content_type().to_string()));
            }
            parts.push(BatchPart {
                method: request.method,
                url: url.to_string(),
                headers,
                body: request.body.map(|b| b.to_vec()),
            });
        }

        let batch_boundary = format!("batch_{}", Uuid::new_v4());
        let changeset_boundary =
            (!self.batch.has_query()).then(|| format!("changeset_{}", Uuid::new_v4()));

        let mut body = env.pool.acquire();
        write_batch(
            &mut body,
            &batch_boundary,
            changeset_boundary.as_deref(),
            &parts,
        )
        .map_err(SerializationError::from)?;

        RequestParts::new(Method::POST, BATCH_RESOURCE)
            .body(&format!("multipart/mixed; boundary={batch_boundary}"), body)
    }

    fn parse(
        &self,
        response: TransportResponse,
        _location: StorageLocation,
        options: &RequestOptions,
    ) -> TableResult<Vec<OperationResult>> {
        let content_type = response.header(CONTENT_TYPE.as_str()).unwrap_or_default();
        let responses = read_batch_response(&response.body, content_type)?;
        let operations = self.batch.operations();

        for (position, sub) in responses.iter().enumerate() {
            let is_retrieve_miss = sub.status == 404
                && operations
                    .get(position)
                    .is_some_and(|op| op.kind() == TableOperationType::Retrieve);
            if sub.status < 300 || is_retrieve_miss {
                continue;
            }
            let extended = parse_error(&sub.body, sub.header(ERROR_CODE_HEADER), &sub.reason);
            let index = failed_operation_index(&extended.error_message).or_else(|| {
                (responses.len() == operations.len()).then_some(position)
            });
            return Err(TableError::service(
                sub.status,
                extended,
                request_id(&response),
                index,
            ));
        }

        if responses.len() != operations.len() {
            return Err(SerializationError::malformed(format!(
                "batch response contains {} responses for {} operations",
                responses.len(),
                operations.len()
            ))
            .into());
        }

        operations
            .iter()
            .zip(&responses)
            .map(|(operation, sub)| {
                operation_result(
                    operation,
                    sub.status,
                    sub.header(ETAG),
                    sub.header("content-type"),
                    &sub.body,
                    options,
                )
            })
            .collect()
    }
}

/// The service prefixes a rejected changeset's message with the index of
/// the failing operation, e.g. `2:The specified entity already exists.`.
fn failed_operation_index(message: &str) -> Option<usize> {
    let (prefix, _) = message.split_once(':')?;
    prefix.trim().parse().ok()
}

/// One page of an entity query.
pub(crate) struct QueryCommand<'a> {
    pub table: &'a str,
    pub query: &'a TableQuery,
    pub token: Option<&'a ContinuationToken>,
    /// Page size; `None` lets the service decide.
    pub top: Option<u32>,
}

impl RestCommand for QueryCommand<'_> {
    type Output = (Vec<DynamicEntity>, Option<ContinuationToken>);

    fn name(&self) -> &'static str {
        "QueryEntities"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn pinned_location(&self) -> Option<StorageLocation> {
        self.token.and_then(|t| t.target_location)
    }

    fn build(&self, _env: &BuildEnv<'_>) -> TableResult<RequestParts> {
        let mut parts = RequestParts::new(Method::GET, format!("{}()", self.table));
        if let Some(filter) = self.query.filter_string() {
            parts = parts.query("$filter", filter);
        }
        if let Some(top) = self.top {
            parts = parts.query("$top", top.min(MAX_RESULTS_PER_SEGMENT).to_string());
        }
        if let Some(columns) = self.query.select_columns() {
            parts = parts.query("$select", select_list(columns));
        }
        if let Some(token) = self.token {
            if let Some(pk) = &token.next_partition_key {
                parts = parts.query("NextPartitionKey", pk.clone());
            }
            if let Some(rk) = &token.next_row_key {
                parts = parts.query("NextRowKey", rk.clone());
            }
        }
        Ok(parts)
    }

    fn parse(
        &self,
        response: TransportResponse,
        location: StorageLocation,
        options: &RequestOptions,
    ) -> TableResult<Self::Output> {
        let entities = read_entities(
            &response,
            options.payload_format,
            options.property_resolver.as_ref(),
        )?;
        let next_partition_key = response
            .header(CONTINUATION_NEXT_PARTITION_KEY)
            .map(str::to_string);
        let next_row_key = response.header(CONTINUATION_NEXT_ROW_KEY).map(str::to_string);
        let token = (next_partition_key.is_some() || next_row_key.is_some()).then(|| {
            ContinuationToken::for_entities(next_partition_key, next_row_key, Some(location))
        });
        Ok((entities, token))
    }
}

pub(crate) struct CreateTableCommand<'a> {
    pub name: &'a str,
}

impl RestCommand for CreateTableCommand<'_> {
    type Output = ();

    fn name(&self) -> &'static str {
        "CreateTable"
    }

    fn build(&self, env: &BuildEnv<'_>) -> TableResult<RequestParts> {
        let format = env.options.payload_format;
        let mut body = env.pool.acquire();
        write_table_body(&mut body, format, self.name)?;
        RequestParts::new(Method::POST, TABLES_RESOURCE)
            .header(PREFER, PREFER_RETURN_NO_CONTENT)?
            .body(format.content_type(), body)
    }

    fn parse(
        &self,
        _response: TransportResponse,
        _location: StorageLocation,
        _options: &RequestOptions,
    ) -> TableResult<()> {
        Ok(())
    }
}

fn table_resource(name: &str) -> String {
    format!("{TABLES_RESOURCE}('{}')", quote(name))
}

pub(crate) struct DeleteTableCommand<'a> {
    pub name: &'a str,
}

impl RestCommand for DeleteTableCommand<'_> {
    type Output = ();

    fn name(&self) -> &'static str {
        "DeleteTable"
    }

    fn build(&self, _env: &BuildEnv<'_>) -> TableResult<RequestParts> {
        Ok(RequestParts::new(Method::DELETE, table_resource(self.name)))
    }

    fn parse(
        &self,
        _response: TransportResponse,
        _location: StorageLocation,
        _options: &RequestOptions,
    ) -> TableResult<()> {
        Ok(())
    }
}

pub(crate) struct TableExistsCommand<'a> {
    pub name: &'a str,
}

impl RestCommand for TableExistsCommand<'_> {
    type Output = bool;

    fn name(&self) -> &'static str {
        "TableExists"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn build(&self, _env: &BuildEnv<'_>) -> TableResult<RequestParts> {
        Ok(RequestParts::new(Method::GET, table_resource(self.name)))
    }

    fn accepts(&self, status: u16) -> bool {
        (200..300).contains(&status) || status == 404
    }

    fn parse(
        &self,
        response: TransportResponse,
        _location: StorageLocation,
        _options: &RequestOptions,
    ) -> TableResult<bool> {
        Ok(response.status != 404)
    }
}

/// One page of the table listing.
pub(crate) struct ListTablesCommand<'a> {
    pub prefix: Option<&'a str>,
    pub token: Option<&'a ContinuationToken>,
    pub top: Option<u32>,
}

impl RestCommand for ListTablesCommand<'_> {
    type Output = (Vec<String>, Option<ContinuationToken>);

    fn name(&self) -> &'static str {
        "ListTables"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn pinned_location(&self) -> Option<StorageLocation> {
        self.token.and_then(|t| t.target_location)
    }

    fn build(&self, _env: &BuildEnv<'_>) -> TableResult<RequestParts> {
        let mut parts = RequestParts::new(Method::GET, TABLES_RESOURCE);
        if let Some(prefix) = self.prefix.filter(|p| !p.is_empty()) {
            let prefix = quote(prefix);
            parts = parts.query(
                "$filter",
                format!("TableName ge '{prefix}' and TableName lt '{prefix}{{'"),
            );
        }
        if let Some(top) = self.top {
            parts = parts.query("$top", top.min(MAX_RESULTS_PER_SEGMENT).to_string());
        }
        if let Some(next) = self.token.and_then(|t| t.next_table_name.as_deref()) {
            parts = parts.query("NextTableName", next);
        }
        Ok(parts)
    }

    fn parse(
        &self,
        response: TransportResponse,
        location: StorageLocation,
        options: &RequestOptions,
    ) -> TableResult<Self::Output> {
        let names = read_table_names(&response, options.payload_format)?;
        let token = response
            .header(CONTINUATION_NEXT_TABLE_NAME)
            .map(|next| ContinuationToken::for_tables(next.to_string(), Some(location)));
        Ok((names, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PayloadFormat, TableClientConfig, TableRequestOptions};

    fn options() -> RequestOptions {
        let config = TableClientConfig::default();
        TableRequestOptions::new().resolve(&config, &config.retry.build_policy())
    }

    fn entity() -> DynamicEntity {
        DynamicEntity::new("p", "r")
            .with("Name", "widget")
            .unwrap()
            .with_etag("W/\"1\"")
    }

    #[test]
    fn test_merge_sends_if_match_and_body() {
        let base = Url::parse("http://127.0.0.1:10002/devstoreaccount1").unwrap();
        let options = options();
        let pool = BufferPool::new();
        let env = BuildEnv {
            base_url: &base,
            options: &options,
            pool: &pool,
        };
        let operation = TableOperation::merge(&entity()).unwrap();
        let parts = OperationCommand {
            table: "orders",
            operation: &operation,
        }
        .build(&env)
        .unwrap();

        assert_eq!(parts.method.as_str(), "MERGE");
        assert_eq!(parts.resource, "orders(PartitionKey='p',RowKey='r')");
        assert_eq!(parts.headers.get(IF_MATCH).unwrap(), "W/\"1\"");
        assert!(parts.body.is_some());
        assert_eq!(pool.outstanding(), 1);
        drop(parts);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_retrieve_miss_is_not_an_error() {
        let operation = TableOperation::retrieve("p", "r");
        let result = operation_result(&operation, 404, None, None, b"", &options()).unwrap();
        assert_eq!(result.http_status_code, 404);
        assert!(result.value.is_none());
        assert!(result.etag.is_none());
    }

    #[test]
    fn test_write_result_carries_new_etag() {
        let operation = TableOperation::replace(&entity()).unwrap();
        let result =
            operation_result(&operation, 204, Some("W/\"2\""), None, b"", &options()).unwrap();
        assert_eq!(result.etag.as_deref(), Some("W/\"2\""));
        assert_eq!(result.entity().unwrap().etag.as_deref(), Some("W/\"2\""));
    }

    #[test]
    fn test_select_list_always_includes_keys() {
        assert_eq!(
            select_list(&["Name".to_string(), "RowKey".to_string()]),
            "PartitionKey,RowKey,Timestamp,Name"
        );
    }

    #[test]
    fn test_failed_operation_index() {
        assert_eq!(failed_operation_index("2:The specified entity already exists."), Some(2));
        assert_eq!(failed_operation_index("The batch request body is too large."), None);
    }

    #[test]
    fn test_list_tables_prefix_filter() {
        let base = Url::parse("http://127.0.0.1:10002/devstoreaccount1").unwrap();
        let mut options = options();
        options.payload_format = PayloadFormat::Json;
        let pool = BufferPool::new();
        let env = BuildEnv {
            base_url: &base,
            options: &options,
            pool: &pool,
        };
        let parts = ListTablesCommand {
            prefix: Some("ord"),
            token: None,
            top: Some(5000),
        }
        .build(&env)
        .unwrap();
        assert_eq!(
            parts.query,
            vec![
                (
                    "$filter".to_string(),
                    "TableName ge 'ord' and TableName lt 'ord{'".to_string()
                ),
                ("$top".to_string(), "1000".to_string()),
            ]
        );
    }
}
