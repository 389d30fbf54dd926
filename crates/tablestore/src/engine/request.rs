//! REST request construction and payload selection.

use chrono::Utc;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;
use url::form_urlencoded::byte_serialize;

use super::pool::PooledBuffer;
use super::transport::{TransportRequest, TransportResponse};
use crate::config::{Credentials, PayloadFormat, PropertyResolver, RequestOptions};
use crate::entity::DynamicEntity;
use crate::error::{RequestError, TableError, TableResult};
use crate::wire::{atom, json};

pub(crate) const STORAGE_VERSION: &str = "2019-02-02";
pub(crate) const DATA_SERVICE_VERSION: &str = "3.0;NetFx";

pub(crate) const X_MS_VERSION: &str = "x-ms-version";
pub(crate) const X_MS_DATE: &str = "x-ms-date";
pub(crate) const X_MS_CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
pub(crate) const X_MS_REQUEST_ID: &str = "x-ms-request-id";
pub(crate) const DATA_SERVICE_VERSION_HEADER: &str = "dataserviceversion";
pub(crate) const MAX_DATA_SERVICE_VERSION_HEADER: &str = "maxdataserviceversion";
pub(crate) const IF_MATCH: &str = "if-match";
pub(crate) const PREFER: &str = "prefer";
pub(crate) const ETAG: &str = "etag";

pub(crate) const PREFER_RETURN_CONTENT: &str = "return-content";
pub(crate) const PREFER_RETURN_NO_CONTENT: &str = "return-no-content";

pub(crate) const CONTINUATION_NEXT_PARTITION_KEY: &str = "x-ms-continuation-nextpartitionkey";
pub(crate) const CONTINUATION_NEXT_ROW_KEY: &str = "x-ms-continuation-nextrowkey";
pub(crate) const CONTINUATION_NEXT_TABLE_NAME: &str = "x-ms-continuation-nexttablename";

/// Command-specific part of a request; the executor adds the rest.
#[derive(Debug)]
pub(crate) struct RequestParts {
    pub method: Method,
    /// Path segment appended to the endpoint, e.g. `Tables` or
    /// `orders(PartitionKey='a',RowKey='b')`.
    pub resource: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<PooledBuffer>,
}

impl RequestParts {
    pub fn new(method: Method, resource: impl Into<String>) -> Self {
        Self {
            method,
            resource: resource.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    /// `name` must be lowercase.
    pub fn header(mut self, name: &'static str, value: &str) -> TableResult<Self> {
        self.headers
            .insert(HeaderName::from_static(name), header_value(name, value)?);
        Ok(self)
    }

    pub fn body(mut self, content_type: &str, body: PooledBuffer) -> TableResult<Self> {
        self.headers
            .insert(CONTENT_TYPE, header_value("Content-Type", content_type)?);
        self.body = Some(body);
        Ok(self)
    }
}

pub(crate) fn header_value(name: &str, value: &str) -> TableResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TableError::invalid_argument(name, format!("invalid header value: {e}")))
}

/// Everything a request needs besides the command.
pub(crate) struct RequestEnv<'a> {
    pub base_url: &'a Url,
    pub options: &'a RequestOptions,
    pub credentials: &'a Credentials,
    pub client_request_id: &'a str,
}

/// Builds the full URL of a resource under an endpoint.
pub(crate) fn resource_url(
    base: &Url,
    resource: &str,
    query: &[(String, String)],
) -> TableResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TableError::invalid_argument("endpoint", "endpoint must be a base URL"))?
        .pop_if_empty()
        .push(resource);
    if !query.is_empty() {
        url.set_query(Some(&encode_query(query)));
    }
    Ok(url)
}

/// Percent-encodes query pairs, spaces as `%20`.
pub(crate) fn encode_query(query: &[(String, String)]) -> String {
    query
        .iter()
        .map(|(name, value)| {
            let name: String = byte_serialize(name.as_bytes()).collect();
            let value: String = byte_serialize(value.as_bytes()).collect();
            format!("{name}={value}").replace('+', "%20")
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Adds endpoint, common headers, server timeout and credentials.
pub(crate) fn build_request(
    parts: RequestParts,
    env: &RequestEnv<'_>,
) -> TableResult<TransportRequest> {
    let RequestParts {
        method,
        resource,
        mut query,
        mut headers,
        body,
    } = parts;

    if let Some(timeout) = env.options.server_timeout {
        query.push(("timeout".to_string(), timeout.as_secs().max(1).to_string()));
    }
    let mut url = resource_url(env.base_url, &resource, &query)?;
    if let Credentials::SasToken { token } = env.credentials {
        let token = token.trim_start_matches('?');
        let combined = match url.query() {
            Some(q) if !q.is_empty() => format!("{q}&{token}"),
            _ => token.to_string(),
        };
        url.set_query(Some(&combined));
    }

    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    headers.insert(X_MS_VERSION, HeaderValue::from_static(STORAGE_VERSION));
    headers.insert(X_MS_DATE, header_value(X_MS_DATE, &date)?);
    headers.insert(
        X_MS_CLIENT_REQUEST_ID,
        header_value(X_MS_CLIENT_REQUEST_ID, env.client_request_id)?,
    );
    headers.insert(
        DATA_SERVICE_VERSION_HEADER,
        HeaderValue::from_static(DATA_SERVICE_VERSION),
    );
    headers.insert(
        MAX_DATA_SERVICE_VERSION_HEADER,
        HeaderValue::from_static(DATA_SERVICE_VERSION),
    );
    if !headers.contains_key(ACCEPT) {
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(env.options.payload_format.accept_header()),
        );
    }

    Ok(TransportRequest {
        method,
        url,
        headers,
        body,
    })
}

/// `MERGE` is not a standard method.
pub(crate) fn merge_method() -> TableResult<Method> {
    Method::from_bytes(b"MERGE").map_err(|e| {
        TableError::Request(RequestError::Transport {
            message: "invalid MERGE method".to_string(),
            source: Some(Box::new(e)),
        })
    })
}

/// Doubles single quotes for embedding in a quoted key.
pub(crate) fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

pub(crate) fn entity_resource(table: &str, partition_key: &str, row_key: &str) -> String {
    format!(
        "{table}(PartitionKey='{}',RowKey='{}')",
        quote(partition_key),
        quote(row_key)
    )
}

/// Writes an entity request body in the negotiated format.
pub(crate) fn write_entity_body(
    out: &mut PooledBuffer,
    format: PayloadFormat,
    entity: &DynamicEntity,
) -> TableResult<()> {
    if format.is_json() {
        let body = json::write_entity(&entity.partition_key, &entity.row_key, entity.properties());
        serde_json::to_writer(&mut *out, &body)?;
    } else {
        atom::write_entity(&mut *out, &entity.partition_key, &entity.row_key, entity.properties())?;
    }
    Ok(())
}

pub(crate) fn write_table_body(
    out: &mut PooledBuffer,
    format: PayloadFormat,
    name: &str,
) -> TableResult<()> {
    if format.is_json() {
        serde_json::to_writer(&mut *out, &json::write_table(name))?;
    } else {
        atom::write_table(&mut *out, name)?;
    }
    Ok(())
}

/// Whether a response body is AtomPub, by content type first.
fn is_atom(content_type: Option<&str>, format: PayloadFormat) -> bool {
    match content_type {
        Some(ct) if ct.contains("json") => false,
        Some(ct) if ct.contains("xml") => true,
        _ => !format.is_json(),
    }
}

pub(crate) fn read_entity(
    content_type: Option<&str>,
    body: &[u8],
    format: PayloadFormat,
    resolver: Option<&PropertyResolver>,
) -> TableResult<DynamicEntity> {
    if is_atom(content_type, format) {
        atom::read_entity_body(body)
    } else {
        json::read_entity_body(body, resolver)
    }
}

pub(crate) fn read_entities(
    response: &TransportResponse,
    format: PayloadFormat,
    resolver: Option<&PropertyResolver>,
) -> TableResult<Vec<DynamicEntity>> {
    if is_atom(response.header(CONTENT_TYPE.as_str()), format) {
        atom::read_entities(&response.body)
    } else {
        json::read_entities(&response.body, resolver)
    }
}

pub(crate) fn read_table_names(
    response: &TransportResponse,
    format: PayloadFormat,
) -> TableResult<Vec<String>> {
    if is_atom(response.header(CONTENT_TYPE.as_str()), format) {
        atom::read_table_names(&response.body)
    } else {
        json::read_table_names(&response.body)
    }
}
