//! In-memory table service used by the integration tests.
//!
//! Implements the JSON dialect of the REST protocol on top of
//! [`TableTransport`]: table management, entity CRUD with ETags, filtered
//! and paged queries, and atomic `$batch` changesets. Faults (busy
//! responses, latency) can be injected to drive the retry paths.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use helios_tablestore::engine::{
    TableTransport, TransportError, TransportRequest, TransportResponse,
};
use helios_tablestore::{RetryConfig, TableClientConfig, TableServiceClient};
use http::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use url::Url;

pub const PRIMARY: &str = "http://127.0.0.1:10002/devstoreaccount1";
pub const SECONDARY: &str = "http://127.0.0.1:10002/devstoreaccount1-secondary";

const JSON_CONTENT_TYPE: &str =
    "application/json;odata=minimalmetadata;streaming=true;charset=utf-8";
const MAX_PAGE_SIZE: usize = 1000;
const MAX_ENTITY_SIZE: usize = 1024 * 1024;
const MAX_BATCH_SIZE: usize = 4 * 1024 * 1024;

type Row = Map<String, Value>;
type Table = BTreeMap<(String, String), Row>;

/// A request as seen by the service.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub url: String,
    pub client_request_id: Option<String>,
}

#[derive(Default)]
struct Faults {
    busy_responses: u32,
    busy_status: u16,
    latency: Option<Duration>,
}

/// Shared in-memory service state.
#[derive(Default)]
pub struct MemoryTableService {
    tables: Mutex<BTreeMap<String, Table>>,
    faults: Mutex<Faults>,
    requests: Mutex<Vec<Recorded>>,
    request_count: AtomicUsize,
    etag_counter: AtomicU64,
    max_page_size: Mutex<Option<usize>>,
}

impl MemoryTableService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers the next `count` requests with `503 ServerBusy`.
    pub fn fail_next(&self, count: u32) {
        self.fail_next_with(count, 503);
    }

    pub fn fail_next_with(&self, count: u32, status: u16) {
        let mut faults = self.faults.lock();
        faults.busy_responses = count;
        faults.busy_status = status;
    }

    /// Delays every response.
    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = Some(latency);
    }

    /// Caps query pages below what the client asks for.
    pub fn set_max_page_size(&self, size: usize) {
        *self.max_page_size.lock() = Some(size);
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn entity_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, BTreeMap::len)
    }

    fn next_etag(&self) -> String {
        let n = self.etag_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("W/\"datetime'{}'-{n}\"", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"))
    }

    fn handle(&self, method: &str, url: &Url, headers: &HeaderMap, body: &[u8]) -> Reply {
        let Some(resource) = url.path_segments().and_then(|mut s| s.next_back()).map(decode) else {
            return Reply::error(
                400,
                "InvalidUri",
                "The requested URI does not represent any resource.",
            );
        };
        let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let mut tables = self.tables.lock();
        match (method, resource.as_str()) {
            ("POST", "$batch") => {
                let content_type = header("content-type").unwrap_or_default().to_string();
                self.batch(&mut tables, &content_type, body)
            }
            ("GET", "Tables") => list_tables(&tables, &query),
            ("POST", "Tables") => {
                let Some(name) = serde_json::from_slice::<Value>(body)
                    .ok()
                    .and_then(|v| v.get("TableName").and_then(Value::as_str).map(str::to_string))
                else {
                    return Reply::invalid_input();
                };
                if tables.contains_key(&name) {
                    return Reply::error(
                        409,
                        "TableAlreadyExists",
                        "The table specified already exists.",
                    );
                }
                tables.insert(name.clone(), Table::new());
                if header("prefer") == Some("return-no-content") {
                    Reply::new(204)
                } else {
                    Reply::json(201, &json!({ "TableName": name }))
                }
            }
            (_, resource) if resource.starts_with("Tables('") => {
                let name = resource
                    .trim_start_matches("Tables('")
                    .trim_end_matches("')")
                    .replace("''", "'");
                match method {
                    "GET" if tables.contains_key(&name) => {
                        Reply::json(200, &json!({ "TableName": name }))
                    }
                    "DELETE" if tables.remove(&name).is_some() => Reply::new(204),
                    _ => Reply::not_found(),
                }
            }
            _ => {
                let request = EntityRequest {
                    method,
                    resource: &resource,
                    query: &query,
                    if_match: header("if-match"),
                    prefer: header("prefer"),
                    body,
                };
                self.entity_request(&mut tables, &request)
            }
        }
    }

    fn entity_request(
        &self,
        tables: &mut BTreeMap<String, Table>,
        request: &EntityRequest<'_>,
    ) -> Reply {
        let (table_name, key) = match request.resource.split_once('(') {
            Some((table, rest)) => (table, rest.trim_end_matches(')')),
            None => (request.resource, ""),
        };
        let Some(table) = tables.get_mut(table_name) else {
            return Reply::error(404, "TableNotFound", "The table specified does not exist.");
        };

        if key.is_empty() {
            return match request.method {
                "GET" => query_entities(table, request.query, *self.max_page_size.lock()),
                "POST" => self.insert(table, request),
                _ => Reply::error(405, "MethodNotAllowed", "The requested method is not allowed."),
            };
        }

        let Some(key) = parse_key(key) else {
            return Reply::invalid_input();
        };
        let etag_matches = |row: &Row| match request.if_match {
            None | Some("*") => true,
            Some(etag) => row.get("odata.etag").and_then(Value::as_str) == Some(etag),
        };

        match request.method {
            "GET" => match table.get(&key) {
                Some(row) => {
                    let row = project(row, request.query.get("$select"));
                    let etag = row
                        .get("odata.etag")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Reply::json(200, &Value::Object(row)).with_header("etag", &etag)
                }
                None => Reply::not_found(),
            },
            "DELETE" => match table.get(&key) {
                None => Reply::not_found(),
                Some(row) if !etag_matches(row) => Reply::error(
                    412,
                    "UpdateConditionNotSatisfied",
                    "The update condition specified in the request was not satisfied.",
                ),
                Some(_) => {
                    table.remove(&key);
                    Reply::new(204)
                }
            },
            "PUT" | "MERGE" => {
                let Some(incoming) = parse_body(request.body) else {
                    return Reply::invalid_input();
                };
                let merge = request.method == "MERGE";
                let mut row = match table.get(&key) {
                    Some(existing) if !etag_matches(existing) => {
                        return Reply::error(
                            412,
                            "UpdateConditionNotSatisfied",
                            "The update condition specified in the request was not satisfied.",
                        );
                    }
                    Some(existing) if merge => existing.clone(),
                    Some(_) => Row::new(),
                    // Upserts carry no If-Match.
                    None if request.if_match.is_none() => Row::new(),
                    None => {
                        return Reply::not_found();
                    }
                };
                for (name, value) in incoming {
                    if !name.ends_with("@odata.type") {
                        row.remove(&format!("{name}@odata.type"));
                    }
                    row.insert(name, value);
                }
                let etag = self.stamp(&mut row, &key);
                table.insert(key, row);
                Reply::new(204).with_header("etag", &etag)
            }
            _ => Reply::error(405, "MethodNotAllowed", "The requested method is not allowed."),
        }
    }

    fn insert(&self, table: &mut Table, request: &EntityRequest<'_>) -> Reply {
        let Some(mut row) = parse_body(request.body) else {
            return Reply::invalid_input();
        };
        let (Some(pk), Some(rk)) = (
            row.get("PartitionKey").and_then(Value::as_str).map(str::to_string),
            row.get("RowKey").and_then(Value::as_str).map(str::to_string),
        ) else {
            return Reply::error(
                400,
                "PropertiesNeedValue",
                "The values are not specified for all properties in the entity.",
            );
        };
        let key = (pk, rk);
        if table.contains_key(&key) {
            return Reply::error(409, "EntityAlreadyExists", "The specified entity already exists.");
        }
        let etag = self.stamp(&mut row, &key);
        table.insert(key, row.clone());
        if request.prefer == Some("return-no-content") {
            Reply::new(204).with_header("etag", &etag)
        } else {
            Reply::json(201, &Value::Object(row)).with_header("etag", &etag)
        }
    }

    /// Sets keys, timestamp and a fresh ETag on a stored row.
    fn stamp(&self, row: &mut Row, key: &(String, String)) -> String {
        let etag = self.next_etag();
        row.insert("PartitionKey".to_string(), Value::String(key.0.clone()));
        row.insert("RowKey".to_string(), Value::String(key.1.clone()));
        row.insert(
            "Timestamp".to_string(),
            Value::String(Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()),
        );
        row.insert("odata.etag".to_string(), Value::String(etag.clone()));
        etag
    }

    fn batch(
        &self,
        tables: &mut BTreeMap<String, Table>,
        content_type: &str,
        body: &[u8],
    ) -> Reply {
        if body.len() > MAX_BATCH_SIZE {
            return Reply::error(
                413,
                "RequestBodyTooLarge",
                "The request body is too large and exceeds the maximum permissible limit.",
            );
        }
        let Some(boundary) = multipart_boundary(content_type) else {
            return Reply::error(400, "InvalidInput", "The batch request has no boundary.");
        };
        let text = String::from_utf8_lossy(body);
        let mut parts = Vec::new();
        let mut changeset = false;
        split_multipart(&text, boundary, &mut parts, &mut changeset);

        let mut working = tables.clone();
        let mut replies = Vec::with_capacity(parts.len());
        let mut seen_keys = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            let Ok(url) = Url::parse(&part.url) else {
                let reply = Reply::error(400, "InvalidUri", "The requested URI is invalid.");
                return batch_failure(index, reply, changeset);
            };
            if part.body.len() > MAX_ENTITY_SIZE {
                return batch_failure(
                    index,
                    Reply::error(
                        400,
                        "EntityTooLarge",
                        "The entity is larger than the maximum allowed size (1MB).",
                    ),
                    changeset,
                );
            }
            let resource = url
                .path_segments()
                .and_then(|mut s| s.next_back())
                .map(decode)
                .unwrap_or_default();
            let key = match resource.split_once('(') {
                Some((_, rest)) => parse_key(rest.trim_end_matches(')')),
                None => parse_body(part.body.as_bytes()).and_then(|row| {
                    Some((
                        row.get("PartitionKey")?.as_str()?.to_string(),
                        row.get("RowKey")?.as_str()?.to_string(),
                    ))
                }),
            };
            if let Some(key) = key {
                if seen_keys.contains(&key) {
                    return batch_failure(
                        index,
                        Reply::error(
                            400,
                            "InvalidDuplicateRow",
                            "The batch request contains multiple changes with same row key. \
                             An entity can appear only once in a batch request.",
                        ),
                        changeset,
                    );
                }
                seen_keys.push(key);
            }

            let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
            let request = EntityRequest {
                method: &part.method,
                resource: &resource,
                query: &query,
                if_match: part.header("if-match"),
                prefer: part.header("prefer"),
                body: part.body.as_bytes(),
            };
            let reply = self.entity_request(&mut working, &request);
            let retrieve_miss = part.method == "GET" && reply.status == 404;
            if reply.status >= 300 && !retrieve_miss {
                return batch_failure(index, reply, changeset);
            }
            replies.push(reply);
        }

        *tables = working;
        batch_reply(&replies, changeset)
    }
}

#[async_trait]
impl TableTransport for MemoryTableService {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(Recorded {
            method: request.method.to_string(),
            url: request.url.to_string(),
            client_request_id: request.header("x-ms-client-request-id").map(str::to_string),
        });

        let latency = self.faults.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let busy = {
            let mut faults = self.faults.lock();
            if faults.busy_responses > 0 {
                faults.busy_responses -= 1;
                Some(faults.busy_status)
            } else {
                None
            }
        };
        let reply = match busy {
            Some(status) => Reply::error(
                status,
                "ServerBusy",
                "The server is currently unable to receive requests.",
            ),
            None => self.handle(
                request.method.as_str(),
                &request.url,
                &request.headers,
                request.body(),
            ),
        };
        Ok(reply.into_response())
    }
}

struct EntityRequest<'a> {
    method: &'a str,
    resource: &'a str,
    query: &'a BTreeMap<String, String>,
    if_match: Option<&'a str>,
    prefer: Option<&'a str>,
    body: &'a [u8],
}

#[derive(Debug, Clone)]
struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), JSON_CONTENT_TYPE.to_string())],
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    fn error(status: u16, code: &str, message: &str) -> Self {
        Self::json(
            status,
            &json!({
                "odata.error": {
                    "code": code,
                    "message": { "lang": "en-US", "value": message }
                }
            }),
        )
    }

    fn not_found() -> Self {
        Self::error(404, "ResourceNotFound", "The specified resource does not exist.")
    }

    fn invalid_input() -> Self {
        Self::error(400, "InvalidInput", "One of the request inputs is not valid.")
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn reason(&self) -> &'static str {
        http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
    }

    fn into_response(self) -> TransportResponse {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes());
            if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
                headers.insert(name, value);
            }
        }
        headers.insert(
            "x-ms-request-id",
            HeaderValue::from_static("00000000-0000-0000-0000-000000000001"),
        );
        TransportResponse {
            status: self.status,
            headers,
            body: self.body,
        }
    }

    /// Writes this reply as an embedded `application/http` response.
    fn write_embedded(&self, out: &mut String, content_id: Option<usize>) {
        out.push_str("Content-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\n");
        out.push_str(&format!("HTTP/1.1 {} {}\r\n", self.status, self.reason()));
        if let Some(id) = content_id {
            out.push_str(&format!("Content-ID: {id}\r\n"));
        }
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(&String::from_utf8_lossy(&self.body));
        out.push_str("\r\n");
    }
}

/// Rejects the whole changeset, naming the failing operation in the message.
fn batch_failure(index: usize, mut reply: Reply, changeset: bool) -> Reply {
    if let Ok(mut value) = serde_json::from_slice::<Value>(&reply.body)
        && let Some(message) = value.pointer_mut("/odata.error/message/value")
        && let Some(text) = message.as_str().map(str::to_string)
    {
        *message = Value::String(format!("{index}:{text}"));
        reply.body = serde_json::to_vec(&value).unwrap_or_default();
    }
    batch_reply(&[reply], changeset)
}

fn batch_reply(replies: &[Reply], changeset: bool) -> Reply {
    let batch = format!("batchresponse_{}", uuid::Uuid::new_v4());
    let mut out = String::new();
    if changeset {
        let changeset = format!("changesetresponse_{}", uuid::Uuid::new_v4());
        out.push_str(&format!("--{batch}\r\n"));
        out.push_str(&format!("Content-Type: multipart/mixed; boundary={changeset}\r\n\r\n"));
        for (index, reply) in replies.iter().enumerate() {
            out.push_str(&format!("--{changeset}\r\n"));
            reply.write_embedded(&mut out, Some(index));
        }
        out.push_str(&format!("--{changeset}--\r\n"));
    } else {
        for reply in replies {
            out.push_str(&format!("--{batch}\r\n"));
            reply.write_embedded(&mut out, None);
        }
    }
    out.push_str(&format!("--{batch}--\r\n"));

    Reply {
        status: 202,
        headers: vec![(
            "content-type".to_string(),
            format!("multipart/mixed; boundary={batch}"),
        )],
        body: out.into_bytes(),
    }
}

/// One sub-request of a batch.
struct Part {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Part {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn multipart_boundary(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .find_map(|p| p.trim().strip_prefix("boundary="))
}

fn split_multipart(text: &str, boundary: &str, parts: &mut Vec<Part>, changeset: &mut bool) {
    let delimiter = format!("--{boundary}");
    for section in text.split(delimiter.as_str()).skip(1) {
        if section.starts_with("--") {
            return;
        }
        let section = section.trim_start_matches("\r\n");
        let Some((mime, content)) = section.split_once("\r\n\r\n") else {
            continue;
        };
        if let Some(nested) = mime
            .lines()
            .find(|l| l.to_ascii_lowercase().starts_with("content-type: multipart/mixed"))
            .and_then(multipart_boundary)
        {
            *changeset = true;
            split_multipart(content, nested, parts, changeset);
            continue;
        }
        let (head, body) = content.split_once("\r\n\r\n").unwrap_or((content, ""));
        let mut lines = head.lines();
        let mut request_line = lines.next().unwrap_or_default().split(' ');
        let method = request_line.next().unwrap_or_default().to_string();
        let url = request_line.next().unwrap_or_default().to_string();
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
            .collect();
        parts.push(Part {
            method,
            url,
            headers,
            body: body.strip_suffix("\r\n").unwrap_or(body).to_string(),
        });
    }
}

fn decode(segment: &str) -> String {
    url::form_urlencoded::parse(format!("k={}", segment.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Parses `PartitionKey='a',RowKey='b'`.
fn parse_key(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix("PartitionKey='")?;
    let (pk, rest) = read_quoted(rest)?;
    let rest = rest.strip_prefix(",RowKey='")?;
    let (rk, _) = read_quoted(rest)?;
    Some((pk, rk))
}

/// Reads up to the closing quote, undoubling embedded quotes.
fn read_quoted(text: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                value.push('\'');
            } else {
                return Some((value, &text[i + 1..]));
            }
        } else {
            value.push(c);
        }
    }
    None
}

fn parse_body(body: &[u8]) -> Option<Row> {
    match serde_json::from_slice::<Value>(body).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Keeps system properties and the selected columns that exist.
fn project(row: &Row, select: Option<&String>) -> Row {
    let Some(select) = select else {
        return row.clone();
    };
    let columns: Vec<&str> = select.split(',').map(str::trim).collect();
    row.iter()
        .filter(|(name, _)| {
            let base = name.split('@').next().unwrap_or_default();
            name.starts_with("odata.") || columns.contains(&base)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn list_tables(tables: &BTreeMap<String, Table>, query: &BTreeMap<String, String>) -> Reply {
    let filter = query.get("$filter").map(|f| parse_filter(f));
    let top = page_size(query, None);
    let start = query.get("NextTableName").cloned().unwrap_or_default();

    let mut names = tables
        .keys()
        .filter(|name| name.as_str() >= start.as_str())
        .filter(|name| match &filter {
            Some(Some(expr)) => {
                let mut row = Row::new();
                row.insert("TableName".to_string(), Value::String((*name).clone()));
                expr.eval(&row)
            }
            Some(None) => false,
            None => true,
        });
    let page: Vec<Value> = names
        .by_ref()
        .take(top)
        .map(|name| json!({ "TableName": name }))
        .collect();
    let mut reply = Reply::json(200, &json!({ "value": page }));
    if let Some(next) = names.next() {
        reply = reply.with_header("x-ms-continuation-nexttablename", next);
    }
    reply
}

fn page_size(query: &BTreeMap<String, String>, cap: Option<usize>) -> usize {
    let requested = query
        .get("$top")
        .and_then(|t| t.parse::<usize>().ok())
        .unwrap_or(MAX_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    cap.map_or(requested, |cap| requested.min(cap))
}

fn query_entities(table: &Table, query: &BTreeMap<String, String>, cap: Option<usize>) -> Reply {
    let filter = match query.get("$filter").map(|f| parse_filter(f)) {
        Some(None) => {
            return Reply::invalid_input();
        }
        Some(Some(expr)) => Some(expr),
        None => None,
    };
    let top = page_size(query, cap);
    let start = (
        query.get("NextPartitionKey").cloned().unwrap_or_default(),
        query.get("NextRowKey").cloned().unwrap_or_default(),
    );

    let mut rows = table
        .range(start..)
        .filter(|(_, row)| filter.as_ref().is_none_or(|f| f.eval(row)));
    let page: Vec<Value> = rows
        .by_ref()
        .take(top)
        .map(|(_, row)| Value::Object(project(row, query.get("$select"))))
        .collect();
    let mut reply = Reply::json(200, &json!({ "value": page }));
    if let Some(((pk, rk), _)) = rows.next() {
        reply = reply
            .with_header("x-ms-continuation-nextpartitionkey", pk)
            .with_header("x-ms-continuation-nextrowkey", rk);
    }
    reply
}

/// Filter expression tree.
#[derive(Debug)]
enum Filter {
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
    Compare(String, String, Literal),
}

#[derive(Debug, Clone)]
enum Literal {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Filter {
    fn eval(&self, row: &Row) -> bool {
        match self {
            Filter::And(l, r) => l.eval(row) && r.eval(row),
            Filter::Or(l, r) => l.eval(row) || r.eval(row),
            Filter::Not(inner) => !inner.eval(row),
            Filter::Compare(property, op, literal) => {
                let Some(value) = row.get(property) else {
                    return false;
                };
                let ordering = match (value, literal) {
                    (Value::String(s), Literal::Text(t)) => s.as_str().partial_cmp(t.as_str()),
                    (Value::String(s), Literal::Number(n)) => {
                        s.parse::<f64>().ok().and_then(|v| v.partial_cmp(n))
                    }
                    (Value::Number(v), Literal::Number(n)) => {
                        v.as_f64().and_then(|v| v.partial_cmp(n))
                    }
                    (Value::Bool(b), Literal::Bool(l)) => b.partial_cmp(l),
                    _ => None,
                };
                let Some(ordering) = ordering else {
                    return false;
                };
                match op.as_str() {
                    "eq" => ordering.is_eq(),
                    "ne" => ordering.is_ne(),
                    "gt" => ordering.is_gt(),
                    "ge" => ordering.is_ge(),
                    "lt" => ordering.is_lt(),
                    "le" => ordering.is_le(),
                    _ => false,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Word(String),
    Literal(LiteralToken),
}

#[derive(Debug, Clone, PartialEq)]
enum LiteralToken {
    Text(String),
    Number(f64),
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::Open);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::Close);
            i += 1;
        } else if c == '\'' {
            let (value, next) = quoted(&chars, i + 1)?;
            tokens.push(Token::Literal(LiteralToken::Text(value)));
            i = next;
        } else if c.is_ascii_digit()
            || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let start = i;
            i += 1;
            while i < chars.len()
                && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'E' | 'e'))
            {
                i += 1;
            }
            let number: String = chars[start..i].iter().collect();
            if chars.get(i) == Some(&'L') {
                i += 1;
            }
            tokens.push(Token::Literal(LiteralToken::Number(number.parse().ok()?)));
        } else {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            if i == start {
                return None;
            }
            let word: String = chars[start..i].iter().collect();
            // Typed literals: guid'..', datetime'..'
            if chars.get(i) == Some(&'\'') && matches!(word.as_str(), "guid" | "datetime" | "X") {
                let (value, next) = quoted(&chars, i + 1)?;
                tokens.push(Token::Literal(LiteralToken::Text(value)));
                i = next;
            } else {
                tokens.push(Token::Word(word));
            }
        }
    }
    Some(tokens)
}

fn quoted(chars: &[char], mut i: usize) -> Option<(String, usize)> {
    let mut value = String::new();
    loop {
        match chars.get(i)? {
            '\'' if chars.get(i + 1) == Some(&'\'') => {
                value.push('\'');
                i += 2;
            }
            '\'' => return Some((value, i + 1)),
            c => {
                value.push(*c);
                i += 1;
            }
        }
    }
}

fn parse_filter(text: &str) -> Option<Filter> {
    let tokens = tokenize(text)?;
    let mut pos = 0;
    let filter = parse_or(&tokens, &mut pos)?;
    (pos == tokens.len()).then_some(filter)
}

fn parse_or(tokens: &[Token], pos: &mut usize) -> Option<Filter> {
    let mut left = parse_and(tokens, pos)?;
    while matches!(tokens.get(*pos), Some(Token::Word(w)) if w == "or") {
        *pos += 1;
        let right = parse_and(tokens, pos)?;
        left = Filter::Or(Box::new(left), Box::new(right));
    }
    Some(left)
}

fn parse_and(tokens: &[Token], pos: &mut usize) -> Option<Filter> {
    let mut left = parse_primary(tokens, pos)?;
    while matches!(tokens.get(*pos), Some(Token::Word(w)) if w == "and") {
        *pos += 1;
        let right = parse_primary(tokens, pos)?;
        left = Filter::And(Box::new(left), Box::new(right));
    }
    Some(left)
}

fn parse_primary(tokens: &[Token], pos: &mut usize) -> Option<Filter> {
    match tokens.get(*pos)? {
        Token::Open => {
            *pos += 1;
            let inner = parse_or(tokens, pos)?;
            if tokens.get(*pos) != Some(&Token::Close) {
                return None;
            }
            *pos += 1;
            Some(inner)
        }
        Token::Word(w) if w == "not" => {
            *pos += 1;
            Some(Filter::Not(Box::new(parse_primary(tokens, pos)?)))
        }
        Token::Word(property) => {
            let Token::Word(op) = tokens.get(*pos + 1)? else {
                return None;
            };
            let literal = match tokens.get(*pos + 2)? {
                Token::Literal(LiteralToken::Text(t)) => Literal::Text(t.clone()),
                Token::Literal(LiteralToken::Number(n)) => Literal::Number(*n),
                Token::Word(w) if w == "true" => Literal::Bool(true),
                Token::Word(w) if w == "false" => Literal::Bool(false),
                _ => return None,
            };
            *pos += 3;
            Some(Filter::Compare(property.clone(), op.clone(), literal))
        }
        _ => None,
    }
}

/// A client over `service` that retries quickly.
pub fn client(service: &Arc<MemoryTableService>) -> TableServiceClient {
    client_with(service, fast_config())
}

pub fn client_with(
    service: &Arc<MemoryTableService>,
    config: TableClientConfig,
) -> TableServiceClient {
    init_tracing();
    TableServiceClient::with_transport(config, Arc::clone(service) as Arc<dyn TableTransport>)
        .expect("valid test configuration")
}

/// Routes engine logs to the test output; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fast_config() -> TableClientConfig {
    let mut config = TableClientConfig::new(PRIMARY);
    config.retry = RetryConfig {
        delta_backoff: Duration::from_millis(5),
        min_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(50),
        ..RetryConfig::default()
    };
    config
}

/// Creates a table with a unique name.
pub async fn new_table(client: &TableServiceClient) -> helios_tablestore::TableClient {
    let name = format!("t{}", uuid::Uuid::new_v4().simple());
    let table = client.table(name);
    table.create(None).await.expect("create table");
    table
}
