//! Per-call diagnostics and cancellation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::continuation::StorageLocation;

/// Outcome of one HTTP attempt.
#[derive(Debug, Clone)]
pub struct RequestResult {
    /// `None` when no response was received.
    pub http_status_code: Option<u16>,
    pub etag: Option<String>,
    /// `x-ms-request-id` assigned by the service.
    pub service_request_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub target_location: StorageLocation,
}

/// Tracks the attempts of a logical operation.
///
/// Clones share the same attempt log, so a context can be handed to a call
/// and inspected afterwards.
#[derive(Debug, Clone)]
pub struct OperationContext {
    client_request_id: String,
    cancellation: Option<CancellationToken>,
    results: Arc<Mutex<Vec<RequestResult>>>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationContext {
    /// Creates a context with a random client request id.
    pub fn new() -> Self {
        Self {
            client_request_id: Uuid::new_v4().to_string(),
            cancellation: None,
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sets the id sent as `x-ms-client-request-id`.
    pub fn with_client_request_id(mut self, id: impl Into<String>) -> Self {
        self.client_request_id = id.into();
        self
    }

    /// Attaches a cancellation token. Once it fires, the in-flight attempt
    /// is abandoned and no further attempts are made.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn client_request_id(&self) -> &str {
        &self.client_request_id
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Every attempt recorded so far, oldest first.
    pub fn request_results(&self) -> Vec<RequestResult> {
        self.results.lock().clone()
    }

    pub fn last_result(&self) -> Option<RequestResult> {
        self.results.lock().last().cloned()
    }

    /// Number of HTTP attempts made.
    pub fn attempt_count(&self) -> usize {
        self.results.lock().len()
    }

    pub(crate) fn record(&self, result: RequestResult) {
        self.results.lock().push(result);
    }
}
