//! The attempt loop.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use http::StatusCode;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::commands::{BuildEnv, RestCommand};
use super::context::{OperationContext, RequestResult};
use super::pool::BufferPool;
use super::request::{ETAG, RequestEnv, X_MS_REQUEST_ID, build_request};
use super::retry::RetryContext;
use super::transport::{TableTransport, TransportError};
use crate::config::{LocationMode, RequestOptions, TableClientConfig};
use crate::continuation::StorageLocation;
use crate::error::{OperationTimedOut, RequestError, TableError, TableResult, error_codes};
use crate::wire::error::{ERROR_CODE_HEADER, parse_error};

/// Runs commands against the configured endpoints.
pub(crate) struct Executor {
    config: Arc<TableClientConfig>,
    transport: Arc<dyn TableTransport>,
    pool: BufferPool,
}

impl Executor {
    pub fn new(config: Arc<TableClientConfig>, transport: Arc<dyn TableTransport>) -> Self {
        Self {
            config,
            transport,
            pool: BufferPool::new(),
        }
    }

    pub fn config(&self) -> &TableClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Executes a command, retrying transient failures until the policy
    /// gives up, the time budget runs out or the caller cancels.
    pub async fn execute<C: RestCommand>(
        &self,
        command: &C,
        options: &RequestOptions,
        context: &OperationContext,
    ) -> TableResult<C::Output> {
        let read_only = command.is_read_only();
        let mode = options.location_mode;
        if !read_only && mode == LocationMode::SecondaryOnly {
            return Err(RequestError::PrimaryOnlyCommand {
                command: command.name().to_string(),
            }
            .into());
        }
        let mut location = initial_location(command, mode)?;

        let started = Instant::now();
        let deadline = options.maximum_execution_time.map(|max| started + max);
        let mut retry_count = 0u32;

        loop {
            if context.is_cancelled() {
                return Err(RequestError::Cancelled.into());
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(timed_out(options, started));
                    }
                    Some(remaining)
                }
                None => None,
            };

            debug!(
                command = command.name(),
                attempt = retry_count + 1,
                location = %location,
                "sending request"
            );
            let attempt_start = Utc::now();
            let attempt = cancellable(context, self.attempt(command, options, context, location));
            let outcome = match remaining {
                Some(remaining) => match tokio::time::timeout(remaining, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        context.record(abandoned(
                            attempt_start,
                            location,
                            error_codes::OPERATION_TIMED_OUT,
                            "the maximum execution time elapsed",
                        ));
                        return Err(timed_out(options, started));
                    }
                },
                None => attempt.await,
            };

            let error = match outcome {
                Ok(output) => return Ok(output),
                Err(TableError::Request(RequestError::Cancelled)) => {
                    context.record(abandoned(
                        attempt_start,
                        location,
                        "OperationCanceled",
                        "the operation was cancelled",
                    ));
                    return Err(RequestError::Cancelled.into());
                }
                Err(error) => error,
            };

            let retry = RetryContext {
                current_retry_count: retry_count,
                last_status: error.status_code(),
                last_location: location,
                location_mode: mode,
                read_only,
            };
            let Some(info) = options.retry_policy.evaluate(&retry, &error) else {
                return Err(error);
            };
            if let Some(deadline) = deadline
                && Instant::now() + info.delay >= deadline
            {
                return Err(timed_out(options, started));
            }

            warn!(
                command = command.name(),
                attempt = retry_count + 1,
                delay_ms = info.delay.as_millis() as u64,
                error = %error,
                "request failed, retrying"
            );
            cancellable(context, async {
                sleep(info.delay).await;
                Ok(())
            })
            .await?;

            if command.pinned_location().is_none() {
                location = allowed_location(info.target_location, read_only, mode);
            }
            retry_count += 1;
        }
    }

    async fn attempt<C: RestCommand>(
        &self,
        command: &C,
        options: &RequestOptions,
        context: &OperationContext,
        location: StorageLocation,
    ) -> TableResult<C::Output> {
        let start_time = Utc::now();
        let base_url = self.config.endpoint(location)?;
        let parts = command.build(&BuildEnv {
            base_url: &base_url,
            options,
            pool: &self.pool,
        })?;
        let request = build_request(
            parts,
            &RequestEnv {
                base_url: &base_url,
                options,
                credentials: &self.config.credentials,
                client_request_id: context.client_request_id(),
            },
        )?;

        let sent = self.transport.send(&request).await;
        drop(request);

        let response = match sent {
            Ok(response) => response,
            Err(TransportError { message, source }) => {
                context.record(RequestResult {
                    http_status_code: None,
                    etag: None,
                    service_request_id: None,
                    error_code: None,
                    error_message: Some(message.clone()),
                    start_time,
                    end_time: Utc::now(),
                    target_location: location,
                });
                return Err(RequestError::Transport { message, source }.into());
            }
        };

        let status = response.status;
        let request_id = response.header(X_MS_REQUEST_ID).map(str::to_string);
        let mut record = RequestResult {
            http_status_code: Some(status),
            etag: response.header(ETAG).map(str::to_string),
            service_request_id: request_id.clone(),
            error_code: None,
            error_message: None,
            start_time,
            end_time: Utc::now(),
            target_location: location,
        };
        debug!(command = command.name(), status, location = %location, "received response");

        if !command.accepts(status) {
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or_default();
            let extended = parse_error(&response.body, response.header(ERROR_CODE_HEADER), reason);
            record.error_code = Some(extended.error_code.clone());
            record.error_message = Some(extended.error_message.clone());
            context.record(record);
            return Err(TableError::service(status, extended, request_id, None));
        }

        let parsed = command.parse(response, location, options);
        if let Err(error) = &parsed {
            record.error_code = error.error_code().map(str::to_string);
            record.error_message = Some(error.to_string());
        }
        context.record(record);
        parsed
    }
}

/// Races `future` against the context's cancellation token.
async fn cancellable<T, F>(context: &OperationContext, future: F) -> TableResult<T>
where
    F: Future<Output = TableResult<T>>,
{
    match context.cancellation() {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(RequestError::Cancelled.into()),
                result = future => result,
            }
        }
        None => future.await,
    }
}

fn initial_location<C: RestCommand>(
    command: &C,
    mode: LocationMode,
) -> TableResult<StorageLocation> {
    if !command.is_read_only() {
        return Ok(StorageLocation::Primary);
    }
    match command.pinned_location() {
        Some(pinned) => {
            let allowed = match mode {
                LocationMode::PrimaryOnly => pinned == StorageLocation::Primary,
                LocationMode::SecondaryOnly => pinned == StorageLocation::Secondary,
                _ => true,
            };
            if allowed {
                Ok(pinned)
            } else {
                Err(TableError::invalid_operation(format!(
                    "the continuation token targets the {pinned} location, \
                     which location mode {mode:?} does not allow"
                )))
            }
        }
        None => Ok(mode.initial_location()),
    }
}

fn allowed_location(
    target: StorageLocation,
    read_only: bool,
    mode: LocationMode,
) -> StorageLocation {
    if !read_only {
        return StorageLocation::Primary;
    }
    match mode {
        LocationMode::PrimaryOnly => StorageLocation::Primary,
        LocationMode::SecondaryOnly => StorageLocation::Secondary,
        _ => target,
    }
}

fn abandoned(
    start_time: chrono::DateTime<Utc>,
    location: StorageLocation,
    code: &str,
    message: &str,
) -> RequestResult {
    RequestResult {
        http_status_code: None,
        etag: None,
        service_request_id: None,
        error_code: Some(code.to_string()),
        error_message: Some(message.to_string()),
        start_time,
        end_time: Utc::now(),
        target_location: location,
    }
}

fn timed_out(options: &RequestOptions, started: Instant) -> TableError {
    let max = options.maximum_execution_time.unwrap_or_default();
    RequestError::Timeout {
        max_execution_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
        source: OperationTimedOut {
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        },
    }
    .into()
}
