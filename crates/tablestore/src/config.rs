//! Client configuration and per-request options.
//!
//! [`TableClientConfig`] holds the account-wide defaults. Any of them can be
//! overridden for a single call with [`TableRequestOptions`]; the two are
//! layered into the effective options the engine executes with.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::continuation::StorageLocation;
use crate::engine::context::OperationContext;
use crate::engine::retry::{ExponentialRetry, LinearRetry, NoRetry, RetryPolicy};
use crate::entity::EdmType;
use crate::error::{BoxError, TableError, TableResult};

/// Largest page the service returns for a single query segment.
pub const MAX_RESULTS_PER_SEGMENT: u32 = 1000;

/// Payload format negotiated with the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// JSON with minimal metadata; non-string types are annotated inline.
    #[default]
    Json,
    /// JSON without any type annotations. Use a [`PropertyResolver`] to
    /// recover types that JSON cannot express.
    JsonNoMetadata,
    /// JSON with full metadata, including types for every property.
    JsonFullMetadata,
    /// AtomPub XML.
    AtomPub,
}

impl PayloadFormat {
    pub(crate) fn accept_header(&self) -> &'static str {
        match self {
            PayloadFormat::Json => "application/json;odata=minimalmetadata",
            PayloadFormat::JsonNoMetadata => "application/json;odata=nometadata",
            PayloadFormat::JsonFullMetadata => "application/json;odata=fullmetadata",
            PayloadFormat::AtomPub => {
                "application/atom+xml,application/atomsvc+xml,application/xml"
            }
        }
    }

    pub(crate) fn content_type(&self) -> &'static str {
        match self {
            PayloadFormat::AtomPub => "application/atom+xml",
            _ => "application/json",
        }
    }

    pub(crate) fn is_json(&self) -> bool {
        !matches!(self, PayloadFormat::AtomPub)
    }
}

/// Which endpoint(s) a request may be sent to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    #[default]
    PrimaryOnly,
    SecondaryOnly,
    PrimaryThenSecondary,
    SecondaryThenPrimary,
}

impl LocationMode {
    /// Location of the first attempt.
    pub fn initial_location(&self) -> StorageLocation {
        match self {
            LocationMode::PrimaryOnly | LocationMode::PrimaryThenSecondary => {
                StorageLocation::Primary
            }
            LocationMode::SecondaryOnly | LocationMode::SecondaryThenPrimary => {
                StorageLocation::Secondary
            }
        }
    }

    /// Whether retries alternate between the two endpoints.
    pub fn alternates(&self) -> bool {
        matches!(
            self,
            LocationMode::PrimaryThenSecondary | LocationMode::SecondaryThenPrimary
        )
    }

    fn uses_secondary(&self) -> bool {
        !matches!(self, LocationMode::PrimaryOnly)
    }
}

/// Credentials attached to every request.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// No authentication.
    #[default]
    Anonymous,
    /// Shared access signature appended to the query string.
    SasToken {
        /// Token without the leading `?`.
        token: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::SasToken { .. } => f.write_str("SasToken { token: \"***\" }"),
        }
    }
}

/// Backoff strategy used between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    #[default]
    Exponential,
    Linear,
    None,
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff strategy.
    #[serde(default)]
    pub kind: RetryKind,

    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay. Linear retry waits exactly this long; exponential retry
    /// multiplies it by `2^n - 1`.
    #[serde(with = "humantime_serde", default = "default_delta_backoff")]
    pub delta_backoff: Duration,

    /// Floor added to every exponential delay.
    #[serde(with = "humantime_serde", default = "default_min_backoff")]
    pub min_backoff: Duration,

    /// Ceiling for any single delay.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delta_backoff() -> Duration {
    Duration::from_secs(4)
}

fn default_min_backoff() -> Duration {
    Duration::from_secs(3)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(120)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            kind: RetryKind::default(),
            max_attempts: default_max_attempts(),
            delta_backoff: default_delta_backoff(),
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn none() -> Self {
        Self {
            kind: RetryKind::None,
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Linear retry with a fixed delay.
    pub fn linear(delta_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            kind: RetryKind::Linear,
            max_attempts,
            delta_backoff,
            ..Default::default()
        }
    }

    /// Builds the policy described by this configuration.
    pub fn build_policy(&self) -> Arc<dyn RetryPolicy> {
        match self.kind {
            RetryKind::Exponential => Arc::new(ExponentialRetry::new(
                self.delta_backoff,
                self.min_backoff,
                self.max_backoff,
                self.max_attempts,
            )),
            RetryKind::Linear => Arc::new(LinearRetry::new(self.delta_backoff, self.max_attempts)),
            RetryKind::None => Arc::new(NoRetry),
        }
    }

    fn validate(&self) -> TableResult<()> {
        if self.kind == RetryKind::None {
            return Ok(());
        }
        if self.max_backoff < self.min_backoff {
            return Err(TableError::invalid_argument(
                "retry.max_backoff",
                "max_backoff must be >= min_backoff",
            ));
        }
        if self.kind == RetryKind::Linear && self.delta_backoff > self.max_backoff {
            return Err(TableError::invalid_argument(
                "retry.delta_backoff",
                "delta_backoff must be <= max_backoff",
            ));
        }
        Ok(())
    }
}

/// Configuration for a table service client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableClientConfig {
    /// Base URL of the primary endpoint, e.g. `https://account.table.core.windows.net`.
    pub primary_endpoint: String,

    /// Base URL of the read-only secondary endpoint.
    #[serde(default)]
    pub secondary_endpoint: Option<String>,

    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default)]
    pub payload_format: PayloadFormat,

    /// Per-request timeout the service enforces, sent as `timeout=<seconds>`.
    #[serde(with = "humantime_serde::option", default)]
    pub server_timeout: Option<Duration>,

    /// Budget for a whole logical operation including retries and backoff.
    #[serde(with = "humantime_serde::option", default)]
    pub maximum_execution_time: Option<Duration>,

    #[serde(default)]
    pub location_mode: LocationMode,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Page size hint for segmented queries when the query has no take count.
    #[serde(default)]
    pub max_results_per_segment: Option<u32>,
}

impl Default for TableClientConfig {
    fn default() -> Self {
        Self {
            primary_endpoint: "http://127.0.0.1:10002/devstoreaccount1".to_string(),
            secondary_endpoint: None,
            credentials: Credentials::Anonymous,
            payload_format: PayloadFormat::Json,
            server_timeout: None,
            maximum_execution_time: None,
            location_mode: LocationMode::PrimaryOnly,
            retry: RetryConfig::default(),
            max_results_per_segment: None,
        }
    }
}

impl TableClientConfig {
    /// Creates a configuration for the given primary endpoint.
    pub fn new(primary_endpoint: impl Into<String>) -> Self {
        Self {
            primary_endpoint: primary_endpoint.into(),
            ..Default::default()
        }
    }

    /// Validates configuration invariants.
    pub fn validate(&self) -> TableResult<()> {
        parse_endpoint("primary_endpoint", &self.primary_endpoint)?;

        match self.secondary_endpoint.as_deref() {
            Some(secondary) => {
                parse_endpoint("secondary_endpoint", secondary)?;
            }
            None if self.location_mode.uses_secondary() => {
                return Err(TableError::invalid_argument(
                    "secondary_endpoint",
                    format!(
                        "location mode {:?} requires a secondary endpoint",
                        self.location_mode
                    ),
                ));
            }
            None => {}
        }

        if let Credentials::SasToken { token } = &self.credentials
            && token.trim_start_matches('?').is_empty()
        {
            return Err(TableError::invalid_argument(
                "credentials",
                "SAS token must not be empty",
            ));
        }

        if let Some(max) = self.max_results_per_segment
            && (max == 0 || max > MAX_RESULTS_PER_SEGMENT)
        {
            return Err(TableError::invalid_argument(
                "max_results_per_segment",
                format!("max_results_per_segment must be between 1 and {MAX_RESULTS_PER_SEGMENT}"),
            ));
        }

        if self.server_timeout.is_some_and(|t| t.is_zero()) {
            return Err(TableError::invalid_argument(
                "server_timeout",
                "server_timeout must be > 0",
            ));
        }

        if self.maximum_execution_time.is_some_and(|t| t.is_zero()) {
            return Err(TableError::invalid_argument(
                "maximum_execution_time",
                "maximum_execution_time must be > 0",
            ));
        }

        self.retry.validate()
    }

    pub(crate) fn endpoint(&self, location: StorageLocation) -> TableResult<Url> {
        match location {
            StorageLocation::Primary => parse_endpoint("primary_endpoint", &self.primary_endpoint),
            StorageLocation::Secondary => match self.secondary_endpoint.as_deref() {
                Some(secondary) => parse_endpoint("secondary_endpoint", secondary),
                None => Err(TableError::invalid_operation(
                    "no secondary endpoint is configured",
                )),
            },
        }
    }
}

fn parse_endpoint(name: &str, endpoint: &str) -> TableResult<Url> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(TableError::invalid_argument(name, "endpoint must not be empty"));
    }
    let url = Url::parse(endpoint)
        .map_err(|e| TableError::invalid_argument(name, format!("invalid endpoint: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TableError::invalid_argument(
            name,
            "endpoint must start with http:// or https://",
        ));
    }
    if url.cannot_be_a_base() {
        return Err(TableError::invalid_argument(name, "endpoint must be a base URL"));
    }
    Ok(url)
}

type ResolverFn =
    dyn Fn(&str, &str, &str, &serde_json::Value) -> Result<Option<EdmType>, BoxError> + Send + Sync;

/// Maps `(partition_key, row_key, property_name, raw_value)` to the declared
/// type of a property read from a `JsonNoMetadata` payload.
///
/// Returning `Ok(None)` keeps the type inferred from the JSON value. An error
/// fails the request with [`RequestError::Resolver`](crate::error::RequestError::Resolver).
#[derive(Clone)]
pub struct PropertyResolver(Arc<ResolverFn>);

impl PropertyResolver {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &str, &str, &serde_json::Value) -> Result<Option<EdmType>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn resolve(
        &self,
        partition_key: &str,
        row_key: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<Option<EdmType>, BoxError> {
        (self.0)(partition_key, row_key, name, value)
    }
}

impl fmt::Debug for PropertyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PropertyResolver")
    }
}

/// Per-request overrides layered over [`TableClientConfig`].
#[derive(Clone, Default)]
pub struct TableRequestOptions {
    pub payload_format: Option<PayloadFormat>,
    pub server_timeout: Option<Duration>,
    pub maximum_execution_time: Option<Duration>,
    pub location_mode: Option<LocationMode>,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub property_resolver: Option<PropertyResolver>,
    /// Overrides the echo-content flag of insert operations.
    pub echo_content: Option<bool>,
    /// Receives the attempt log and carries the cancellation token. A fresh
    /// context is used when unset.
    pub operation_context: Option<OperationContext>,
}

impl fmt::Debug for TableRequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRequestOptions")
            .field("payload_format", &self.payload_format)
            .field("server_timeout", &self.server_timeout)
            .field("maximum_execution_time", &self.maximum_execution_time)
            .field("location_mode", &self.location_mode)
            .field("retry_policy", &self.retry_policy.as_ref().map(|_| "custom"))
            .field("property_resolver", &self.property_resolver)
            .field("echo_content", &self.echo_content)
            .field("operation_context", &self.operation_context)
            .finish()
    }
}

impl TableRequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = Some(format);
        self
    }

    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = Some(timeout);
        self
    }

    pub fn with_maximum_execution_time(mut self, max: Duration) -> Self {
        self.maximum_execution_time = Some(max);
        self
    }

    pub fn with_location_mode(mut self, mode: LocationMode) -> Self {
        self.location_mode = Some(mode);
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_property_resolver(mut self, resolver: PropertyResolver) -> Self {
        self.property_resolver = Some(resolver);
        self
    }

    pub fn with_echo_content(mut self, echo: bool) -> Self {
        self.echo_content = Some(echo);
        self
    }

    pub fn with_operation_context(mut self, context: OperationContext) -> Self {
        self.operation_context = Some(context);
        self
    }

    pub(crate) fn context(&self) -> OperationContext {
        self.operation_context.clone().unwrap_or_default()
    }

    /// Layers these options over the client defaults.
    pub(crate) fn resolve(
        &self,
        config: &TableClientConfig,
        default_retry: &Arc<dyn RetryPolicy>,
    ) -> RequestOptions {
        RequestOptions {
            payload_format: self.payload_format.unwrap_or(config.payload_format),
            server_timeout: self.server_timeout.or(config.server_timeout),
            maximum_execution_time: self
                .maximum_execution_time
                .or(config.maximum_execution_time),
            location_mode: self.location_mode.unwrap_or(config.location_mode),
            retry_policy: self
                .retry_policy
                .clone()
                .unwrap_or_else(|| Arc::clone(default_retry)),
            property_resolver: self.property_resolver.clone(),
            echo_content: self.echo_content,
            max_results_per_segment: config.max_results_per_segment,
        }
    }
}

/// Effective options for a single call.
#[derive(Clone)]
pub(crate) struct RequestOptions {
    pub payload_format: PayloadFormat,
    pub server_timeout: Option<Duration>,
    pub maximum_execution_time: Option<Duration>,
    pub location_mode: LocationMode,
    pub retry_policy: Arc<dyn RetryPolicy>,
    pub property_resolver: Option<PropertyResolver>,
    pub echo_content: Option<bool>,
    pub max_results_per_segment: Option<u32>,
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
