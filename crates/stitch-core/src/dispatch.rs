use crate::io;
use crate::manifest::Manifest;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_QUEUE_DEPTH: usize = 256;
pub const DEFAULT_DISPATCH_API_BASE: &str = "https://api.github.com";

// ---------------------------------------------------------------------------
// DispatchRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub manifest: Manifest,
    pub manifest_path: String,
    pub initiated_at: DateTime<Utc>,
}

/// The job descriptor handed to the external worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub event_type: String,
    pub payload: DispatchPayload,
}

impl DispatchRecord {
    pub fn scaffold_system(manifest: Manifest) -> Self {
        let manifest_path = format!("manifests/{}.json", manifest.system_name);
        Self {
            event_type: "scaffold-system".to_string(),
            payload: DispatchPayload {
                manifest,
                manifest_path,
                initiated_at: Utc::now(),
            },
        }
    }

    pub fn system_name(&self) -> &str {
        &self.payload.manifest.system_name
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Delivered,
    Skipped,
    Failed,
    Unauthorized,
}

impl DispatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchStatus::Delivered => "delivered",
            DispatchStatus::Skipped => "skipped",
            DispatchStatus::Failed => "failed",
            DispatchStatus::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure of a single delivery attempt. `Unauthorized` is
/// terminal; the other kinds are retried.
#[derive(Debug, Clone)]
pub enum AttemptError {
    Unauthorized,
    Unreachable(String),
    MalformedResponse(String),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Unauthorized => f.write_str("unauthorized"),
            AttemptError::Unreachable(reason) => write!(f, "unreachable: {reason}"),
            AttemptError::MalformedResponse(reason) => {
                write!(f, "malformed downstream response: {reason}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub trait Transport: Send + Sync + 'static {
    /// Whether credentials/configuration exist. Unconfigured transports make
    /// `dispatch` report `skipped` without attempting delivery.
    fn is_configured(&self) -> bool {
        true
    }

    fn deliver(
        &self,
        record: &DispatchRecord,
    ) -> impl Future<Output = std::result::Result<(), AttemptError>> + Send;
}

/// Production transport: a repository-dispatch webhook, a filesystem queue
/// consumed by a local worker, or disabled (development mode).
pub enum StandardTransport {
    Webhook {
        repo: String,
        token: String,
        /// API base, `DEFAULT_DISPATCH_API_BASE` unless overridden
        /// (enterprise hosts, tests).
        base: String,
        client: reqwest::Client,
    },
    FsQueue {
        dir: PathBuf,
    },
    Disabled,
}

impl StandardTransport {
    /// Build from the control-plane environment: `TEMPLATE_REPO` +
    /// `DISPATCH_TOKEN` select the webhook, neither selects disabled.
    pub fn from_env(repo: Option<String>, token: Option<String>, api_base: &str) -> Self {
        match (repo, token) {
            (Some(repo), Some(token)) if !repo.is_empty() && !token.is_empty() => {
                StandardTransport::Webhook {
                    repo,
                    token,
                    base: api_base.trim_end_matches('/').to_string(),
                    client: reqwest::Client::new(),
                }
            }
            _ => StandardTransport::Disabled,
        }
    }
}

impl Transport for StandardTransport {
    fn is_configured(&self) -> bool {
        !matches!(self, StandardTransport::Disabled)
    }

    async fn deliver(&self, record: &DispatchRecord) -> std::result::Result<(), AttemptError> {
        match self {
            StandardTransport::Webhook {
                repo,
                token,
                base,
                client,
            } => {
                let url = format!("{base}/repos/{repo}/dispatches");
                let body = serde_json::json!({
                    "event_type": record.event_type,
                    "client_payload": record.payload,
                });
                let response = client
                    .post(&url)
                    .bearer_auth(token)
                    .header("Accept", "application/vnd.github+json")
                    .header("User-Agent", concat!("stitch/", env!("CARGO_PKG_VERSION")))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| AttemptError::Unreachable(e.to_string()))?;

                match response.status().as_u16() {
                    200..=299 => Ok(()),
                    401 | 403 => Err(AttemptError::Unauthorized),
                    status => Err(AttemptError::MalformedResponse(format!(
                        "unexpected status {status}"
                    ))),
                }
            }
            StandardTransport::FsQueue { dir } => {
                let name = format!("{}-{}.json", record.event_type, Uuid::new_v4());
                let data = serde_json::to_vec_pretty(record)
                    .map_err(|e| AttemptError::MalformedResponse(e.to_string()))?;
                io::atomic_write(&dir.join(name), &data)
                    .map_err(|e| AttemptError::Unreachable(e.to_string()))
            }
            StandardTransport::Disabled => Err(AttemptError::Unreachable(
                "transport disabled".to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `next` (1-based): 500ms, 1s, 2s, ... capped.
    fn backoff_before(&self, next: u32) -> Duration {
        let exp = next.saturating_sub(2).min(16);
        self.base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.cap)
    }
}

// ---------------------------------------------------------------------------
// Dispatch log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub system_name: String,
    pub attempt: u32,
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn append_log(path: &PathBuf, entry: DispatchLogEntry) {
    let result = io::with_file_lock(path, || {
        // Best-effort log: a corrupt file is restarted, not defended.
        let mut entries: Vec<DispatchLogEntry> = std::fs::read(path)
            .ok()
            .and_then(|data| serde_json::from_slice(&data).ok())
            .unwrap_or_default();
        entries.push(entry);
        io::atomic_write(path, &serde_json::to_vec_pretty(&entries)?)?;
        Ok(())
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to update dispatch log");
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Forwards dispatch records to the external job system with bounded
/// exponential backoff. The caller sees only the first attempt's outcome;
/// remaining attempts run detached and land in the dispatch log.
pub struct Dispatcher<T: Transport> {
    transport: T,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    log_path: Option<PathBuf>,
    retry_slots: std::sync::Arc<tokio::sync::Semaphore>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            log_path: None,
            retry_slots: std::sync::Arc::new(tokio::sync::Semaphore::new(
                DEFAULT_RETRY_QUEUE_DEPTH,
            )),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Log retry outcomes to `<state_dir>/dispatch_log.json`.
    pub fn with_log_dir(mut self, state_dir: &std::path::Path) -> Self {
        self.log_path = Some(state_dir.join(paths::DISPATCH_LOG_FILE));
        self
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_configured()
    }

    async fn attempt(&self, record: &DispatchRecord) -> std::result::Result<(), AttemptError> {
        match tokio::time::timeout(self.attempt_timeout, self.transport.deliver(record)).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Unreachable(format!(
                "attempt timed out after {:?}",
                self.attempt_timeout
            ))),
        }
    }

    fn log(&self, record: &DispatchRecord, attempt: u32, status: DispatchStatus, error: Option<String>) {
        if let Some(path) = &self.log_path {
            append_log(
                path,
                DispatchLogEntry {
                    timestamp: Utc::now(),
                    event_type: record.event_type.clone(),
                    system_name: record.system_name().to_string(),
                    attempt,
                    status,
                    error,
                },
            );
        }
    }

    /// Run the full retry schedule to completion. Used by the background
    /// retry path and directly by tests.
    pub async fn dispatch(&self, record: &DispatchRecord) -> DispatchStatus {
        if !self.transport.is_configured() {
            return DispatchStatus::Skipped;
        }
        self.dispatch_from(record, 1).await
    }

    async fn dispatch_from(&self, record: &DispatchRecord, first_attempt: u32) -> DispatchStatus {
        for attempt in first_attempt..=self.policy.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.backoff_before(attempt)).await;
            }
            match self.attempt(record).await {
                Ok(()) => {
                    self.log(record, attempt, DispatchStatus::Delivered, None);
                    return DispatchStatus::Delivered;
                }
                Err(AttemptError::Unauthorized) => {
                    self.log(
                        record,
                        attempt,
                        DispatchStatus::Unauthorized,
                        Some("unauthorized".into()),
                    );
                    return DispatchStatus::Unauthorized;
                }
                Err(err) => {
                    tracing::warn!(
                        system = record.system_name(),
                        attempt,
                        error = %err,
                        "dispatch attempt failed"
                    );
                    self.log(record, attempt, DispatchStatus::Failed, Some(err.to_string()));
                }
            }
        }
        DispatchStatus::Failed
    }
}

impl<T: Transport> Dispatcher<T> {
    /// One attempt now; on retryable failure, the remaining schedule runs as
    /// a detached task. The returned status reflects the first attempt only.
    pub async fn dispatch_detached(self: std::sync::Arc<Self>, record: DispatchRecord) -> DispatchStatus {
        if !self.transport.is_configured() {
            return DispatchStatus::Skipped;
        }
        match self.attempt(&record).await {
            Ok(()) => {
                self.log(&record, 1, DispatchStatus::Delivered, None);
                DispatchStatus::Delivered
            }
            Err(AttemptError::Unauthorized) => {
                self.log(&record, 1, DispatchStatus::Unauthorized, Some("unauthorized".into()));
                DispatchStatus::Unauthorized
            }
            Err(err) => {
                self.log(&record, 1, DispatchStatus::Failed, Some(err.to_string()));
                // Bounded retry set: overflow is logged and dropped rather
                // than queued without limit.
                match self.retry_slots.clone().try_acquire_owned() {
                    Ok(permit) => {
                        let dispatcher = self.clone();
                        tokio::spawn(async move {
                            let status = dispatcher.dispatch_from(&record, 2).await;
                            drop(permit);
                            tracing::info!(
                                system = record.system_name(),
                                status = %status,
                                "background dispatch retries finished"
                            );
                        });
                    }
                    Err(_) => {
                        tracing::warn!(
                            system = record.system_name(),
                            "retry queue full, dropping background retries"
                        );
                    }
                }
                DispatchStatus::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
