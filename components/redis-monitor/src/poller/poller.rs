//! Poller - responsibility and behavior
//!
//! The Poller opens one short-lived connection per Redis target, issues a
//! single `INFO` request and hands the raw reply back to the runtime.
//!
//! Key responsibilities:
//! - Translate a [`RedisTarget`] into connection parameters (address, password,
//! logical database).
//! - Bound every step with the configured connect and request timeouts.
//! - Retry the `INFO` request a bounded number of times when the transport
//! fails, re-establishing the connection with exponential backoff + jitter.
//! - Close the connection explicitly once the reply has been read.
//!
//! Server error replies (for example a rejected password) are not transport
//! failures and fail the request on the first attempt.

// Local crates
use crate::{
    helpers::{load_config::RedisSettings, targets::RedisTarget},
    metrics::metrics::{
        STATUS_POLL_DURATION_SECONDS, STATUS_POLL_FAILURES_TOTAL, STATUS_POLL_RETRIES_TOTAL,
        STATUS_POLLS_TOTAL, observe_duration,
    },
};

// External crates
use async_trait::async_trait;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::instrument;

/// Poller error handling
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("invalid Redis address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("INFO request to {address} failed after {attempts} attempt(s): {source}")]
    Request {
        address: String,
        attempts: u32,
        #[source]
        source: RedisError,
    },
    #[error("INFO request to {address} timed out after {attempts} attempt(s)")]
    Timeout { address: String, attempts: u32 },
}

/// Opens status sessions against Redis targets
#[async_trait]
pub trait StatusConnector: Send + Sync {
    type Session: StatusSession;

    /// Prepare a session for `target`. Network I/O happens on first request.
    async fn connect(&self, target: &RedisTarget) -> Result<Self::Session, PollerError>;
}

/// One open connection to a Redis target
#[async_trait]
pub trait StatusSession: Send + Sized {
    /// Issue `INFO` and return the raw reply
    async fn fetch_info(&mut self) -> Result<String, PollerError>;

    /// Release the connection
    async fn close(self) -> Result<(), PollerError>;
}

/// [`StatusConnector`] backed by the `redis` crate
#[derive(Debug, Clone)]
pub struct RedisPoller {
    settings: RedisSettings,
}

impl RedisPoller {
    pub fn new(settings: RedisSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl StatusConnector for RedisPoller {
    type Session = RedisSession;

    #[instrument(
        name = "redis_monitor_poller::connect",
        target = "poller::poller::RedisPoller",
        skip_all,
        fields(redis_address = %target.address),
        level = "debug"
    )]
    async fn connect(&self, target: &RedisTarget) -> Result<RedisSession, PollerError> {
        let (host, port) = split_address(&target.address)?;

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: target.db,
                password: (!target.password.is_empty()).then(|| target.password.clone()),
                ..RedisConnectionInfo::default()
            },
        };

        let client = redis::Client::open(info).map_err(|e| PollerError::InvalidAddress {
            address: target.address.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Redis client created for target");
        Ok(RedisSession {
            address: target.address.clone(),
            client,
            connection: None,
            settings: self.settings.clone(),
        })
    }
}

/// Connection to one Redis target. The underlying socket is opened lazily by
/// [`StatusSession::fetch_info`] and re-opened on retried attempts.
pub struct RedisSession {
    address: String,
    client: redis::Client,
    connection: Option<MultiplexedConnection>,
    settings: RedisSettings,
}

impl std::fmt::Debug for RedisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSession")
            .field("address", &self.address)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

/// Outcome of a single `INFO` attempt
enum Attempt {
    Reply(String),
    Retryable(AttemptFailure),
    Fatal(RedisError),
}

enum AttemptFailure {
    Redis(RedisError),
    Timeout,
}

impl RedisSession {
    async fn attempt(&mut self) -> Attempt {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let connecting = self.client.get_multiplexed_async_connection_with_timeouts(
                    self.settings.read_timeout(),
                    self.settings.connect_timeout(),
                );
                // Bound the whole dial, including the AUTH/SELECT handshake
                match timeout(self.settings.connect_timeout(), connecting).await {
                    Ok(Ok(connection)) => connection,
                    Ok(Err(e)) => return classify(e),
                    Err(_) => return Attempt::Retryable(AttemptFailure::Timeout),
                }
            }
        };

        let outcome: Result<redis::RedisResult<String>, _> = timeout(
            self.settings.request_timeout(),
            redis::cmd("INFO").query_async(&mut connection),
        )
        .await;

        match outcome {
            Ok(Ok(reply)) => {
                self.connection = Some(connection);
                Attempt::Reply(reply)
            }
            Ok(Err(e)) => {
                // Keep the connection only when the server answered
                if !is_transport_error(&e) {
                    self.connection = Some(connection);
                }
                classify(e)
            }
            Err(_) => Attempt::Retryable(AttemptFailure::Timeout),
        }
    }
}

#[async_trait]
impl StatusSession for RedisSession {
    #[instrument(
        name = "redis_monitor_poller::fetch_info",
        target = "poller::poller::RedisSession",
        skip_all,
        fields(redis_address = %self.address),
        level = "debug"
    )]
    async fn fetch_info(&mut self) -> Result<String, PollerError> {
        let started = Instant::now();
        let max_attempts = self.settings.max_retries + 1;
        let mut attempts = 0;

        let result = loop {
            attempts += 1;

            let failure = match self.attempt().await {
                Attempt::Reply(reply) => break Ok(reply),
                Attempt::Fatal(source) => {
                    break Err(PollerError::Request {
                        address: self.address.clone(),
                        attempts,
                        source,
                    });
                }
                Attempt::Retryable(failure) => failure,
            };

            if attempts >= max_attempts {
                tracing::debug!(
                    attempts,
                    "Exceeded configured max_retries for INFO request"
                );
                break Err(match failure {
                    AttemptFailure::Redis(source) => PollerError::Request {
                        address: self.address.clone(),
                        attempts,
                        source,
                    },
                    AttemptFailure::Timeout => PollerError::Timeout {
                        address: self.address.clone(),
                        attempts,
                    },
                });
            }

            let delay = retry_backoff(&self.settings, attempts);
            match &failure {
                AttemptFailure::Redis(e) => tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    sleep_duration = ?delay,
                    "INFO request failed on transport, retrying"
                ),
                AttemptFailure::Timeout => tracing::warn!(
                    attempt = attempts,
                    sleep_duration = ?delay,
                    "INFO request timed out, retrying"
                ),
            }
            STATUS_POLL_RETRIES_TOTAL.inc();
            sleep(delay).await;
        };

        observe_duration(&STATUS_POLL_DURATION_SECONDS, started);
        match &result {
            Ok(reply) => {
                STATUS_POLLS_TOTAL.inc();
                tracing::debug!(reply_bytes = reply.len(), attempts, "INFO reply received");
            }
            Err(e) => {
                STATUS_POLL_FAILURES_TOTAL.inc();
                tracing::debug!(error = %e, "INFO request failed");
            }
        }
        result
    }

    async fn close(self) -> Result<(), PollerError> {
        // The multiplexed connection shuts its driver task down once the last
        // handle is dropped; there is no fallible close step in the client.
        drop(self.connection);
        tracing::debug!(redis_address = %self.address, "Redis connection closed");
        Ok(())
    }
}

fn is_transport_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

fn classify(e: RedisError) -> Attempt {
    if is_transport_error(&e) {
        Attempt::Retryable(AttemptFailure::Redis(e))
    } else {
        Attempt::Fatal(e)
    }
}

/// Exponential backoff with jitter for the `attempt`-th retry (1-based).
///
/// Doubles from `min_retry_backoff_ms` and is capped at
/// `max_retry_backoff_ms`; jitter picks a value between half and the full
/// computed delay.
fn retry_backoff(settings: &RedisSettings, attempt: u32) -> Duration {
    let min = settings.min_retry_backoff_ms;
    let max = settings.max_retry_backoff_ms.max(min);

    let exponent = attempt.saturating_sub(1).min(16);
    let ceiling = min.saturating_mul(1u64 << exponent).min(max);
    if ceiling == 0 {
        return Duration::ZERO;
    }

    let floor = (ceiling / 2).max(min.min(ceiling));
    let jittered = rand::rng().random_range(floor..=ceiling);
    Duration::from_millis(jittered)
}

/// Split `host:port` (or `[v6]:port`) into its parts
fn split_address(address: &str) -> Result<(String, u16), PollerError> {
    let invalid = |reason: &str| PollerError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(invalid("empty host"));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| invalid("port is not a number between 0 and 65535"))?;

    Ok((host.to_string(), port))
}
