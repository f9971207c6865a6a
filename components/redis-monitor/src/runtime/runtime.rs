// Local crates
use crate::{
    helpers::{
        load_config::{ConfigError, Settings, load_env_file},
        targets::{ElasticsearchConfig, RedisTarget, targets_from_env},
    },
    metrics::metrics::{LAST_SUCCESS_TIMESTAMP_SECONDS, TARGETS_CONFIGURED},
    poller::poller::{PollerError, RedisPoller, StatusConnector, StatusSession},
    shipper::shipper::{DocumentSink, Shipper, ShipperError},
    snapshot::snapshot::{SnapshotDocument, index_name},
};

// External crates
use chrono::{DateTime, Local};
use std::path::PathBuf;
use tracing::{info, instrument};

/// A run-terminating failure, naming the step that failed
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Elasticsearch client setup: {0}")]
    Shipper(#[source] ShipperError),
    #[error("connecting to Redis target {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: PollerError,
    },
    #[error("INFO request for Redis target {target}: {source}")]
    Poll {
        target: String,
        #[source]
        source: PollerError,
    },
    #[error("indexing snapshot of Redis target {target} into {index}: {source}")]
    Index {
        target: String,
        index: String,
        #[source]
        source: ShipperError,
    },
    #[error("closing connection to Redis target {target}: {source}")]
    Close {
        target: String,
        #[source]
        source: PollerError,
    },
}

/// Inputs of a monitoring run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Env file to load; `.env` in the working directory when unset
    pub env_file: Option<PathBuf>,
    /// Optional TOML settings file
    pub settings_file: Option<PathBuf>,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub index: String,
    pub targets: usize,
    pub documents_indexed: usize,
}

/// Run one monitoring pass: load configuration, connect to Elasticsearch,
/// then poll and index every configured Redis target in order.
///
/// The first failure ends the run. Documents indexed before it stay indexed.
#[instrument(
    name = "redis_monitor_runtime::run",
    target = "runtime::runtime",
    skip_all,
    level = "info"
)]
pub async fn run_monitor(options: &RunOptions) -> Result<RunSummary, MonitorError> {
    load_env_file(options.env_file.as_deref())?;
    let settings = Settings::load(options.settings_file.as_deref())?;

    let targets = targets_from_env(&settings.redis);
    TARGETS_CONFIGURED.set(targets.len() as f64);
    info!(targets = targets.len(), "Redis targets loaded");

    let es_config = ElasticsearchConfig::from_env();
    let shipper = Shipper::connect(&es_config, &settings.elasticsearch)
        .await
        .map_err(MonitorError::Shipper)?;

    let captured_at = Local::now();
    let index = index_name(&settings.elasticsearch.index_prefix, captured_at.date_naive());
    let poller = RedisPoller::new(settings.redis.clone());

    // On early return the shipper is dropped, which releases its client too
    let documents_indexed = poll_targets(&targets, &poller, &shipper, &index, captured_at).await?;
    shipper.stop();

    LAST_SUCCESS_TIMESTAMP_SECONDS.set(captured_at.timestamp() as f64);
    let summary = RunSummary {
        index,
        targets: targets.len(),
        documents_indexed,
    };
    info!(
        index = %summary.index,
        targets = summary.targets,
        documents_indexed = summary.documents_indexed,
        "Monitoring run complete"
    );
    Ok(summary)
}

/// Poll every target in order and index one snapshot per target.
///
/// Steps per target: connect, `INFO`, build the document, index it, close
/// the connection. Any failure returns immediately; later targets are not
/// attempted.
pub async fn poll_targets<C, S>(
    targets: &[RedisTarget],
    connector: &C,
    sink: &S,
    index: &str,
    captured_at: DateTime<Local>,
) -> Result<usize, MonitorError>
where
    C: StatusConnector,
    S: DocumentSink,
{
    let mut indexed = 0;

    for target in targets {
        let name = target.to_string();
        tracing::debug!(redis_target = %name, "Polling Redis target");

        let mut session = connector
            .connect(target)
            .await
            .map_err(|source| MonitorError::Connect {
                target: name.clone(),
                source,
            })?;

        let info = session
            .fetch_info()
            .await
            .map_err(|source| MonitorError::Poll {
                target: name.clone(),
                source,
            })?;

        let document = SnapshotDocument::from_info(&info, captured_at);
        sink.index_document(index, &document)
            .await
            .map_err(|source| MonitorError::Index {
                target: name.clone(),
                index: index.to_string(),
                source,
            })?;
        indexed += 1;

        session
            .close()
            .await
            .map_err(|source| MonitorError::Close {
                target: name.clone(),
                source,
            })?;

        tracing::debug!(
            redis_target = %name,
            redis_version = %document.redis_version,
            role = %document.role,
            "Redis target snapshot indexed"
        );
    }

    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shipper::shipper::IndexReceipt;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Scripted behavior of one fake Redis target
    #[derive(Clone)]
    struct Script {
        info: Result<String, ()>,
        close_fails: bool,
    }

    struct FakeConnector {
        scripts: HashMap<String, Script>,
        journal: Journal,
    }

    struct FakeSession {
        address: String,
        script: Script,
        journal: Journal,
    }

    #[async_trait]
    impl StatusConnector for FakeConnector {
        type Session = FakeSession;

        async fn connect(&self, target: &RedisTarget) -> Result<FakeSession, PollerError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("connect {}", target.address));
            let script = self.scripts.get(&target.address).cloned().ok_or_else(|| {
                PollerError::InvalidAddress {
                    address: target.address.clone(),
                    reason: "unknown".to_string(),
                }
            })?;
            Ok(FakeSession {
                address: target.address.clone(),
                script,
                journal: Arc::clone(&self.journal),
            })
        }
    }

    #[async_trait]
    impl StatusSession for FakeSession {
        async fn fetch_info(&mut self) -> Result<String, PollerError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("info {}", self.address));
            self.script.info.clone().map_err(|()| PollerError::Timeout {
                address: self.address.clone(),
                attempts: 4,
            })
        }

        async fn close(self) -> Result<(), PollerError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("close {}", self.address));
            if self.script.close_fails {
                let broken_pipe = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
                return Err(PollerError::Request {
                    address: self.address,
                    attempts: 1,
                    source: broken_pipe.into(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSink {
        documents: Mutex<Vec<(String, SnapshotDocument)>>,
        reject: bool,
        journal: Journal,
    }

    #[async_trait]
    impl DocumentSink for FakeSink {
        async fn index_document(
            &self,
            index: &str,
            document: &SnapshotDocument,
        ) -> Result<IndexReceipt, ShipperError> {
            self.journal.lock().unwrap().push(format!("index {index}"));
            if self.reject {
                return Err(ShipperError::Rejected {
                    index: index.to_string(),
                    status: reqwest::StatusCode::FORBIDDEN,
                    body: "{}".to_string(),
                });
            }
            let mut documents = self.documents.lock().unwrap();
            documents.push((index.to_string(), document.clone()));
            Ok(IndexReceipt {
                index: index.to_string(),
                id: format!("doc-{}", documents.len()),
                result: "created".to_string(),
            })
        }
    }

    fn target(ordinal: usize, address: &str) -> RedisTarget {
        RedisTarget {
            ordinal,
            address: address.to_string(),
            password: String::new(),
            db: 0,
        }
    }

    fn ok(info: &str) -> Script {
        Script {
            info: Ok(info.to_string()),
            close_fails: false,
        }
    }

    fn fixture(scripts: &[(&str, Script)]) -> (FakeConnector, FakeSink, Journal) {
        let journal = Journal::default();
        let connector = FakeConnector {
            scripts: scripts
                .iter()
                .map(|(address, script)| (address.to_string(), script.clone()))
                .collect(),
            journal: Arc::clone(&journal),
        };
        let sink = FakeSink {
            journal: Arc::clone(&journal),
            ..FakeSink::default()
        };
        (connector, sink, journal)
    }

    fn captured_at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap()
    }

    const INDEX: &str = "redis_monitoring_2024-03-09";

    #[tokio::test]
    async fn indexes_one_document_per_target_in_order() {
        let (connector, sink, journal) = fixture(&[
            ("cache-a:6379", ok("redis_version:7.0.5\nrole:master\nconnected_clients:12\n")),
            ("cache-b:6379", ok("redis_version:6.2.14\nrole:slave\nconnected_clients:3\n")),
        ]);
        let targets = [target(1, "cache-a:6379"), target(2, "cache-b:6379")];

        let indexed = poll_targets(&targets, &connector, &sink, INDEX, captured_at())
            .await
            .unwrap();

        assert_eq!(indexed, 2);
        let documents = sink.documents.lock().unwrap();
        assert_eq!(documents.len(), 2);
        assert!(documents.iter().all(|(index, _)| index == INDEX));
        assert_eq!(documents[0].1.redis_version, "7.0.5");
        assert_eq!(documents[0].1.role, "master");
        assert_eq!(documents[1].1.redis_version, "6.2.14");
        assert_eq!(documents[1].1.connected_clients, "3");
        assert!(documents.iter().all(|(_, doc)| doc.timestamp == captured_at()));

        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                format!("connect cache-a:6379"),
                format!("info cache-a:6379"),
                format!("index {INDEX}"),
                format!("close cache-a:6379"),
                format!("connect cache-b:6379"),
                format!("info cache-b:6379"),
                format!("index {INDEX}"),
                format!("close cache-b:6379"),
            ]
        );
    }

    #[tokio::test]
    async fn no_targets_indexes_nothing() {
        let (connector, sink, journal) = fixture(&[]);
        let indexed = poll_targets(&[], &connector, &sink, INDEX, captured_at())
            .await
            .unwrap();
        assert_eq!(indexed, 0);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_poll_stops_before_indexing_and_later_targets() {
        let failing = Script {
            info: Err(()),
            close_fails: false,
        };
        let (connector, sink, journal) = fixture(&[
            ("cache-a:6379", failing),
            ("cache-b:6379", ok("role:master\n")),
        ]);
        let targets = [target(1, "cache-a:6379"), target(2, "cache-b:6379")];

        let err = poll_targets(&targets, &connector, &sink, INDEX, captured_at())
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::Poll { ref target, .. } if target == "#1 cache-a:6379"));
        assert!(sink.documents.lock().unwrap().is_empty());
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["connect cache-a:6379".to_string(), "info cache-a:6379".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_close_is_fatal_but_keeps_indexed_document() {
        let closing_badly = Script {
            info: Ok("role:master\n".to_string()),
            close_fails: true,
        };
        let (connector, sink, journal) = fixture(&[
            ("cache-a:6379", closing_badly),
            ("cache-b:6379", ok("role:master\n")),
        ]);
        let targets = [target(1, "cache-a:6379"), target(2, "cache-b:6379")];

        let err = poll_targets(&targets, &connector, &sink, INDEX, captured_at())
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::Close { .. }));
        assert_eq!(sink.documents.lock().unwrap().len(), 1);
        assert!(
            !journal
                .lock()
                .unwrap()
                .iter()
                .any(|entry| entry.ends_with("cache-b:6379"))
        );
    }

    #[tokio::test]
    async fn rejected_document_is_fatal() {
        let (connector, mut sink, journal) = fixture(&[
            ("cache-a:6379", ok("role:master\n")),
            ("cache-b:6379", ok("role:master\n")),
        ]);
        sink.reject = true;
        let targets = [target(1, "cache-a:6379"), target(2, "cache-b:6379")];

        let err = poll_targets(&targets, &connector, &sink, INDEX, captured_at())
            .await
            .unwrap_err();

        match err {
            MonitorError::Index { index, .. } => assert_eq!(index, INDEX),
            other => panic!("expected Index error, got: {other:?}"),
        }
        assert_eq!(journal.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn connect_failure_names_the_target() {
        let (connector, sink, _journal) = fixture(&[]);
        let targets = [target(3, "cache-c:6379")];

        let err = poll_targets(&targets, &connector, &sink, INDEX, captured_at())
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("connecting to Redis target #3 cache-c:6379"));
    }

    #[tokio::test]
    async fn missing_env_file_fails_run_before_any_network_io() {
        let dir = tempfile::tempdir().unwrap();
        let options = RunOptions {
            env_file: Some(dir.path().join("missing.env")),
            settings_file: None,
        };

        let err = run_monitor(&options).await.unwrap_err();
        assert!(matches!(err, MonitorError::Config(ConfigError::EnvFile { .. })));
    }
}
