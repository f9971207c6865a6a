// Local crates
use crate::parser::parser::extract_field;

// External crates
use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;

/// Document indexed for one Redis target.
///
/// Field values are copied verbatim from the `INFO` reply; a field missing
/// from the reply is an empty string. `timestamp` is the capture instant of
/// the run, shared by every document of that run.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SnapshotDocument {
    pub redis_version: String,
    pub os: String,
    pub uptime_in_days: String,
    pub connected_clients: String,
    pub maxclients: String,
    pub role: String,
    pub connected_slaves: String,
    pub timestamp: DateTime<Local>,
}

impl SnapshotDocument {
    /// Build a document from a raw `INFO` reply.
    pub fn from_info(info: &str, captured_at: DateTime<Local>) -> Self {
        Self {
            redis_version: extract_field(info, "redis_version"),
            os: extract_field(info, "os"),
            uptime_in_days: extract_field(info, "uptime_in_days"),
            connected_clients: extract_field(info, "connected_clients"),
            maxclients: extract_field(info, "maxclients"),
            role: extract_field(info, "role"),
            connected_slaves: extract_field(info, "connected_slaves"),
            timestamp: captured_at,
        }
    }
}

/// Daily index name, `<prefix>_<YYYY-MM-DD>`
pub fn index_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}_{}", prefix, date.format("%Y-%m-%d"))
}
