//! Field extraction from Redis `INFO` replies.
//!
//! The `INFO` reply is a flat text blob of `key:value` lines grouped under
//! `# Section` headers. Only a handful of fields are needed for a snapshot, so
//! the blob is scanned textually instead of being parsed into a full map.

// External crates
use tracing::instrument;

/// Fields copied from every `INFO` reply into a snapshot document, in
/// document order.
pub const INFO_FIELDS: [&str; 7] = [
    "redis_version",
    "os",
    "uptime_in_days",
    "connected_clients",
    "maxclients",
    "role",
    "connected_slaves",
];

/// Extract the value of `field` from an `INFO` blob.
///
/// - The first textual occurrence of `field:` wins. A field name that is the
///   tail of a longer key (`role` inside `replica_role`) matches that longer
///   key if it comes first.
/// - The value runs up to the next `\n` and is trimmed, which also drops the
///   `\r` of Redis' `\r\n` line endings.
/// - A missing field, or a field on a final line with no trailing newline,
///   yields an empty string.
#[instrument(
    name = "redis_monitor_parser::extract_field",
    target = "parser::parser",
    skip(blob),
    level = "trace"
)]
pub fn extract_field(blob: &str, field: &str) -> String {
    let needle = format!("{field}:");

    let Some(field_start) = blob.find(&needle) else {
        tracing::trace!("Field not present in INFO reply");
        return String::new();
    };

    let Some(line_len) = blob[field_start..].find('\n') else {
        tracing::trace!("Field found on an unterminated final line, ignoring it");
        return String::new();
    };

    let value_start = field_start + needle.len();
    let value_end = field_start + line_len;

    blob[value_start..value_end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Server\r\n\
        redis_version:7.2.4\r\n\
        redis_mode:standalone\r\n\
        os:Linux 6.1.0-18-amd64 x86_64\r\n\
        uptime_in_days:12\r\n\
        # Clients\r\n\
        connected_clients:3\r\n\
        maxclients:10000\r\n\
        # Replication\r\n\
        role:master\r\n\
        connected_slaves:1\r\n";

    #[test]
    fn extracts_every_snapshot_field_from_crlf_reply() {
        let values: Vec<String> = INFO_FIELDS
            .iter()
            .map(|field| extract_field(SAMPLE, field))
            .collect();

        assert_eq!(
            values,
            vec![
                "7.2.4",
                "Linux 6.1.0-18-amd64 x86_64",
                "12",
                "3",
                "10000",
                "master",
                "1",
            ]
        );
    }

    #[test]
    fn trims_whitespace_around_value() {
        let blob = "alpha:  spaced value \t\nbeta:x\n";
        assert_eq!(extract_field(blob, "alpha"), "spaced value");
    }

    #[test]
    fn missing_field_yields_empty_string() {
        assert_eq!(extract_field("redis_version:7.0.5\n", "maxclients"), "");
        assert_eq!(extract_field("", "role"), "");
    }

    #[test]
    fn unterminated_final_line_yields_empty_string() {
        let blob = "redis_version:7.0.5\nrole:master";
        assert_eq!(extract_field(blob, "redis_version"), "7.0.5");
        assert_eq!(extract_field(blob, "role"), "");
    }

    #[test]
    fn first_textual_occurrence_wins_even_inside_longer_key() {
        let blob = "master_failover_state:no-failover\nreplica_role:slave\nrole:master\n";
        assert_eq!(extract_field(blob, "role"), "slave");
    }

    #[test]
    fn field_with_empty_value() {
        let blob = "os:\nrole:master\n";
        assert_eq!(extract_field(blob, "os"), "");
        assert_eq!(extract_field(blob, "role"), "master");
    }

    #[test]
    fn minimal_reply_scenario() {
        let blob = "redis_version:7.0.5\nrole:master\nconnected_clients:12\n";

        assert_eq!(extract_field(blob, "redis_version"), "7.0.5");
        assert_eq!(extract_field(blob, "role"), "master");
        assert_eq!(extract_field(blob, "connected_clients"), "12");
        assert_eq!(extract_field(blob, "os"), "");
        assert_eq!(extract_field(blob, "maxclients"), "");
    }

    #[test]
    fn value_may_contain_colons() {
        let blob = "executable:/usr/bin/redis-server\nconfig_file:C:\\redis.conf\n";
        assert_eq!(extract_field(blob, "config_file"), "C:\\redis.conf");
    }
}
