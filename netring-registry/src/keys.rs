//! Store key layout
//!
//! All registry state lives under the `netring:` prefix so a single
//! engine can be shared and a development reset can flush everything.

/// Prefix for every registry key.
pub const PREFIX: &str = "netring:";

/// Set of currently registered member ids.
pub const ACTIVE_SET: &str = "netring:active_members";

/// Set of recently departed member ids.
pub const DEREGISTERED_SET: &str = "netring:deregistered_members";

/// Set of members that reported metrics recently.
pub const REPORTING_SET: &str = "netring:reporting_members";

/// TTL on deregistered records and their set, in seconds.
pub const DEREGISTERED_TTL: u64 = 3600;

/// TTL on metric snapshots and the reporting set, in seconds.
pub const METRICS_TTL: u64 = 300;

#[must_use]
pub fn member_key(instance_id: &str) -> String {
    format!("{PREFIX}member:{instance_id}")
}

#[must_use]
pub fn deregistered_key(instance_id: &str) -> String {
    format!("{PREFIX}deregistered:{instance_id}")
}

#[must_use]
pub fn metrics_key(instance_id: &str) -> String {
    format!("{PREFIX}metrics:{instance_id}")
}

/// Instance id back out of a metrics key, for snapshot listings.
#[must_use]
pub fn instance_from_metrics_key(key: &str) -> Option<&str> {
    key.strip_prefix(PREFIX)?.strip_prefix("metrics:")
}
