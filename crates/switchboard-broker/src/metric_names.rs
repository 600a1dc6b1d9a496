//! Names of the metrics the broker records.

/// Events published (counter, labels: type).
pub const EVENTS_PUBLISHED_TOTAL: &str = "switchboard_events_published_total";
/// Events dropped on full connection queues (counter).
pub const EVENTS_DROPPED_TOTAL: &str = "switchboard_events_dropped_total";
/// Streams registered (counter).
pub const CONNECTIONS_OPENED_TOTAL: &str = "switchboard_connections_opened_total";
/// Open streams (gauge).
pub const CONNECTIONS_ACTIVE: &str = "switchboard_connections_active";
