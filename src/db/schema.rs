//! Database schema definitions

pub const CREATE_USER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user (
    account INTEGER PRIMARY KEY
)
"#;

pub const CREATE_EVENT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    acctid INTEGER REFERENCES user(account),
    state INTEGER NOT NULL,
    ipaddr TEXT NOT NULL,
    timestamp BIGINT NOT NULL
)
"#;

// Singleton row, id pinned to 1
pub const CREATE_CHECKPOINT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoint (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_file TEXT NOT NULL,
    last_scan BIGINT NOT NULL
)
"#;

// For resolver lookups by account
pub const CREATE_INDEX_ACCTID: &str =
    "CREATE INDEX IF NOT EXISTS idx_event_acctid ON event(acctid)";

// For resolver lookups by IP
pub const CREATE_INDEX_IPADDR: &str =
    "CREATE INDEX IF NOT EXISTS idx_event_ipaddr ON event(ipaddr)";

// For the dedup grouping pass
pub const CREATE_INDEX_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_event_timestamp ON event(timestamp)";
