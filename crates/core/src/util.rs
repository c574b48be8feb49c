use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Returns current unix epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as i64)
        .unwrap_or_default()
}

/// Generates a new task id (UUID v4, hyphenated).
pub fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}
