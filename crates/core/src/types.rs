/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifies one logical UI slot (a result card or form) that owns at
/// most one in-flight generation job.
pub type SlotKey = String;
