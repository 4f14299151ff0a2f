use chrono::{DateTime, Utc};

/// A single entry as read from a remote feed, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub title: String,
    pub categories: Vec<String>,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub source_name: String,
}
