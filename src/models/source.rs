use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A feed the service pulls articles from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Higher values win ties when picking the next article to publish.
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub priority: i64,
}
