use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Item;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub source_priority: i64,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub published_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub source_id: i64,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl NewArticle {
    pub fn from_item(source_id: i64, item: Item) -> Self {
        Self {
            source_id,
            title: item.title,
            link: item.link,
            summary: item.summary.filter(|s| !s.trim().is_empty()),
            published_at: item.published_at.with_timezone(&Utc),
        }
    }
}
