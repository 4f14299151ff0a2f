use async_trait::async_trait;
use chrono::Utc;
use feed_rs::model::{Feed, Link};
use feed_rs::parser;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Item, Source};

/// Something that can produce items for one configured source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> i64;
    fn name(&self) -> &str;

    /// Retrieves the current items. Returns [`AppError::Cancelled`] as soon
    /// as `cancel` fires, even if the remote side is still responding.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<Item>>;
}

/// Adapter for RSS and Atom feeds.
pub struct RssSource {
    id: i64,
    name: String,
    url: String,
    client: Client,
}

impl RssSource {
    pub fn new(source: &Source, client: Client) -> Self {
        Self {
            id: source.id,
            name: source.name.clone(),
            url: source.url.clone(),
            client,
        }
    }

    fn items_from_feed(&self, feed: Feed) -> Vec<Item> {
        feed.entries
            .into_iter()
            .filter_map(|entry| {
                let link = match entry_link(&entry.links) {
                    Some(link) => link.to_string(),
                    None => {
                        tracing::debug!(source = %self.name, entry = %entry.id, "Skipping entry without a link");
                        return None;
                    }
                };

                Some(Item {
                    title: entry
                        .title
                        .map(|t| t.content.trim().to_string())
                        .unwrap_or_else(|| "Untitled".to_string()),
                    categories: entry.categories.into_iter().map(|c| c.term).collect(),
                    link,
                    published_at: entry
                        .published
                        .or(entry.updated)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(Utc::now),
                    summary: entry.summary.map(|s| s.content),
                    source_name: self.name.clone(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for RssSource {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<Item>> {
        let client = self.client.clone();
        let url = self.url.clone();

        // The retrieval runs on its own task so a cancelled cycle never waits on it.
        let retrieval = tokio::spawn(async move { load_feed(&client, &url).await });

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            joined = retrieval => joined,
        };
        let feed = joined
            .map_err(AppError::from)
            .and_then(|res| res)
            .map_err(|e| AppError::for_source(self.id, &self.name, e))?;

        let items = self.items_from_feed(feed);
        tracing::debug!(source = %self.name, "Fetched {} items", items.len());
        Ok(items)
    }
}

/// The article's own page: the first `alternate` link (Atom's default
/// relation), else whatever link comes first.
fn entry_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|link| matches!(link.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|link| link.href.trim())
        .filter(|href| !href.is_empty())
}

async fn load_feed(client: &Client, url: &str) -> Result<Feed> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
    }

    let bytes = response.bytes().await?;
    let feed = parser::parse(&bytes[..])?;
    Ok(feed)
}
