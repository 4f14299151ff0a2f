use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::models::{NewArticle, Source};
use crate::shutdown::cancellable;

use super::{KeywordFilter, RssSource, SourceAdapter};

/// Lists the sources a fetch cycle should visit.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn sources(&self) -> Result<Vec<Source>>;
}

/// Write side of the article store. Storing an article whose source and
/// link already exist must succeed without creating a second row.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn store(&self, article: NewArticle) -> Result<()>;
}

/// Periodically pulls every source and stores the items that pass the filter.
pub struct Fetcher {
    sources: Arc<dyn SourceProvider>,
    articles: Arc<dyn ArticleStore>,
    filter: Arc<KeywordFilter>,
    client: Client,
    interval: Duration,
}

impl Fetcher {
    pub fn new(
        sources: Arc<dyn SourceProvider>,
        articles: Arc<dyn ArticleStore>,
        client: Client,
        interval: Duration,
        filter: KeywordFilter,
    ) -> Self {
        Self {
            sources,
            articles,
            filter: Arc::new(filter),
            client,
            interval,
        }
    }

    /// Runs a cycle now and then on every tick until `cancel` fires.
    /// A failed cycle ends the loop; failures of single sources do not.
    pub async fn run_forever(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.fetch_once(&cancel.child_token()).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => return Err(e),
            }
        }

        info!("Fetcher stopped");
        Ok(())
    }

    /// Fetches all sources concurrently and waits for every one of them.
    pub async fn fetch_once(&self, cancel: &CancellationToken) -> Result<()> {
        let sources = cancellable(cancel, self.sources.sources()).await?;
        debug!("Fetching {} sources", sources.len());

        let tasks: Vec<_> = sources
            .into_iter()
            .map(|source| {
                let client = self.client.clone();
                let articles = Arc::clone(&self.articles);
                let filter = Arc::clone(&self.filter);
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    let adapter = RssSource::new(&source, client);
                    fetch_source(&adapter, articles.as_ref(), &filter, &cancel).await
                })
            })
            .collect();

        let mut kept = 0;
        for result in join_all(tasks).await {
            match result {
                Ok(Ok(count)) => kept += count,
                Ok(Err(e)) if e.is_cancelled() => debug!("Source fetch cancelled"),
                Ok(Err(e)) => warn!("Failed to fetch source: {}", e),
                Err(e) => error!("Source task failed: {}", e),
            }
        }

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        info!(kept, "Fetch cycle finished");
        Ok(())
    }
}

/// Fetches one source and stores its items in order. The first storage
/// failure stops the remaining items of this source.
async fn fetch_source(
    adapter: &dyn SourceAdapter,
    articles: &dyn ArticleStore,
    filter: &KeywordFilter,
    cancel: &CancellationToken,
) -> Result<usize> {
    let items = adapter.fetch(cancel).await?;
    let mut kept = 0;

    for item in items {
        if filter.should_skip(&item) {
            debug!(source = %adapter.name(), title = %item.title, "Skipping filtered item");
            continue;
        }

        let article = NewArticle::from_item(adapter.id(), item);
        cancellable(cancel, articles.store(article))
            .await
            .map_err(|e| AppError::for_source(adapter.id(), adapter.name(), e))?;
        kept += 1;
    }

    Ok(kept)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::db::Repository;
    use crate::models::NewSource;
    use crate::services::ArticleProvider;

    fn rss(items: &[(&str, &str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(title, link, category)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link>\
                     <category>{category}</category>\
                     <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Feed</title><link>http://example.com/</link>
<description>Feed</description>{items}</channel></rss>"#
        )
    }

    async fn mount_feed(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn add_source(repo: &Repository, name: &str, url: String) -> i64 {
        repo.insert_source(NewSource {
            name: name.to_string(),
            url,
            priority: 0,
        })
        .await
        .unwrap()
    }

    fn fetcher(repo: Arc<Repository>, keywords: &[&str]) -> Fetcher {
        Fetcher::new(
            repo.clone(),
            repo,
            Client::new(),
            Duration::from_secs(60),
            KeywordFilter::new(keywords.iter().copied()),
        )
    }

    async fn stored_links(repo: &Repository) -> Vec<String> {
        let since = Utc::now() - ChronoDuration::days(365 * 30);
        let mut links: Vec<String> = repo
            .all_not_posted(since, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.link)
            .collect();
        links.sort();
        links
    }

    #[tokio::test]
    async fn filtered_items_are_not_stored() {
        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/feed",
            rss(&[
                ("Rust news", "http://example.com/1", "tech"),
                ("Sponsored: buy now", "http://example.com/2", "ads"),
                ("Compiler internals", "http://example.com/3", "tech"),
            ]),
        )
        .await;

        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        add_source(&repo, "Example", format!("{}/feed", server.uri())).await;

        fetcher(repo.clone(), &["sponsored"])
            .fetch_once(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            stored_links(&repo).await,
            vec!["http://example.com/1", "http://example.com/3"]
        );
    }

    #[tokio::test]
    async fn repeated_cycles_do_not_duplicate_articles() {
        let server = MockServer::start().await;
        mount_feed(&server, "/feed", rss(&[("One", "http://example.com/1", "x")])).await;

        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        add_source(&repo, "Example", format!("{}/feed", server.uri())).await;
        let fetcher = fetcher(repo.clone(), &[]);

        fetcher.fetch_once(&CancellationToken::new()).await.unwrap();
        fetcher.fetch_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(stored_links(&repo).await.len(), 1);
    }

    #[tokio::test]
    async fn failing_source_does_not_affect_others() {
        let server = MockServer::start().await;
        mount_feed(&server, "/good", rss(&[("Good", "http://example.com/good", "x")])).await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        add_source(&repo, "Broken", format!("{}/broken", server.uri())).await;
        add_source(&repo, "Good", format!("{}/good", server.uri())).await;
        add_source(&repo, "Down", format!("{}/down", server.uri())).await;

        tokio_test::assert_ok!(
            fetcher(repo.clone(), &[])
                .fetch_once(&CancellationToken::new())
                .await
        );

        assert_eq!(stored_links(&repo).await, vec!["http://example.com/good"]);
    }

    /// Stores through the repository but refuses one particular link.
    struct RejectingStore {
        inner: Arc<Repository>,
        rejected_link: &'static str,
    }

    #[async_trait]
    impl ArticleStore for RejectingStore {
        async fn store(&self, article: NewArticle) -> Result<()> {
            if article.link == self.rejected_link {
                return Err(anyhow::anyhow!("disk full").into());
            }
            self.inner.store(article).await
        }
    }

    #[tokio::test]
    async fn storage_failure_stops_only_its_source() {
        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/first",
            rss(&[
                ("One", "http://first.example/1", "x"),
                ("Two", "http://first.example/2", "x"),
                ("Three", "http://first.example/3", "x"),
            ]),
        )
        .await;
        mount_feed(
            &server,
            "/second",
            rss(&[
                ("Four", "http://second.example/4", "x"),
                ("Five", "http://second.example/5", "x"),
            ]),
        )
        .await;

        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        add_source(&repo, "First", format!("{}/first", server.uri())).await;
        add_source(&repo, "Second", format!("{}/second", server.uri())).await;

        let fetcher = Fetcher::new(
            repo.clone(),
            Arc::new(RejectingStore {
                inner: repo.clone(),
                rejected_link: "http://first.example/2",
            }),
            Client::new(),
            Duration::from_secs(60),
            KeywordFilter::default(),
        );

        tokio_test::assert_ok!(fetcher.fetch_once(&CancellationToken::new()).await);

        assert_eq!(
            stored_links(&repo).await,
            vec![
                "http://first.example/1",
                "http://second.example/4",
                "http://second.example/5",
            ]
        );
    }

    struct BrokenSources;

    #[async_trait]
    impl SourceProvider for BrokenSources {
        async fn sources(&self) -> Result<Vec<Source>> {
            Err(anyhow::anyhow!("source table is gone").into())
        }
    }

    #[tokio::test]
    async fn listing_failure_ends_the_loop() {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let fetcher = Fetcher::new(
            Arc::new(BrokenSources),
            repo,
            Client::new(),
            Duration::from_secs(60),
            KeywordFilter::default(),
        );

        let err = fetcher
            .run_forever(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("source table is gone"));
    }

    #[tokio::test]
    async fn cancelled_loop_stops_cleanly() {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let fetcher = fetcher(repo, &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio_test::assert_ok!(fetcher.run_forever(&cancel).await);
    }
}
