use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bot::escape_markdown;
use crate::error::{AppError, Result};
use crate::models::Article;
use crate::shutdown::cancellable;

use super::content_fetcher::{cleanup_text, extract_content, ContentFetcher};
use super::telegram::{MessageSender, OutgoingMessage};

/// Read side of the article store used for publishing.
#[async_trait]
pub trait ArticleProvider: Send + Sync {
    /// Up to `limit` unposted articles published at or after `since`,
    /// most recently stored first, higher source priority first on ties.
    async fn all_not_posted(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<Article>>;

    async fn mark_as_posted(&self, article: &Article) -> Result<()>;
}

#[async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy)]
pub struct PublishSettings {
    pub interval: Duration,
    pub lookback: Duration,
    pub channel_id: i64,
}

/// Picks one article per tick, summarizes it and posts it to the channel.
pub struct Publisher {
    articles: Arc<dyn ArticleProvider>,
    summarizer: Arc<dyn Summarize>,
    sender: Arc<dyn MessageSender>,
    content: ContentFetcher,
    interval: Duration,
    lookback: TimeDelta,
    channel_id: i64,
}

impl Publisher {
    pub fn new(
        articles: Arc<dyn ArticleProvider>,
        summarizer: Arc<dyn Summarize>,
        sender: Arc<dyn MessageSender>,
        settings: PublishSettings,
    ) -> Result<Self> {
        let lookback = TimeDelta::from_std(settings.lookback)
            .map_err(|e| AppError::Config(format!("lookback window out of range: {}", e)))?;

        Ok(Self {
            articles,
            summarizer,
            sender,
            content: ContentFetcher::new()?,
            interval: settings.interval,
            lookback,
            channel_id: settings.channel_id,
        })
    }

    /// Publishes now and then on every tick until `cancel` fires or a
    /// cycle fails.
    pub async fn run_forever(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.publish_once(&cancel.child_token()).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => return Err(e),
            }
        }

        info!("Publisher stopped");
        Ok(())
    }

    /// Posts the best eligible article, if any, and marks it as posted.
    pub async fn publish_once(&self, cancel: &CancellationToken) -> Result<()> {
        let since = Utc::now() - self.lookback;
        let candidates = cancellable(cancel, self.articles.all_not_posted(since, 1)).await?;

        let Some(article) = candidates.into_iter().next() else {
            debug!("No articles to publish");
            return Ok(());
        };

        let summary = match self.extract_summary(&article, cancel).await {
            Ok(summary) => summary,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(article_id = article.id, "Failed to summarize article: {}", e);
                String::new()
            }
        };

        // Sending and marking run to completion so a delivered article is
        // always recorded as posted.
        let message = OutgoingMessage::markdown(self.channel_id, compose_message(&article, &summary));
        self.sender.send(message).await?;
        self.articles.mark_as_posted(&article).await?;

        info!(article_id = article.id, link = %article.link, "Published article");
        Ok(())
    }

    async fn extract_summary(&self, article: &Article, cancel: &CancellationToken) -> Result<String> {
        let text = match article.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(stored) => extract_content(stored)
                .ok_or_else(|| AppError::Extraction("stored summary has no text".to_string()))?,
            None => cancellable(cancel, self.content.fetch_full_content(&article.link)).await?,
        };

        let summary = cancellable(cancel, self.summarizer.summarize(&cleanup_text(&text))).await?;
        Ok(summary.trim().to_string())
    }
}

/// Builds the MarkdownV2 post: bold title, optional summary, link.
pub fn compose_message(article: &Article, summary: &str) -> String {
    let mut text = format!("*{}*", escape_markdown(&article.title));

    if !summary.is_empty() {
        text.push_str("\n\n");
        text.push_str(&escape_markdown(summary));
    }

    text.push_str("\n\n");
    text.push_str(&escape_markdown(&article.link));
    text
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::ai::Summarizer;
    use crate::db::Repository;
    use crate::feed::ArticleStore;
    use crate::models::{NewArticle, NewSource};
    use crate::services::ParseMode;

    #[derive(Default)]
    struct RecordingSender {
        messages: Mutex<Vec<OutgoingMessage>>,
        fail: bool,
    }

    impl RecordingSender {
        fn sent(&self) -> Vec<OutgoingMessage> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send(&self, message: OutgoingMessage) -> Result<()> {
            if self.fail {
                return Err(AppError::TelegramApi("sendMessage failed".to_string()));
            }
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    /// Returns a fixed summary and remembers what it was asked to summarize.
    struct FixedSummary {
        summary: String,
        inputs: Mutex<Vec<String>>,
    }

    impl FixedSummary {
        fn new(summary: &str) -> Self {
            Self {
                summary: summary.to_string(),
                inputs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Summarize for FixedSummary {
        async fn summarize(&self, text: &str) -> Result<String> {
            self.inputs.lock().unwrap().push(text.to_string());
            Ok(self.summary.clone())
        }
    }

    fn settings() -> PublishSettings {
        PublishSettings {
            interval: Duration::from_secs(60),
            lookback: Duration::from_secs(24 * 60 * 60),
            channel_id: -1001,
        }
    }

    async fn repo_with_article(link: &str, summary: Option<&str>) -> Arc<Repository> {
        let repo = Repository::open_in_memory().await.unwrap();
        let source_id = repo
            .insert_source(NewSource {
                name: "Example".to_string(),
                url: "https://example.com/feed.xml".to_string(),
                priority: 0,
            })
            .await
            .unwrap();
        repo.store(NewArticle {
            source_id,
            title: "Rust 2.0 (finally)".to_string(),
            link: link.to_string(),
            summary: summary.map(str::to_string),
            published_at: Utc::now(),
        })
        .await
        .unwrap();
        Arc::new(repo)
    }

    async fn eligible(repo: &Repository) -> usize {
        repo.all_not_posted(Utc::now() - TimeDelta::days(1), 10)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn publishes_once_and_marks_posted() {
        let repo = repo_with_article("https://example.com/a", Some("<p>Stored text.</p>")).await;
        let sender = Arc::new(RecordingSender::default());
        let summarizer = Arc::new(FixedSummary::new("Short summary."));
        let publisher =
            Publisher::new(repo.clone(), summarizer.clone(), sender.clone(), settings()).unwrap();

        publisher.publish_once(&CancellationToken::new()).await.unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, -1001);
        assert_eq!(sent[0].parse_mode, Some(ParseMode::MarkdownV2));
        assert_eq!(
            sent[0].text,
            "*Rust 2\\.0 \\(finally\\)*\n\nShort summary\\.\n\nhttps://example\\.com/a"
        );
        assert_eq!(summarizer.inputs.lock().unwrap().as_slice(), ["Stored text."]);
        assert_eq!(eligible(&repo).await, 0);

        tokio_test::assert_ok!(publisher.publish_once(&CancellationToken::new()).await);
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn disabled_summarizer_still_publishes() {
        let repo = repo_with_article("https://example.com/a", Some("Stored text.")).await;
        let sender = Arc::new(RecordingSender::default());
        let publisher = Publisher::new(
            repo.clone(),
            Arc::new(Summarizer::disabled()),
            sender.clone(),
            settings(),
        )
        .unwrap();

        publisher.publish_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            sender.sent()[0].text,
            "*Rust 2\\.0 \\(finally\\)*\n\nhttps://example\\.com/a"
        );
        assert_eq!(eligible(&repo).await, 0);
    }

    #[tokio::test]
    async fn page_text_is_used_without_stored_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/story"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><nav>Menu</nav><article><p>Para one.</p>\n\n\n\n<p>Para two.</p></article></body></html>",
            ))
            .mount(&server)
            .await;

        let repo = repo_with_article(&format!("{}/story", server.uri()), None).await;
        let sender = Arc::new(RecordingSender::default());
        let summarizer = Arc::new(FixedSummary::new("Page summary."));
        let publisher =
            Publisher::new(repo.clone(), summarizer.clone(), sender.clone(), settings()).unwrap();

        publisher.publish_once(&CancellationToken::new()).await.unwrap();

        let inputs = summarizer.inputs.lock().unwrap().clone();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].contains("Para one."));
        assert!(inputs[0].contains("Para two."));
        assert!(!inputs[0].contains("Menu"));
        assert!(!inputs[0].contains("\n\n\n"));
        assert!(sender.sent()[0].text.contains("Page summary\\."));
    }

    #[tokio::test]
    async fn unreachable_page_degrades_to_no_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let repo = repo_with_article(&format!("{}/story", server.uri()), None).await;
        let sender = Arc::new(RecordingSender::default());
        let summarizer = Arc::new(FixedSummary::new("unused"));
        let publisher =
            Publisher::new(repo.clone(), summarizer.clone(), sender.clone(), settings()).unwrap();

        publisher.publish_once(&CancellationToken::new()).await.unwrap();

        assert!(summarizer.inputs.lock().unwrap().is_empty());
        assert_eq!(sender.sent().len(), 1);
        assert!(!sender.sent()[0].text.contains("unused"));
    }

    #[tokio::test]
    async fn failed_send_leaves_article_unposted() {
        let repo = repo_with_article("https://example.com/a", Some("Stored.")).await;
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let publisher = Publisher::new(
            repo.clone(),
            Arc::new(FixedSummary::new("Summary.")),
            sender,
            settings(),
        )
        .unwrap();

        tokio_test::assert_err!(publisher.publish_once(&CancellationToken::new()).await);
        assert_eq!(eligible(&repo).await, 1);
    }

    /// Serves one article but cannot record it as posted.
    struct ReadOnlyArticles {
        inner: Arc<Repository>,
    }

    #[async_trait]
    impl ArticleProvider for ReadOnlyArticles {
        async fn all_not_posted(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<Article>> {
            self.inner.all_not_posted(since, limit).await
        }

        async fn mark_as_posted(&self, _article: &Article) -> Result<()> {
            Err(anyhow::anyhow!("database is read-only").into())
        }
    }

    #[tokio::test]
    async fn mark_failure_ends_the_loop() {
        let repo = repo_with_article("https://example.com/a", Some("Stored.")).await;
        let sender = Arc::new(RecordingSender::default());
        let publisher = Publisher::new(
            Arc::new(ReadOnlyArticles { inner: repo }),
            Arc::new(FixedSummary::new("Summary.")),
            sender.clone(),
            settings(),
        )
        .unwrap();

        let err = publisher
            .run_forever(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("read-only"));
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_loop_stops_cleanly() {
        let repo = repo_with_article("https://example.com/a", None).await;
        let sender = Arc::new(RecordingSender::default());
        let publisher = Publisher::new(
            repo,
            Arc::new(Summarizer::disabled()),
            sender.clone(),
            settings(),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio_test::assert_ok!(publisher.run_forever(&cancel).await);
        assert!(sender.sent().is_empty());
    }
}
