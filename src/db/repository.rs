use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::bot::SourceAdmin;
use crate::error::Result;
use crate::feed::{ArticleStore, SourceProvider};
use crate::models::{Article, NewArticle, NewSource, Source};
use crate::services::ArticleProvider;

use super::schema::SCHEMA;

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Source operations

    pub async fn insert_source(&self, source: NewSource) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sources (name, url, priority) VALUES (?1, ?2, ?3)",
                    params![source.name, source.url, source.priority],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let source = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, url, priority, created_at FROM sources WHERE id = ?1",
                )?;
                let source = stmt.query_row(params![id], source_from_row).optional()?;
                Ok(source)
            })
            .await?;
        Ok(source)
    }

    pub async fn get_all_sources(&self) -> Result<Vec<Source>> {
        let sources = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, url, priority, created_at FROM sources ORDER BY id",
                )?;
                let sources = stmt
                    .query_map([], source_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(sources)
            })
            .await?;
        Ok(sources)
    }

    pub async fn remove_source(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
                Ok(changed > 0)
            })
            .await?;
        Ok(removed)
    }

    pub async fn update_source_priority(&self, id: i64, priority: i64) -> Result<bool> {
        let updated = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE sources SET priority = ?1 WHERE id = ?2",
                    params![priority, id],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(updated)
    }

    // Article operations

    /// Inserts an article unless one with the same source and link exists.
    pub async fn insert_article(&self, article: NewArticle) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO articles (source_id, title, link, summary, published_at)
                       VALUES (?1, ?2, ?3, ?4, ?5)
                       ON CONFLICT(source_id, link) DO NOTHING"#,
                    params![
                        article.source_id,
                        article.title,
                        article.link,
                        article.summary,
                        format_datetime(&article.published_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Articles not yet posted and published at or after `since`, newest
    /// ingestion first, higher source priority first on ties.
    pub async fn get_not_posted_articles(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Article>> {
        let since = format_datetime(&since);
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT a.id, a.source_id, s.priority, a.title, a.link, a.summary,
                              a.published_at, a.posted_at, a.created_at
                       FROM articles a
                       JOIN sources s ON s.id = a.source_id
                       WHERE a.posted_at IS NULL AND a.published_at >= ?1
                       ORDER BY a.created_at DESC, s.priority DESC, a.id DESC
                       LIMIT ?2"#,
                )?;
                let articles = stmt
                    .query_map(params![since, limit], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Sets `posted_at` on an article that has not been posted yet.
    /// Returns false when nothing changed.
    pub async fn mark_article_posted(&self, id: i64) -> Result<bool> {
        let now = format_datetime(&Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET posted_at = ?1 WHERE id = ?2 AND posted_at IS NULL",
                    params![now, id],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }
}

#[async_trait]
impl SourceProvider for Repository {
    async fn sources(&self) -> Result<Vec<Source>> {
        self.get_all_sources().await
    }
}

#[async_trait]
impl ArticleStore for Repository {
    async fn store(&self, article: NewArticle) -> Result<()> {
        self.insert_article(article).await
    }
}

#[async_trait]
impl ArticleProvider for Repository {
    async fn all_not_posted(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<Article>> {
        self.get_not_posted_articles(since, limit).await
    }

    async fn mark_as_posted(&self, article: &Article) -> Result<()> {
        if !self.mark_article_posted(article.id).await? {
            tracing::warn!(article_id = article.id, "Article was already posted or no longer exists");
        }
        Ok(())
    }
}

#[async_trait]
impl SourceAdmin for Repository {
    async fn add_source(&self, source: NewSource) -> Result<i64> {
        self.insert_source(source).await
    }

    async fn source_by_id(&self, id: i64) -> Result<Option<Source>> {
        self.get_source(id).await
    }

    async fn all_sources(&self) -> Result<Vec<Source>> {
        self.get_all_sources().await
    }

    async fn delete_source(&self, id: i64) -> Result<bool> {
        self.remove_source(id).await
    }

    async fn set_source_priority(&self, id: i64, priority: i64) -> Result<bool> {
        self.update_source_priority(id, priority).await
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format, e.g. "2026-01-11 12:34:56"
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn datetime_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {raw}").into(),
        )
    })
}

fn source_from_row(row: &Row) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        priority: row.get(3)?,
        created_at: datetime_column(row, 4)?,
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        source_id: row.get(1)?,
        source_priority: row.get(2)?,
        title: row.get(3)?,
        link: row.get(4)?,
        summary: row.get(5)?,
        published_at: datetime_column(row, 6)?,
        posted_at: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| parse_datetime(&s)),
        created_at: datetime_column(row, 8)?,
    })
}
