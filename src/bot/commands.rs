use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{NewSource, Source};

use super::{escape_markdown, Bot, CommandContext, CommandHandler};

/// Source management used by the admin commands.
#[async_trait]
pub trait SourceAdmin: Send + Sync {
    async fn add_source(&self, source: NewSource) -> Result<i64>;
    async fn source_by_id(&self, id: i64) -> Result<Option<Source>>;
    async fn all_sources(&self) -> Result<Vec<Source>>;
    async fn delete_source(&self, id: i64) -> Result<bool>;
    async fn set_source_priority(&self, id: i64, priority: i64) -> Result<bool>;
}

/// Registers every source command, each restricted to channel admins.
pub fn register_source_commands(bot: &mut Bot, store: Arc<dyn SourceAdmin>, channel_id: i64) {
    bot.register_command(
        "addsource",
        AdminsOnly::new(channel_id, AddSource::new(store.clone())),
    );
    bot.register_command(
        "deletesource",
        AdminsOnly::new(channel_id, DeleteSource::new(store.clone())),
    );
    bot.register_command(
        "getsource",
        AdminsOnly::new(channel_id, GetSource::new(store.clone())),
    );
    bot.register_command(
        "listsources",
        AdminsOnly::new(channel_id, ListSources::new(store.clone())),
    );
    bot.register_command(
        "setpriority",
        AdminsOnly::new(channel_id, SetPriority::new(store)),
    );
}

/// Lets a command through only for administrators of `channel_id`.
pub struct AdminsOnly<H> {
    channel_id: i64,
    inner: H,
}

impl<H> AdminsOnly<H> {
    pub fn new(channel_id: i64, inner: H) -> Self {
        Self { channel_id, inner }
    }
}

#[async_trait]
impl<H: CommandHandler> CommandHandler for AdminsOnly<H> {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let admins = ctx.api.get_chat_administrators(self.channel_id).await?;

        let allowed = ctx
            .sender_id()
            .is_some_and(|id| admins.iter().any(|member| member.user.id == id));

        if allowed {
            self.inner.handle(ctx).await
        } else {
            ctx.reply_plain("You do not have permission to execute this command.")
                .await
        }
    }
}

/// `/addsource {"name": "...", "url": "...", "priority": 0}`
pub struct AddSource {
    store: Arc<dyn SourceAdmin>,
}

impl AddSource {
    pub fn new(store: Arc<dyn SourceAdmin>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommandHandler for AddSource {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let source: NewSource = serde_json::from_str(ctx.args).map_err(|e| {
            AppError::InvalidArguments(format!(
                "expected {{\"name\": \"...\", \"url\": \"...\"}}: {}",
                e
            ))
        })?;

        if source.name.trim().is_empty() {
            return Err(AppError::InvalidArguments("name must not be empty".to_string()));
        }
        Url::parse(&source.url)
            .map_err(|e| AppError::InvalidArguments(format!("invalid url: {}", e)))?;

        let id = self.store.add_source(source).await?;

        ctx.reply_markdown(format!(
            "Source added with ID: `{}`\\. Use this ID to update the source or delete it\\.",
            id
        ))
        .await
    }
}

/// `/deletesource <id>`
pub struct DeleteSource {
    store: Arc<dyn SourceAdmin>,
}

impl DeleteSource {
    pub fn new(store: Arc<dyn SourceAdmin>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommandHandler for DeleteSource {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let id = parse_id(ctx.args)?;

        if self.store.delete_source(id).await? {
            ctx.reply_plain("The source has been successfully removed").await
        } else {
            ctx.reply_plain(format!("No source with ID {}", id)).await
        }
    }
}

/// `/getsource <id>`
pub struct GetSource {
    store: Arc<dyn SourceAdmin>,
}

impl GetSource {
    pub fn new(store: Arc<dyn SourceAdmin>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommandHandler for GetSource {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let id = parse_id(ctx.args)?;

        match self.store.source_by_id(id).await? {
            Some(source) => ctx.reply_markdown(format_source(&source)).await,
            None => ctx.reply_plain(format!("No source with ID {}", id)).await,
        }
    }
}

/// `/listsources`
pub struct ListSources {
    store: Arc<dyn SourceAdmin>,
}

impl ListSources {
    pub fn new(store: Arc<dyn SourceAdmin>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommandHandler for ListSources {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let sources = self.store.all_sources().await?;

        let infos: Vec<String> = sources.iter().map(format_source).collect();

        ctx.reply_markdown(format!(
            "Source list \\(total {}\\):\n\n{}",
            sources.len(),
            infos.join("\n\n")
        ))
        .await
    }
}

/// `/setpriority <id> <priority>`
pub struct SetPriority {
    store: Arc<dyn SourceAdmin>,
}

impl SetPriority {
    pub fn new(store: Arc<dyn SourceAdmin>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommandHandler for SetPriority {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let mut parts = ctx.args.split_whitespace();
        let (Some(id), Some(priority), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AppError::InvalidArguments(
                "expected <id> <priority>".to_string(),
            ));
        };

        let id = parse_id(id)?;
        let priority: i64 = priority
            .parse()
            .map_err(|_| AppError::InvalidArguments(format!("invalid priority: {}", priority)))?;

        if self.store.set_source_priority(id, priority).await? {
            ctx.reply_plain(format!("Priority of source {} set to {}", id, priority))
                .await
        } else {
            ctx.reply_plain(format!("No source with ID {}", id)).await
        }
    }
}

fn parse_id(args: &str) -> Result<i64> {
    args.trim()
        .parse()
        .map_err(|_| AppError::InvalidArguments(format!("expected a numeric source ID, got {:?}", args)))
}

fn format_source(source: &Source) -> String {
    format!(
        "Name: *{}*\nID: `{}`\nPriority: {}\nFeed URL: {}",
        escape_markdown(&source.name),
        source.id,
        escape_markdown(&source.priority.to_string()),
        escape_markdown(&source.url),
    )
}
