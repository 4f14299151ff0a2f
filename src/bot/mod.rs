mod commands;
mod markup;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::services::{IncomingMessage, OutgoingMessage, TelegramClient};
use crate::shutdown::cancellable;

pub use commands::{
    register_source_commands, AddSource, AdminsOnly, DeleteSource, GetSource, ListSources,
    SetPriority, SourceAdmin,
};
pub use markup::escape_markdown;

/// Upper bound for handling a single command.
pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Everything a command handler gets to see about one invocation.
pub struct CommandContext<'a> {
    pub api: &'a TelegramClient,
    pub message: &'a IncomingMessage,
    pub args: &'a str,
}

impl CommandContext<'_> {
    pub fn chat_id(&self) -> i64 {
        self.message.chat.id
    }

    pub fn sender_id(&self) -> Option<i64> {
        self.message.from.as_ref().map(|user| user.id)
    }

    pub async fn reply_plain(&self, text: impl Into<String> + Send) -> Result<()> {
        self.api
            .send_message(&OutgoingMessage::plain(self.chat_id(), text))
            .await
    }

    pub async fn reply_markdown(&self, text: impl Into<String> + Send) -> Result<()> {
        self.api
            .send_message(&OutgoingMessage::markdown(self.chat_id(), text))
            .await
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()>;
}

/// Long-polling command bot with handlers looked up by command name.
pub struct Bot {
    api: Arc<TelegramClient>,
    commands: HashMap<String, Box<dyn CommandHandler>>,
}

impl Bot {
    pub fn new(api: Arc<TelegramClient>) -> Self {
        Self {
            api,
            commands: HashMap::new(),
        }
    }

    pub fn register_command<H>(&mut self, name: &str, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.commands.insert(name.to_string(), Box::new(handler));
    }

    /// Polls for updates until `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let mut offset = 0;

        loop {
            let updates = match cancellable(cancel, self.api.get_updates(offset)).await {
                Ok(updates) => updates,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    warn!("Failed to get updates: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                if let Some(message) = update.message {
                    if tokio::time::timeout(UPDATE_TIMEOUT, self.handle_message(&message))
                        .await
                        .is_err()
                    {
                        warn!(chat_id = message.chat.id, "Command handling timed out");
                    }
                }
            }
        }

        info!("Bot stopped");
        Ok(())
    }

    /// Dispatches one message. Failures are logged and reported back to
    /// the chat on a best-effort basis.
    pub async fn handle_message(&self, message: &IncomingMessage) {
        let Some((name, args)) = message.text.as_deref().and_then(parse_command) else {
            return;
        };

        let Some(handler) = self.commands.get(name) else {
            debug!(command = name, "Ignoring unknown command");
            return;
        };

        let ctx = CommandContext {
            api: &self.api,
            message,
            args,
        };

        if let Err(e) = handler.handle(&ctx).await {
            warn!(command = name, "Command failed: {}", e);
            if let Err(e) = ctx.reply_plain(format!("Command /{} failed: {}", name, e)).await {
                warn!(command = name, "Failed to report command error: {}", e);
            }
        }
    }
}

/// Splits `/name@bot args` into the command name and its trimmed arguments.
pub fn parse_command(text: &str) -> Option<(&str, &str)> {
    let rest = text.trim_start().strip_prefix('/')?;

    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };

    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        None
    } else {
        Some((name, args))
    }
}
