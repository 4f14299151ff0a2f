mod content_fetcher;
mod publisher;
mod telegram;

pub use content_fetcher::{cleanup_text, extract_content, ContentFetcher};
pub use publisher::{compose_message, ArticleProvider, PublishSettings, Publisher, Summarize};
pub use telegram::{
    ChatMember, IncomingMessage, MessageSender, OutgoingMessage, ParseMode, TelegramClient,
    Update, TELEGRAM_API_URL,
};
