use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parsing error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("source {name} (id {id}): {error}")]
    Source {
        id: i64,
        name: String,
        #[source]
        error: Box<AppError>,
    },

    #[error("Summarizer is disabled")]
    SummarizerDisabled,

    #[error("Empty response from the language model")]
    EmptyResponse,

    #[error("OpenAI API error: {0}")]
    OpenAiApi(String),

    #[error("Summarization timed out")]
    SummaryTimeout,

    #[error("Content extraction failed: {0}")]
    Extraction(String),

    #[error("Telegram API error: {0}")]
    TelegramApi(String),

    #[error("Invalid command arguments: {0}")]
    InvalidArguments(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Tags an error with the feed source it came from.
    ///
    /// Cancellation is left untagged so callers can keep treating it as a
    /// clean stop.
    pub fn for_source(id: i64, name: &str, error: AppError) -> Self {
        match error {
            AppError::Cancelled => AppError::Cancelled,
            error @ AppError::Source { .. } => error,
            error => AppError::Source {
                id,
                name: name.to_string(),
                error: Box::new(error),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            AppError::Cancelled => true,
            AppError::Source { error, .. } => error.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
