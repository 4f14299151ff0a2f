mod fetcher;
mod filter;
mod source;

use std::time::Duration;

use reqwest::Client;

use crate::error::Result;

pub use fetcher::{ArticleStore, Fetcher, SourceProvider};
pub use filter::KeywordFilter;
pub use source::{RssSource, SourceAdapter};

const USER_AGENT: &str = concat!("newswire/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by every feed adapter.
pub fn feed_client() -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}
