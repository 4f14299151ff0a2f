use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use newswire::ai::Summarizer;
use newswire::bot::{register_source_commands, Bot};
use newswire::config::Config;
use newswire::db::Repository;
use newswire::error::{AppError, Result};
use newswire::feed::{feed_client, Fetcher, KeywordFilter};
use newswire::services::{PublishSettings, Publisher, TelegramClient};
use newswire::shutdown::watch_signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Serve,
    FetchOnce,
    PublishOnce,
}

struct Args {
    config_path: Option<PathBuf>,
    mode: Mode,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args {
        config_path: None,
        mode: Mode::Serve,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| AppError::Config("--config needs a path".to_string()))?;
                parsed.config_path = Some(PathBuf::from(path));
            }
            "--fetch-once" => parsed.mode = Mode::FetchOnce,
            "--publish-once" => parsed.mode = Mode::PublishOnce,
            other => {
                return Err(AppError::Config(format!(
                    "unknown argument {other}; usage: newswire [--config <path>] [--fetch-once | --publish-once]"
                )))
            }
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = Config::load(args.config_path.as_deref())?;

    let repository = Arc::new(Repository::new(&config.db_path).await?);
    let telegram = Arc::new(TelegramClient::with_api_url(
        &config.telegram_bot_token,
        &config.telegram_api_url,
    )?);
    let summarizer = Arc::new(Summarizer::with_api_url(
        config.openai_key.clone(),
        config.openai_model.clone(),
        config.openai_prompt.clone(),
        config.openai_api_url.clone(),
    )?);
    if !summarizer.is_enabled() {
        warn!("No OpenAI key configured, articles are posted without summaries");
    }

    let fetcher = Fetcher::new(
        repository.clone(),
        repository.clone(),
        feed_client()?,
        config.fetch_interval(),
        KeywordFilter::new(&config.filter_keywords),
    );
    let publisher = Publisher::new(
        repository.clone(),
        summarizer,
        telegram.clone(),
        PublishSettings {
            interval: config.publish_interval(),
            lookback: config.lookback_window(),
            channel_id: config.telegram_channel_id,
        },
    )?;

    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    match args.mode {
        Mode::FetchOnce => return clean_stop(fetcher.fetch_once(&cancel).await),
        Mode::PublishOnce => return clean_stop(publisher.publish_once(&cancel).await),
        Mode::Serve => {}
    }

    let mut bot = Bot::new(telegram);
    register_source_commands(&mut bot, repository.clone(), config.telegram_channel_id);

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    tasks.spawn({
        let cancel = cancel.clone();
        async move { fetcher.run_forever(&cancel).await }
    });
    tasks.spawn({
        let cancel = cancel.clone();
        async move { publisher.run_forever(&cancel).await }
    });
    tasks.spawn({
        let cancel = cancel.clone();
        async move { bot.run(&cancel).await }
    });

    info!("newswire started");

    let mut result = Ok(());
    while let Some(joined) = tasks.join_next().await {
        // One loop ending takes the others down with it.
        cancel.cancel();

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(AppError::from(e)),
        };

        if let Err(e) = outcome {
            error!("{}", e);
            if result.is_ok() {
                result = Err(e);
            }
        }
    }

    info!("newswire stopped");
    result
}

fn clean_stop(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_cancelled() => Ok(()),
        other => other,
    }
}
