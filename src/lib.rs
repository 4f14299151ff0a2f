//! Collects RSS and Atom feeds into SQLite and posts one summarized
//! article at a time to a Telegram channel.

pub mod ai;
pub mod bot;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod services;
pub mod shutdown;

pub use error::{AppError, Result};
