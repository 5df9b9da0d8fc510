//! Fetching, rewriting and re-serializing Nitter feeds.
//!
//! - [`fetcher`] - tries each Nitter instance in turn until one serves the feed
//! - [`parser`] - reads the upstream RSS with `feed-rs`
//! - [`transform`] - rewrites content and canonicalizes links to twitter.com
//! - [`writer`] - serializes the result as Atom, JSON Feed or RSS
//!
//! [`process`] chains parse, transform and render for one response body.

pub mod fetcher;
pub mod parser;
pub mod transform;
pub mod writer;

pub use fetcher::{FeedFetcher, FetchError, FetchOptions, FetchOutcome};
pub use parser::{parse_feed, ParseError, SourceFeed, SourceItem};
pub use transform::{build_feed, BuildOptions, MAX_TITLE_CHARS};
pub use writer::{render, RenderedFeed, WriteError};

use crate::account::AccountPath;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Serialization format of the proxied feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Atom,
    Json,
    Rss,
}

/// A proxied feed, ready for serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub updated: Option<DateTime<Utc>>,
    pub author: Option<String>,
    /// Profile image, already pointing at pbs.twimg.com when recognized.
    pub image: Option<String>,
    /// Where this proxy serves the feed (JSON Feed `feed_url`).
    pub self_url: Option<String>,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub title: String,
    pub link: String,
    pub id: String,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    /// HTML body
    pub content: String,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Parses an upstream feed body, rewrites it for `account` and renders it in
/// `options.format`.
pub fn process(
    bytes: &[u8],
    account: &AccountPath,
    options: &BuildOptions,
) -> Result<RenderedFeed, FeedError> {
    let source = parse_feed(bytes)?;
    let feed = build_feed(source, account, options);
    Ok(render(&feed, options.format)?)
}
