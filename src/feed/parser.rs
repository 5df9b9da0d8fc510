use chrono::{DateTime, Utc};
use feed_rs::model::Link;
use feed_rs::parser;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    /// Body is neither RSS nor Atom, or is malformed XML
    #[error("failed parsing feed: {0}")]
    Invalid(#[from] parser::ParseFeedError),
}

/// The parts of an upstream feed that survive into the proxied feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceFeed {
    pub title: String,
    pub link: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub image: Option<String>,
    pub items: Vec<SourceItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceItem {
    pub title: String,
    pub link: Option<String>,
    pub id: String,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub content: String,
}

/// Nitter emits an `atom:link rel="self"` next to the channel link; prefer
/// the latter.
fn primary_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

pub fn parse_feed(bytes: &[u8]) -> Result<SourceFeed, ParseError> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Nitter puts the tweet HTML in <description>; <dc:creator> lands
            // in authors alongside <author>.
            let content = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();
            let author = entry
                .authors
                .into_iter()
                .map(|p| p.name)
                .find(|name| !name.trim().is_empty());

            SourceItem {
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link: primary_link(&entry.links),
                id: entry.id,
                author,
                published: entry.published,
                updated: entry.updated,
                content,
            }
        })
        .collect();

    let image = feed
        .logo
        .map(|img| img.uri)
        .or_else(|| feed.icon.map(|img| img.uri))
        .filter(|uri| !uri.is_empty());

    Ok(SourceFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        link: primary_link(&feed.links),
        updated: feed.updated,
        author: feed.authors.into_iter().next().map(|p| p.name),
        image,
        items,
    })
}
