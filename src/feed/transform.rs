use super::parser::{SourceFeed, SourceItem};
use super::{Feed, Item, OutputFormat};
use crate::account::AccountPath;
use crate::rewrite::{canonicalize_icon, canonicalize_link, rewrite_with_source};
use crate::util::{strip_control_chars, truncate_chars};
use std::collections::BTreeMap;
use url::Url;

/// Nitter repeats the whole tweet in the title, which most readers display
/// poorly.
pub const MAX_TITLE_CHARS: usize = 80;

/// Per-request switches for [`build_feed`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub format: OutputFormat,
    pub rewrite: bool,
    pub debug_authors: bool,
    /// Public base URL of this proxy, used for the JSON feed's `feed_url`.
    pub base: Option<Url>,
}

fn feed_url(base: &Url, account: &AccountPath) -> String {
    let mut url = base.clone();
    let path = format!("{}/{}", url.path().trim_end_matches('/'), account.as_str());
    url.set_path(&path);
    url.to_string()
}

fn build_item(source: SourceItem, options: &BuildOptions) -> Item {
    let link = source.link.as_deref().map(canonicalize_link).unwrap_or_default();

    // Only URL-shaped guids are canonicalized; opaque ones pass through.
    let id = if Url::parse(&source.id).is_ok() {
        canonicalize_link(&source.id)
    } else if source.id.is_empty() {
        link.clone()
    } else {
        source.id
    };

    let content = if options.rewrite {
        let origin = source.link.as_deref().and_then(|l| Url::parse(l).ok());
        rewrite_with_source(&source.content, origin.as_ref())
    } else {
        source.content
    };

    let full_title = strip_control_chars(&source.title);
    let title = truncate_chars(&full_title, MAX_TITLE_CHARS).into_owned();
    // JSON summaries are plain text, so they get the whole tweet.
    let description = match options.format {
        OutputFormat::Json => full_title.into_owned(),
        OutputFormat::Atom | OutputFormat::Rss => content.clone(),
    };

    Item {
        title,
        link,
        id,
        author: source.author,
        published: source.published,
        updated: source.updated,
        content,
        description,
    }
}

/// Converts an upstream feed into the proxied feed for `account`.
pub fn build_feed(source: SourceFeed, account: &AccountPath, options: &BuildOptions) -> Feed {
    tracing::debug!(account = %account, items = source.items.len(), "Rewriting feed items");

    let items: Vec<Item> = source
        .items
        .into_iter()
        .map(|item| build_item(item, options))
        .collect();

    if options.debug_authors {
        // Misbehaving mirrors occasionally serve someone else's timeline.
        let mut authors: BTreeMap<&str, usize> = BTreeMap::new();
        for item in &items {
            *authors.entry(item.author.as_deref().unwrap_or("")).or_default() += 1;
        }
        tracing::info!(account = %account, authors = ?authors, "Item authors");
    }

    Feed {
        title: strip_control_chars(&source.title).into_owned(),
        link: source.link.as_deref().map(canonicalize_link).unwrap_or_default(),
        description: format!("Twitter feed for {}", account),
        updated: source.updated,
        author: source.author,
        image: source.image.as_deref().map(canonicalize_icon),
        self_url: options.base.as_ref().map(|base| feed_url(base, account)),
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn account(s: &str) -> AccountPath {
        AccountPath::extract(s).unwrap()
    }

    fn source_item() -> SourceItem {
        SourceItem {
            title: "Hello\u{7}world".to_string(),
            link: Some("https://nitter.example.com/NASA/status/123#m".to_string()),
            id: "https://nitter.example.com/NASA/status/123#m".to_string(),
            author: Some("@NASA".to_string()),
            content: concat!(
                "<a href=\"https://nitter.example.com/NASA/status/456#m\">x</a>\n",
                "<a href=\"https://nitter.example.com/NASA\">@NASA</a>"
            )
            .to_string(),
            ..SourceItem::default()
        }
    }

    fn source_feed(items: Vec<SourceItem>) -> SourceFeed {
        SourceFeed {
            title: "NASA / @NASA".to_string(),
            link: Some("https://nitter.example.com/NASA".to_string()),
            image: Some(
                "https://nitter.example.com/pic/profile_images/1321163587679784960/0ZxKlEKB_400x400.jpg"
                    .to_string(),
            ),
            items,
            ..SourceFeed::default()
        }
    }

    fn options(format: OutputFormat) -> BuildOptions {
        BuildOptions {
            format,
            rewrite: true,
            debug_authors: true,
            base: None,
        }
    }

    #[test]
    fn test_feed_fields() {
        let feed = build_feed(
            source_feed(vec![]),
            &account("/NASA"),
            &options(OutputFormat::Atom),
        );
        assert_eq!(feed.title, "NASA / @NASA");
        assert_eq!(feed.link, "https://twitter.com/NASA");
        assert_eq!(feed.description, "Twitter feed for NASA");
        assert_eq!(
            feed.image.as_deref(),
            Some("https://pbs.twimg.com/profile_images/1321163587679784960/0ZxKlEKB_400x400.jpg")
        );
        assert_eq!(feed.self_url, None);
    }

    #[test]
    fn test_item_rewritten() {
        let feed = build_feed(
            source_feed(vec![source_item()]),
            &account("/NASA"),
            &options(OutputFormat::Atom),
        );
        let item = &feed.items[0];
        assert_eq!(item.title, "Helloworld");
        assert_eq!(item.link, "https://twitter.com/NASA/status/123");
        assert_eq!(item.id, "https://twitter.com/NASA/status/123");
        assert_eq!(
            item.content,
            concat!(
                "<a href=\"https://twitter.com/NASA/status/456\">x</a><br>",
                "<a href=\"https://twitter.com/NASA\">@NASA</a>"
            )
        );
        assert_eq!(item.description, item.content);
        assert_eq!(item.author.as_deref(), Some("@NASA"));
    }

    #[test]
    fn test_rewrite_disabled() {
        let mut opts = options(OutputFormat::Rss);
        opts.rewrite = false;
        let source = source_item();
        let feed = build_feed(source_feed(vec![source.clone()]), &account("/NASA"), &opts);
        assert_eq!(feed.items[0].content, source.content);
        // Links are canonicalized regardless.
        assert_eq!(feed.items[0].link, "https://twitter.com/NASA/status/123");
    }

    #[test]
    fn test_json_description_is_full_title() {
        let feed = build_feed(
            source_feed(vec![source_item()]),
            &account("/NASA"),
            &options(OutputFormat::Json),
        );
        assert_eq!(feed.items[0].description, "Helloworld");

        let mut long = source_item();
        long.title = "word ".repeat(40).trim_end().to_string();
        let feed = build_feed(
            source_feed(vec![long.clone()]),
            &account("/NASA"),
            &options(OutputFormat::Json),
        );
        let item = &feed.items[0];
        assert_eq!(item.description, long.title);
        assert_eq!(item.title.chars().count(), MAX_TITLE_CHARS);
        assert!(item.title.ends_with('…'));
    }

    #[test]
    fn test_title_truncated() {
        let mut item = source_item();
        item.title = "é".repeat(100);
        let feed = build_feed(
            source_feed(vec![item]),
            &account("/NASA"),
            &options(OutputFormat::Atom),
        );
        let title = &feed.items[0].title;
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
        assert!(title.ends_with('…'));

        let mut short = source_item();
        short.title = "x".repeat(MAX_TITLE_CHARS);
        let feed = build_feed(
            source_feed(vec![short]),
            &account("/NASA"),
            &options(OutputFormat::Atom),
        );
        assert_eq!(feed.items[0].title, "x".repeat(MAX_TITLE_CHARS));
    }

    #[test]
    fn test_opaque_guid_kept() {
        let mut item = source_item();
        item.id = "tag-123".to_string();
        let mut missing = source_item();
        missing.id = String::new();
        let feed = build_feed(
            source_feed(vec![item, missing]),
            &account("/NASA"),
            &options(OutputFormat::Atom),
        );
        assert_eq!(feed.items[0].id, "tag-123");
        assert_eq!(feed.items[1].id, "https://twitter.com/NASA/status/123");
    }

    #[test]
    fn test_feed_url_from_base() {
        let mut opts = options(OutputFormat::Json);
        opts.base = Some(Url::parse("https://proxy.example.org/tw/").unwrap());
        let feed = build_feed(source_feed(vec![]), &account("/a,b/media"), &opts);
        assert_eq!(
            feed.self_url.as_deref(),
            Some("https://proxy.example.org/tw/a,b/media")
        );
    }
}
