use super::{Feed, Item, OutputFormat};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const JSON_FEED_VERSION: &str = "https://jsonfeed.org/version/1.1";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed writing Atom: {0}")]
    Atom(String),
    #[error("failed writing JSON feed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed writing RSS: {0}")]
    Rss(#[from] rss::Error),
}

/// Serialized feed body and the `Content-Type` to send it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFeed {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Atom => "application/atom+xml; charset=UTF-8",
            OutputFormat::Json => "application/json; charset=UTF-8",
            OutputFormat::Rss => "application/rss+xml; charset=UTF-8",
        }
    }
}

pub fn render(feed: &Feed, format: OutputFormat) -> Result<RenderedFeed, WriteError> {
    let body = match format {
        OutputFormat::Atom => write_atom(feed)?,
        OutputFormat::Json => write_json(feed)?,
        OutputFormat::Rss => write_rss(feed)?,
    };
    Ok(RenderedFeed {
        content_type: format.content_type(),
        body,
    })
}

fn rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

// ---------------------------------------------------------------------------
// Atom
// ---------------------------------------------------------------------------

/// Thin wrapper over the quick-xml writer for the handful of shapes Atom needs.
struct AtomWriter {
    inner: Writer<Cursor<Vec<u8>>>,
}

fn atom_err(e: impl fmt::Display) -> WriteError {
    WriteError::Atom(e.to_string())
}

impl AtomWriter {
    fn new() -> Self {
        Self {
            inner: Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), WriteError> {
        self.inner.write_event(event).map_err(atom_err)
    }

    fn start(&mut self, element: BytesStart<'_>) -> Result<(), WriteError> {
        self.event(Event::Start(element))
    }

    fn end(&mut self, name: &str) -> Result<(), WriteError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), WriteError> {
        self.start(BytesStart::new(name))?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn html_element(&mut self, name: &str, html: &str) -> Result<(), WriteError> {
        let mut element = BytesStart::new(name);
        element.push_attribute(("type", "html"));
        self.start(element)?;
        self.event(Event::Text(BytesText::new(html)))?;
        self.end(name)
    }

    fn link(&mut self, href: &str, rel: Option<&str>) -> Result<(), WriteError> {
        let mut element = BytesStart::new("link");
        element.push_attribute(("href", href));
        if let Some(rel) = rel {
            element.push_attribute(("rel", rel));
        }
        self.event(Event::Empty(element))
    }

    fn author(&mut self, name: &str) -> Result<(), WriteError> {
        self.start(BytesStart::new("author"))?;
        self.text_element("name", name)?;
        self.end("author")
    }

    fn into_bytes(self) -> Vec<u8> {
        self.inner.into_inner().into_inner()
    }
}

fn write_atom(feed: &Feed) -> Result<Vec<u8>, WriteError> {
    let feed_updated = feed.updated.unwrap_or_else(Utc::now);
    let mut w = AtomWriter::new();

    w.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut root = BytesStart::new("feed");
    root.push_attribute(("xmlns", ATOM_NS));
    w.start(root)?;

    w.text_element("title", &feed.title)?;
    w.text_element("id", &feed.link)?;
    w.text_element("updated", &rfc3339(&feed_updated))?;
    w.text_element("subtitle", &feed.description)?;
    if let Some(link) = non_empty(&feed.link) {
        w.link(link, None)?;
    }
    if let Some(author) = feed.author.as_deref().and_then(non_empty) {
        w.author(author)?;
    }
    if let Some(image) = feed.image.as_deref() {
        w.text_element("icon", image)?;
        w.text_element("logo", image)?;
    }

    for item in &feed.items {
        write_atom_entry(&mut w, item, feed_updated)?;
    }

    w.end("feed")?;
    Ok(w.into_bytes())
}

fn write_atom_entry(
    w: &mut AtomWriter,
    item: &Item,
    feed_updated: DateTime<Utc>,
) -> Result<(), WriteError> {
    let updated = item.updated.or(item.published).unwrap_or(feed_updated);

    w.start(BytesStart::new("entry"))?;
    w.text_element("title", &item.title)?;
    w.text_element("updated", &rfc3339(&updated))?;
    w.text_element("id", &item.id)?;
    if let Some(published) = &item.published {
        w.text_element("published", &rfc3339(published))?;
    }
    if let Some(link) = non_empty(&item.link) {
        w.link(link, Some("alternate"))?;
    }
    if let Some(author) = item.author.as_deref().and_then(non_empty) {
        w.author(author)?;
    }
    w.html_element("summary", &item.description)?;
    w.html_element("content", &item.content)?;
    w.end("entry")
}

// ---------------------------------------------------------------------------
// JSON Feed 1.1
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct JsonFeed<'a> {
    version: &'static str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    home_page_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    feed_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    favicon: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    authors: Vec<JsonAuthor<'a>>,
    items: Vec<JsonItem<'a>>,
}

#[derive(Serialize)]
struct JsonAuthor<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct JsonItem<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    title: &'a str,
    content_html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_published: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_modified: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    authors: Vec<JsonAuthor<'a>>,
}

fn json_authors(name: Option<&str>) -> Vec<JsonAuthor<'_>> {
    name.and_then(non_empty)
        .map(|name| JsonAuthor { name })
        .into_iter()
        .collect()
}

fn write_json(feed: &Feed) -> Result<Vec<u8>, WriteError> {
    let json = JsonFeed {
        version: JSON_FEED_VERSION,
        title: &feed.title,
        home_page_url: non_empty(&feed.link),
        feed_url: feed.self_url.as_deref(),
        description: non_empty(&feed.description),
        icon: feed.image.as_deref(),
        favicon: feed.image.as_deref(),
        authors: json_authors(feed.author.as_deref()),
        items: feed
            .items
            .iter()
            .map(|item| JsonItem {
                id: &item.id,
                url: non_empty(&item.link),
                title: &item.title,
                content_html: &item.content,
                summary: non_empty(&item.description),
                date_published: item.published.as_ref().map(rfc3339),
                date_modified: item.updated.as_ref().map(rfc3339),
                authors: json_authors(item.author.as_deref()),
            })
            .collect(),
    };

    let mut body = serde_json::to_vec_pretty(&json)?;
    body.push(b'\n');
    Ok(body)
}

// ---------------------------------------------------------------------------
// RSS 2.0
// ---------------------------------------------------------------------------

fn write_rss(feed: &Feed) -> Result<Vec<u8>, WriteError> {
    let mut channel = rss::Channel::default();
    channel.set_title(feed.title.as_str());
    channel.set_link(feed.link.as_str());
    channel.set_description(feed.description.as_str());
    channel.set_last_build_date(feed.updated.map(|d| d.to_rfc2822()));
    channel.set_managing_editor(feed.author.clone());

    if let Some(url) = &feed.image {
        let mut image = rss::Image::default();
        image.set_url(url.as_str());
        image.set_title(feed.title.as_str());
        image.set_link(feed.link.as_str());
        channel.set_image(Some(image));
    }

    let items: Vec<rss::Item> = feed
        .items
        .iter()
        .map(|item| {
            let mut guid = rss::Guid::default();
            guid.set_value(item.id.as_str());
            guid.set_permalink(item.id == item.link);

            let mut out = rss::Item::default();
            out.set_title(item.title.clone());
            out.set_link(non_empty(&item.link).map(str::to_string));
            out.set_guid(guid);
            out.set_description(item.description.clone());
            out.set_content(item.content.clone());
            out.set_author(item.author.clone());
            out.set_pub_date(item.published.or(item.updated).map(|d| d.to_rfc2822()));
            out
        })
        .collect();
    channel.set_items(items);

    Ok(channel.write_to(Vec::new())?)
}
