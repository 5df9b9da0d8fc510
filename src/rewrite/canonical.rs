use super::rules::{HOST, SCHEME, SLASH};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Host every feed, item link and GUID is rewritten to.
pub const CANONICAL_HOST: &str = "twitter.com";

/// Exactly matches a Nitter profile image URL, e.g.
/// `https://example.org/pic/profile_images%2F1234567890%2F_AbQ3eRu_400x400.jpg`.
/// Some instances keep the original `pbs.twimg.com` host inside the path.
static ICON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "^{SCHEME}{HOST}/pic{SLASH}(?:pbs\\.twimg\\.com{SLASH})?profile_images{SLASH}(\\d+){SLASH}([-_.a-zA-Z0-9]+)$"
    ))
    .expect("icon pattern is valid")
});

/// Rewrites a whole link to `https://twitter.com`, keeping path and query.
///
/// Nitter appends `#m` fragments to its links; those are dropped. Input that
/// is not an absolute URL is logged and returned unchanged.
pub fn canonicalize_link(orig: &str) -> String {
    if orig.is_empty() {
        return String::new();
    }

    let mut url = match Url::parse(orig) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(url = %orig, error = %e, "Failed parsing link");
            return orig.to_string();
        }
    };

    if url.set_scheme("https").is_err()
        || url.set_host(Some(CANONICAL_HOST)).is_err()
        || url.set_port(None).is_err()
    {
        tracing::warn!(url = %orig, "Link cannot be rebased onto the canonical host");
        return orig.to_string();
    }
    url.set_fragment(None);
    url.to_string()
}

/// Rewrites a Nitter profile image URL to the corresponding `pbs.twimg.com`
/// URL. Anything else is returned unchanged.
pub fn canonicalize_icon(orig: &str) -> String {
    match ICON.captures(orig) {
        Some(caps) => format!(
            "https://pbs.twimg.com/profile_images/{}/{}",
            &caps[1], &caps[2]
        ),
        None => orig.to_string(),
    }
}
