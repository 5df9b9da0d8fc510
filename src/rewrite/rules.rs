use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;
use url::Url;

// Building blocks shared by every pattern.
pub(crate) const START: &str = r"(?:^|\b)";
pub(crate) const END: &str = r"(?:$|\b)";
pub(crate) const SCHEME: &str = r"https?://";
pub(crate) const HOST: &str = r"[a-zA-Z0-9][-a-zA-Z0-9]*\.[-.a-zA-Z0-9]+";
/// Nitter escapes slashes inside `/pic/` paths inconsistently.
pub(crate) const SLASH: &str = r"(?:/|%2F)";

/// RFC 4648 section 5 alphabet; Nitter sometimes drops the padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Characters allowed in a decoded `/pic/enc/` payload.
static DECODED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-_.~/%:@!$&+,;=a-zA-Z0-9]+$").expect("decoded path pattern is valid")
});

/// One step of the content rewrite pipeline.
///
/// The variants are listed in pipeline order: [`RuleKind::EncodedPath`] must
/// run first because it turns `/pic/enc/...` URLs into the plain `/pic/...`
/// shapes that the media rules match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// `https://mirror/pic/enc/<base64url>` to `https://mirror/pic/<decoded>`.
    EncodedPath,
    /// `mirror/<user>/status/<id>#m` to `twitter.com/<user>/status/<id>`.
    StatusLink,
    /// `https://mirror/pic/media/<id>.jpg` to `https://pbs.twimg.com/media/<id>?format=jpg`.
    ImageLink,
    /// `https://mirror/pic/video.twimg.com/tweet_video/<name>`.
    VideoLink,
    /// `https://mirror/pic/tweet_video_thumb/<name>`.
    VideoThumbnail,
    /// `https://mirror/pic/ext_tw_video_thumb/<id>/pu/img/<name>`.
    ExternalVideoThumbnail,
    /// Invidious `host/watch?v=<id>` to `youtube.com/watch?v=<id>`.
    VideoPlatformWatch,
    /// Invidious short links without `/watch?v=`.
    VideoPlatformShort,
}

/// Pipeline order. Earlier rules produce input for later ones.
pub const RULE_ORDER: [RuleKind; 8] = [
    RuleKind::EncodedPath,
    RuleKind::StatusLink,
    RuleKind::ImageLink,
    RuleKind::VideoLink,
    RuleKind::VideoThumbnail,
    RuleKind::ExternalVideoThumbnail,
    RuleKind::VideoPlatformWatch,
    RuleKind::VideoPlatformShort,
];

impl RuleKind {
    fn pattern(self) -> String {
        match self {
            // No trailing boundary: payloads may end in '=' followed by '"', and
            // \b needs a word character on one side.
            RuleKind::EncodedPath => format!(
                "{START}({SCHEME}{HOST}/pic/)enc/([-_=a-zA-Z0-9]+)"
            ),
            RuleKind::StatusLink => format!(
                "{START}({SCHEME})?{HOST}/([_a-zA-Z0-9]+|i/web){SLASH}status{SLASH}(\\d+)(?:#m)?{END}"
            ),
            RuleKind::ImageLink => format!(
                "{START}{SCHEME}{HOST}/pic{SLASH}media{SLASH}([-_a-zA-Z0-9]+)\\.(jpg|png){END}"
            ),
            RuleKind::VideoLink => format!(
                "{START}{SCHEME}{HOST}/pic{SLASH}video\\.twimg\\.com{SLASH}tweet_video{SLASH}([-_.a-zA-Z0-9]+){END}"
            ),
            RuleKind::VideoThumbnail => format!(
                "{START}{SCHEME}{HOST}/pic{SLASH}tweet_video_thumb{SLASH}([-_.a-zA-Z0-9]+){END}"
            ),
            RuleKind::ExternalVideoThumbnail => format!(
                "{START}{SCHEME}{HOST}/pic{SLASH}ext_tw_video_thumb{SLASH}(\\d+){SLASH}pu{SLASH}img{SLASH}([-_.a-zA-Z0-9]+){END}"
            ),
            RuleKind::VideoPlatformWatch => format!(
                "{START}({SCHEME})?{HOST}/watch\\?v=([-_a-zA-Z0-9]+){END}"
            ),
            RuleKind::VideoPlatformShort => format!(
                "{START}({SCHEME})?invidious\\.snopyta\\.org/([-_a-zA-Z0-9]{{8,}}){END}"
            ),
        }
    }

    /// Builds the replacement for one match. `None` leaves the match as is.
    fn apply(self, caps: &Captures<'_>) -> Option<String> {
        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        match self {
            RuleKind::EncodedPath => {
                let payload = group(2);
                let decoded = match URL_SAFE_LENIENT.decode(payload) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::debug!(payload = %payload, error = %e, "Failed base64-decoding media path");
                        return None;
                    }
                };
                let path = match String::from_utf8(decoded) {
                    Ok(path) if DECODED_PATH.is_match(&path) => path,
                    _ => {
                        tracing::debug!(payload = %payload, "Decoded media path is not a valid path segment");
                        return None;
                    }
                };
                Some(format!("{}{}", group(1), path))
            }
            RuleKind::StatusLink => Some(with_optional_scheme(
                group(1),
                &format!("twitter.com/{}/status/{}", group(2), group(3)),
            )),
            RuleKind::ImageLink => Some(format!(
                "https://pbs.twimg.com/media/{}?format={}",
                group(1),
                group(2)
            )),
            RuleKind::VideoLink => Some(format!("https://video.twimg.com/tweet_video/{}", group(1))),
            RuleKind::VideoThumbnail => Some(format!(
                "https://video.twimg.com/tweet_video_thumb/{}",
                group(1)
            )),
            RuleKind::ExternalVideoThumbnail => Some(format!(
                "https://pbs.twimg.com/ext_tw_video_thumb/{}/pu/img/{}",
                group(1),
                group(2)
            )),
            RuleKind::VideoPlatformWatch | RuleKind::VideoPlatformShort => Some(
                with_optional_scheme(group(1), &format!("youtube.com/watch?v={}", group(2))),
            ),
        }
    }
}

/// Only emit a scheme when the original link had one.
fn with_optional_scheme(scheme: &str, rest: &str) -> String {
    if scheme.is_empty() {
        rest.to_string()
    } else {
        format!("https://{rest}")
    }
}

/// A compiled rewrite rule.
#[derive(Debug)]
pub struct RewriteRule {
    pub kind: RuleKind,
    pattern: Regex,
}

impl RewriteRule {
    fn new(kind: RuleKind) -> Self {
        let pattern = Regex::new(&kind.pattern()).expect("rewrite rule pattern is valid");
        Self { kind, pattern }
    }

    /// Applies this rule to every match in `s`.
    pub fn apply_to<'a>(&self, s: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(s, |caps: &Captures<'_>| {
            self.kind
                .apply(caps)
                .unwrap_or_else(|| caps[0].to_string())
        })
    }
}

static RULES: LazyLock<Vec<RewriteRule>> =
    LazyLock::new(|| RULE_ORDER.iter().map(|&kind| RewriteRule::new(kind)).collect());

/// The compiled pipeline, in evaluation order.
pub fn rules() -> &'static [RewriteRule] {
    &RULES
}

/// Rewrites Nitter-specific URLs in an item body to their Twitter equivalents.
///
/// Public Nitter instances are often misconfigured (rewriting links to start
/// with `http://localhost`, for example), so every URL that looks like it can
/// be served by Twitter is rewritten regardless of host. Newlines become
/// `<br>` afterwards since readers render the body as HTML.
pub fn rewrite(content: &str) -> String {
    rewrite_with_source(content, None)
}

/// Like [`rewrite`], but also rewrites any remaining link on `source`'s host
/// (the mirror that served the item) to `https://twitter.com`.
///
/// This catches bare account links (`http://mirror/NASA`) and search links
/// which carry no other recognizable shape. Media paths under `/pic/` that no
/// rule understood are left pointing at the mirror.
pub fn rewrite_with_source(content: &str, source: Option<&Url>) -> String {
    let mut s = content.to_string();
    for rule in rules() {
        if let Some(rewritten) = owned(rule.apply_to(&s)) {
            s = rewritten;
        }
    }

    if let Some(source) = source {
        if let Some(rewritten) = owned(rewrite_source_links(&s, source)) {
            s = rewritten;
        }
    }

    s.replace('\n', "<br>")
}

/// `Some` only when a replacement actually happened.
fn owned(cow: Cow<'_, str>) -> Option<String> {
    match cow {
        Cow::Owned(s) => Some(s),
        Cow::Borrowed(_) => None,
    }
}

fn rewrite_source_links<'a>(s: &'a str, source: &Url) -> Cow<'a, str> {
    let Some(host) = source.host_str() else {
        return Cow::Borrowed(s);
    };
    let authority = match source.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let pattern = format!(
        "{START}{SCHEME}{}/([^\\s\"'<>]*)",
        regex::escape(&authority)
    );
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(host = %authority, error = %e, "Failed building source host pattern");
            return Cow::Borrowed(s);
        }
    };
    re.replace_all(s, |caps: &Captures<'_>| {
        let path = &caps[1];
        if path.starts_with("pic/") || path.starts_with("pic%2F") || path == "pic" {
            caps[0].to_string()
        } else {
            // Nitter's `#m` anchor means nothing on twitter.com.
            let path = path.strip_suffix("#m").unwrap_or(path);
            format!("https://twitter.com/{path}")
        }
    })
}
