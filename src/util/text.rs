use std::borrow::Cow;

/// Ellipsis appended to truncated titles.
const ELLIPSIS: char = '…';

fn is_disallowed(c: char) -> bool {
    (c < '\u{20}' && c != '\t' && c != '\n' && c != '\r') || c == '\u{7f}'
}

/// Strips control characters that XML 1.0 cannot carry.
///
/// Tab, newline and carriage return are kept. Returns `Cow::Borrowed` when
/// nothing needed stripping.
///
/// # Examples
///
/// ```
/// use nitter_rss_proxy::util::strip_control_chars;
///
/// assert_eq!(strip_control_chars("he\x00llo\x1b"), "hello");
/// assert_eq!(strip_control_chars("line\nbreak"), "line\nbreak");
/// ```
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_disallowed) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_disallowed(c)).collect())
}

/// Truncates `s` to at most `max_chars` characters.
///
/// Nitter stuffs the whole tweet into the item title, which renders badly in
/// most readers. Longer strings keep their first `max_chars - 1` characters
/// followed by `…`, so the result is exactly `max_chars` characters long.
///
/// # Examples
///
/// ```
/// use nitter_rss_proxy::util::truncate_chars;
///
/// assert_eq!(truncate_chars("short", 10), "short");
/// assert_eq!(truncate_chars("abcdef", 4), "abc…");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some(_) => {
            let mut out: String = s.chars().take(max_chars - 1).collect();
            out.push(ELLIPSIS);
            Cow::Owned(out)
        }
    }
}
