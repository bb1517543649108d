//! Message text translation between the two platforms (spec §4.5): wraps
//! Euphoria-recognized links in Instant's `<...>`/`<!...>` sigils going one
//! way, and strips sigils the autolinker would also have recognized going
//! the other way.

use std::sync::LazyLock;

use fancy_regex::Regex;

use crate::autolinker::{Span, autolink, is_link};
use crate::types::Platform;

/// Instant's own (lenient) URL pattern. Shared between the two directions:
/// used directly to decide whether an autolinked span is "Instant-shaped"
/// enough to wrap, and embedded in [`INSTANT_URL_SEARCH`] to find sigil-
/// wrapped spans to strip.
const INSTANT_URL_PATTERN: &str = r"((?!javascript:)[a-zA-Z]+:(//)?)?([a-zA-Z0-9._~-]+@)?([a-zA-Z0-9.-]+)(:[0-9]+)?(/[^>]*)?";

static INSTANT_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(INSTANT_URL_PATTERN).expect("instant url pattern is well-formed"));

static INSTANT_URL_SEARCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("<!?({INSTANT_URL_PATTERN})>")).expect("instant sigil pattern is well-formed")
});

/// Approximation of the URLs Euphoria's own frontend auto-embeds as
/// images; used to decide between the `<` and `<!` sigil.
static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?((i\.)?imgur\.com|i\.ytimg\.com|imgs\.xkcd\.com)\b")
        .expect("image url pattern is well-formed")
});

static ENDS_WITH_OPEN_SIGIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!?$").unwrap());
static STARTS_WITH_CLOSE_SIGIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>").unwrap());

/// Translates `text` as observed on `platform` into the form to be posted
/// on the opposite platform.
pub fn translate(platform: Platform, text: &str) -> String {
    match platform {
        Platform::Euphoria => to_instant(text),
        Platform::Instant => to_euphoria(text),
    }
}

/// Euphoria -> Instant: wrap autolinked spans that Instant's own URL regex
/// would also recognize in full, in Instant's link sigils, so its frontend
/// renders them the same way the Euphoria frontend already did.
fn to_instant(text: &str) -> String {
    let spans = autolink(text);
    let mut out = String::new();

    for (idx, span) in spans.iter().enumerate() {
        let link = match span {
            Span::Link(link) => link,
            Span::Email(s) | Span::Text(s) => {
                out.push_str(s);
                continue;
            }
        };

        let before = if idx == 0 { "" } else { spans[idx - 1].text() };
        let after = if idx + 1 == spans.len() { "" } else { spans[idx + 1].text() };
        let already_wrapped = ENDS_WITH_OPEN_SIGIL.is_match(before).unwrap_or(false)
            && STARTS_WITH_CLOSE_SIGIL.is_match(after).unwrap_or(false);
        if already_wrapped {
            out.push_str(link);
            continue;
        }

        let whole_match = match INSTANT_URL_RE.find(link) {
            Ok(Some(m)) => m.start() == 0 && m.end() == link.len(),
            _ => false,
        };
        if !whole_match {
            out.push_str(link);
            continue;
        }

        let prefix = if IMAGE_URL.is_match(link).unwrap_or(false) { "<!" } else { "<" };
        out.push_str(prefix);
        out.push_str(link);
        out.push('>');
    }

    out
}

/// Instant -> Euphoria: strip sigils around anything the autolinker would
/// also have recognized as a link on its own, leaving other sigil-wrapped
/// text (Instant-only syntax Euphoria wouldn't render as a link) intact.
fn to_euphoria(text: &str) -> String {
    let mut out = String::new();
    let mut idx = 0usize;
    let end = text.len();

    while idx < end {
        let caps = match INSTANT_URL_SEARCH.captures_from_pos(text, idx) {
            Ok(Some(c)) => c,
            _ => break,
        };
        let whole = caps.get(0).expect("whole match always present");
        out.push_str(&text[idx..whole.start()]);
        idx = whole.end();

        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        if is_link(inner) {
            out.push_str(inner);
        } else {
            out.push_str(whole.as_str());
        }
    }

    if idx != end {
        out.push_str(&text[idx..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euphoria_link_is_wrapped_for_instant() {
        let out = translate(Platform::Euphoria, "see http://example.com now");
        assert_eq!(out, "see <http://example.com> now");
    }

    #[test]
    fn euphoria_image_link_uses_bang_sigil() {
        let out = translate(Platform::Euphoria, "look https://i.imgur.com/abc.png");
        assert_eq!(out, "look <!https://i.imgur.com/abc.png>");
    }

    #[test]
    fn euphoria_plain_text_passes_through() {
        let out = translate(Platform::Euphoria, "no links here at all");
        assert_eq!(out, "no links here at all");
    }

    #[test]
    fn instant_sigil_around_autolinkable_url_is_stripped() {
        let out = translate(Platform::Instant, "see <http://example.com> now");
        assert_eq!(out, "see http://example.com now");
    }

    #[test]
    fn instant_sigil_around_non_url_is_kept() {
        let out = translate(Platform::Instant, "weird <not a url> thing");
        assert_eq!(out, "weird <not a url> thing");
    }

    #[test]
    fn instant_bang_sigil_is_also_stripped() {
        let out = translate(Platform::Instant, "look <!https://i.imgur.com/abc.png> ok");
        assert_eq!(out, "look https://i.imgur.com/abc.png ok");
    }
}
