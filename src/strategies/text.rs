//! HTML scraping and text normalisation helpers shared by strategies.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;

use super::PreparedText;

/// Upper bound for one segment handed to a model
pub const SEGMENT_CHARS: usize = 4_000;

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex is valid"))
}

fn noise_tags() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(
        &CELL,
        r"(?is)<(script|style|noscript|svg|nav|header|footer|aside|form)\b[^>]*>.*?</(script|style|noscript|svg|nav|header|footer|aside|form)>",
    )
}

fn comments() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"(?s)<!--.*?-->")
}

fn block_breaks() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(
        &CELL,
        r"(?i)<\s*(br|/p|/div|/li|/h[1-6]|/section|/article|/blockquote|/tr)\s*/?>",
    )
}

fn tags() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"(?s)<[^>]*>")
}

fn article_body() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"(?is)<article\b[^>]*>(.*?)</article>")
}

fn title_tag() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"(?is)<title[^>]*>(.*?)</title>")
}

fn meta_tag() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"(?is)<meta\s[^>]*>")
}

fn link_tag() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"(?is)<link\s[^>]*>")
}

fn attribute() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(
        &CELL,
        r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
    )
}

fn numeric_entity() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"&#(x[0-9a-fA-F]+|[0-9]+);")
}

fn inline_space() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"[ \t\u{a0}]+")
}

fn blank_lines() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"\n\s*\n+")
}

/// Decode the handful of entities that matter for titles and text
pub fn decode_entities(text: &str) -> String {
    let decoded = numeric_entity().replace_all(text, |caps: &regex::Captures<'_>| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    decoded
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Collapse runs of spaces and blank lines
pub fn normalize_whitespace(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| inline_space().replace_all(line.trim(), " ").into_owned())
        .collect();
    blank_lines()
        .replace_all(lines.join("\n").trim(), "\n\n")
        .into_owned()
}

/// Strip markup to readable text, keeping paragraph breaks
pub fn strip_html(html: &str) -> String {
    let text = comments().replace_all(html, "");
    let text = noise_tags().replace_all(&text, "");
    let text = block_breaks().replace_all(&text, "\n\n");
    let text = tags().replace_all(&text, "");
    normalize_whitespace(&decode_entities(&text))
}

/// Readable text of a page, preferring the `<article>` element
pub fn readable_text(html: &str) -> String {
    let body = article_body()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(html);
    strip_html(body)
}

fn attributes(tag: &str) -> Vec<(String, String)> {
    attribute()
        .captures_iter(tag)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            (caps[1].to_ascii_lowercase(), value.to_string())
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// `<title>` text
pub fn title(html: &str) -> Option<String> {
    title_tag()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| normalize_whitespace(&decode_entities(m.as_str())))
        .filter(|t| !t.is_empty())
}

/// Content of the first `<meta>` whose `property` or `name` is one of `keys`
pub fn meta_content(html: &str, keys: &[&str]) -> Option<String> {
    let metas: Vec<Vec<(String, String)>> = meta_tag()
        .find_iter(html)
        .map(|m| attributes(m.as_str()))
        .collect();

    keys.iter().find_map(|key| {
        metas.iter().find_map(|attrs| {
            let name = attr(attrs, "property").or_else(|| attr(attrs, "name"))?;
            if !name.eq_ignore_ascii_case(key) {
                return None;
            }
            attr(attrs, "content")
                .map(|content| normalize_whitespace(&decode_entities(content)))
                .filter(|content| !content.is_empty())
        })
    })
}

/// RSS/Atom feeds advertised with `<link rel="alternate">`, resolved against `base`
pub fn discover_feed_links(html: &str, base: &Url) -> Vec<String> {
    let mut feeds = Vec::new();
    for tag in link_tag().find_iter(html) {
        let attrs = attributes(tag.as_str());
        let is_alternate = attr(&attrs, "rel")
            .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("alternate")))
            .unwrap_or(false);
        let is_feed = attr(&attrs, "type")
            .map(|t| {
                let t = t.to_ascii_lowercase();
                t.contains("rss+xml") || t.contains("atom+xml") || t.contains("feed+json")
            })
            .unwrap_or(false);
        if !(is_alternate && is_feed) {
            continue;
        }
        if let Some(href) = attr(&attrs, "href") {
            if let Ok(resolved) = base.join(&decode_entities(href)) {
                let resolved = resolved.to_string();
                if !feeds.contains(&resolved) {
                    feeds.push(resolved);
                }
            }
        }
    }
    feeds
}

/// Truncate to `budget` characters and split into paragraph-bounded segments
pub fn prepare(text: &str, budget: usize) -> PreparedText {
    let text = normalize_whitespace(text);
    let total = text.chars().count();
    let truncated = total > budget;
    let text: String = if truncated {
        text.chars().take(budget).collect()
    } else {
        text
    };

    let mut segments = Vec::new();
    let mut current = String::new();
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if !current.is_empty()
            && current.chars().count() + paragraph.chars().count() + 2 > SEGMENT_CHARS
        {
            segments.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);

        // A single oversized paragraph is hard-split
        while current.chars().count() > SEGMENT_CHARS {
            let head: String = current.chars().take(SEGMENT_CHARS).collect();
            let tail: String = current.chars().skip(SEGMENT_CHARS).collect();
            segments.push(head);
            current = tail;
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }

    PreparedText {
        text,
        segments,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <title>Fallback &amp; Title</title>
        <meta property="og:title" content="The Real Title">
        <meta name="description" content='A short description'>
        <link rel="alternate" type="application/rss+xml" href="/feed.xml">
        <link rel="stylesheet" href="/style.css">
        </head><body>
        <nav>Home | About</nav>
        <script>var x = 1;</script>
        <article><h1>Heading</h1><p>First paragraph.</p><p>Second&nbsp;paragraph.</p></article>
        </body></html>"#;

    #[test]
    fn test_title_and_meta() {
        assert_eq!(title(PAGE).as_deref(), Some("Fallback & Title"));
        assert_eq!(
            meta_content(PAGE, &["og:title", "twitter:title"]).as_deref(),
            Some("The Real Title")
        );
        assert_eq!(
            meta_content(PAGE, &["og:description", "description"]).as_deref(),
            Some("A short description")
        );
        assert!(meta_content(PAGE, &["author"]).is_none());
    }

    #[test]
    fn test_readable_text_prefers_article() {
        let text = readable_text(PAGE);
        assert_eq!(text, "Heading\n\nFirst paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn test_strip_html_drops_scripts_and_nav() {
        let text = strip_html(PAGE);
        assert!(!text.contains("var x"));
        assert!(!text.contains("About"));
        assert!(text.contains("First paragraph."));
    }

    #[test]
    fn test_discover_feed_links() {
        let base = Url::parse("https://blog.example.com/posts/1").unwrap();
        assert_eq!(
            discover_feed_links(PAGE, &base),
            vec!["https://blog.example.com/feed.xml".to_string()]
        );
    }

    #[test]
    fn test_decode_numeric_entities() {
        assert_eq!(decode_entities("it&#8217;s &#x41;"), "it\u{2019}s A");
    }

    #[test]
    fn test_prepare_truncates_and_segments() {
        let paragraph = "word ".repeat(500);
        let text = vec![paragraph.trim(); 6].join("\n\n");

        let prepared = prepare(&text, 10_000);
        assert!(prepared.truncated);
        assert_eq!(prepared.text.chars().count(), 10_000);
        assert!(prepared.segments.len() >= 3);
        assert!(prepared
            .segments
            .iter()
            .all(|s| s.chars().count() <= SEGMENT_CHARS));

        let small = prepare("one\n\n\n\ntwo", 100);
        assert!(!small.truncated);
        assert_eq!(small.segments, vec!["one\n\ntwo".to_string()]);
    }
}
