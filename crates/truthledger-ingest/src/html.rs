//! HTML cleanup: title, published date, readable text.
//!
//! Regex-driven on purpose — the ledger only needs the visible prose, not a
//! DOM. The protocol:
//! 1. extract `<title>` (fallback: last URL path segment, hyphens → spaces),
//! 2. strip `<script>/<style>/<nav>/<header>/<footer>/<aside>` blocks,
//! 3. prefer `<main>`, then `<article>`, then a `class~=content` `<div>`,
//! 4. strip remaining tags, decode a fixed entity set, collapse whitespace,
//! 5. pull `published_at` from the usual meta/time tags.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use url::Url;

/// Output of [`clean_html`].
#[derive(Debug, Clone)]
pub struct CleanedPage {
    pub title: String,
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Clean an HTML page down to title + text + publish date.
pub fn clean_html(html: &str, url: &str) -> CleanedPage {
    let title = extract_title(html).unwrap_or_else(|| title_from_url(url));
    let published_at = extract_published_at(html);

    let stripped = strip_block_elements(html);
    let content = select_content_region(&stripped);
    let text = collapse_whitespace(&decode_entities(&strip_tags(&content)));

    CleanedPage {
        title,
        text,
        published_at,
    }
}

fn extract_title(html: &str) -> Option<String> {
    let title_re = Regex::new(r"(?is)<title[^>]*>([^<]+)</title>").unwrap();
    title_re
        .captures(html)
        .map(|c| collapse_whitespace(&decode_entities(&c[1])))
        .filter(|t| !t.is_empty())
}

/// Fallback title: last URL path segment, hyphens replaced with spaces.
pub fn title_from_url(url: &str) -> String {
    let segment = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|s| s.filter(|p| !p.is_empty()).last().map(|p| p.to_string()))
        })
        .unwrap_or_else(|| url.to_string());
    segment.replace('-', " ")
}

fn strip_block_elements(html: &str) -> String {
    let block_re = Regex::new(
        r"(?is)<(script|style|nav|header|footer|aside)\b[^>]*>.*?</(script|style|nav|header|footer|aside)>",
    )
    .unwrap();
    block_re.replace_all(html, " ").to_string()
}

/// Prefer the page's main content region when one is marked up.
fn select_content_region(html: &str) -> String {
    let main_re = Regex::new(r"(?is)<main\b[^>]*>(.*?)</main>").unwrap();
    if let Some(c) = main_re.captures(html) {
        return c[1].to_string();
    }
    let article_re = Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").unwrap();
    if let Some(c) = article_re.captures(html) {
        return c[1].to_string();
    }
    let content_div_re =
        Regex::new(r#"(?is)<div\b[^>]*class="[^"]*\bcontent\b[^"]*"[^>]*>(.*?)</div>"#).unwrap();
    if let Some(c) = content_div_re.captures(html) {
        return c[1].to_string();
    }
    html.to_string()
}

fn strip_tags(html: &str) -> String {
    // Closing block tags become paragraph breaks so the snippetizer sees the
    // document's structure; everything else becomes a space.
    let break_re = Regex::new(r"(?i)</(?:p|div|h[1-6]|li|tr|table|ul|ol)>|<br\s*/?>").unwrap();
    let broken = break_re.replace_all(html, "\n\n");
    let tag_re = Regex::new(r"<[^>]+>").unwrap();
    tag_re.replace_all(&broken, " ").to_string()
}

/// Decode the fixed entity set plus numeric `&#n;` references.
pub fn decode_entities(text: &str) -> String {
    let mut out = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");
    let numeric_re = Regex::new(r"&#(\d+);").unwrap();
    out = numeric_re
        .replace_all(&out, |caps: &regex::Captures<'_>| {
            caps[1]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_default()
        })
        .to_string();
    // &amp; last, so "&amp;lt;" decodes to the literal "&lt;".
    out.replace("&amp;", "&")
}

/// Collapse runs of whitespace to single spaces, preserving blank-line
/// paragraph breaks as `\n\n`.
pub fn collapse_whitespace(text: &str) -> String {
    let para_re = Regex::new(r"\n\s*\n").unwrap();
    let marked = para_re.replace_all(text, "\u{1}");
    let ws_re = Regex::new(r"\s+").unwrap();
    let collapsed = ws_re.replace_all(&marked, " ");
    collapsed
        .split('\u{1}')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn extract_published_at(html: &str) -> Option<DateTime<Utc>> {
    let candidates = [
        r#"(?is)<meta[^>]+property="article:published_time"[^>]+content="([^"]+)""#,
        r#"(?is)<meta[^>]+content="([^"]+)"[^>]+property="article:published_time""#,
        r#"(?is)<meta[^>]+name="(?:date|DC\.date)"[^>]+content="([^"]+)""#,
        r#"(?is)<meta[^>]+content="([^"]+)"[^>]+name="(?:date|DC\.date)""#,
        r#"(?is)<time[^>]+datetime="([^"]+)""#,
    ];
    for pattern in candidates {
        let re = Regex::new(pattern).unwrap();
        if let Some(caps) = re.captures(html) {
            if let Some(instant) = parse_instant(&caps[1]) {
                return Some(instant);
            }
        }
    }
    None
}

/// Parse a timestamp in the formats documents and feeds actually use:
/// RFC 3339, RFC 2822, or a bare `YYYY-MM-DD`.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_html_prefers_main_region() {
        let html = r#"
            <html><head><title>Raptor &amp; Friends</title></head>
            <body>
              <nav>Home | About</nav>
              <main><p>The Raptor engine produces 2,300 kN of thrust.</p></main>
              <footer>contact us</footer>
            </body></html>
        "#;
        let page = clean_html(html, "https://example.com/raptor-engine");
        assert_eq!(page.title, "Raptor & Friends");
        assert!(page.text.contains("2,300 kN of thrust"));
        assert!(!page.text.contains("Home | About"));
        assert!(!page.text.contains("contact us"));
    }

    #[test]
    fn title_falls_back_to_url_path() {
        let page = clean_html("<p>hi</p>", "https://example.com/engines/raptor-vacuum-specs");
        assert_eq!(page.title, "raptor vacuum specs");
    }

    #[test]
    fn script_and_style_blocks_are_removed() {
        let html = "<article>real text here, quite long enough</article>\
                    <script>var x = 'SECRET';</script><style>.a{color:red}</style>";
        let page = clean_html(html, "https://example.com/x");
        assert!(page.text.contains("real text"));
        assert!(!page.text.contains("SECRET"));
        assert!(!page.text.contains("color:red"));
    }

    #[test]
    fn entities_decode_including_numeric() {
        assert_eq!(decode_entities("a&nbsp;b &lt;c&gt; &quot;d&quot; &#65;"), "a b <c> \"d\" A");
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn published_at_prefers_article_meta() {
        let html = r#"
            <meta property="article:published_time" content="2023-04-05T10:00:00Z">
            <time datetime="2010-01-01T00:00:00Z">old</time>
        "#;
        let page = clean_html(html, "https://example.com/x");
        assert_eq!(
            page.published_at.unwrap().to_rfc3339(),
            "2023-04-05T10:00:00+00:00"
        );
    }

    #[test]
    fn published_at_falls_back_to_time_tag() {
        let html = r#"<time datetime="2019-07-20">landing</time>"#;
        let page = clean_html(html, "https://example.com/x");
        assert_eq!(
            page.published_at.unwrap().date_naive().to_string(),
            "2019-07-20"
        );
    }

    #[test]
    fn parse_instant_accepts_common_formats() {
        assert!(parse_instant("2023-04-05T10:00:00Z").is_some());
        assert!(parse_instant("Wed, 05 Apr 2023 10:00:00 GMT").is_some());
        assert!(parse_instant("2023-04-05").is_some());
        assert!(parse_instant("soon").is_none());
    }

    #[test]
    fn whitespace_collapses_but_paragraph_breaks_survive() {
        let text = "a   b\n\n\n  c\td";
        assert_eq!(collapse_whitespace(text), "a b\n\nc d");
    }
}
