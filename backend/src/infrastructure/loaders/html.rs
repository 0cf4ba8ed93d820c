/// HTML main-content extraction with scraper
use super::tables::TextTable;
use crate::domain::value_objects::collapse_whitespace;
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use std::borrow::Cow;
use std::sync::OnceLock;

/// Elements that never contribute text, nor do their descendants
const STRIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "nav", "header", "footer",
    "aside", "form",
];

/// Class or id fragments marking site chrome
const CHROME_MARKERS: &[&str] = &[
    "sidebar",
    "menu",
    "breadcrumb",
    "cookie",
    "social-share",
    "popup",
];

const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre", "table", "dt", "dd",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HtmlExtraction {
    pub title: Option<String>,
    pub published_at: Option<NaiveDate>,
    /// Blocks separated by blank lines
    pub text: String,
}

/// Stateless HTML extractor
pub struct HtmlExtractor {
    article: Selector,
    main: Selector,
    body: Selector,
    og_title: Selector,
    title: Selector,
    h1: Selector,
    published_meta: Selector,
    time: Selector,
    row: Selector,
    cell: Selector,
}

impl HtmlExtractor {
    pub fn new() -> Self {
        HtmlExtractor {
            article: Selector::parse("article").expect("article selector"),
            main: Selector::parse("main").expect("main selector"),
            body: Selector::parse("body").expect("body selector"),
            og_title: Selector::parse(r#"meta[property="og:title"]"#).expect("og:title selector"),
            title: Selector::parse("title").expect("title selector"),
            h1: Selector::parse("h1").expect("h1 selector"),
            published_meta: Selector::parse(
                r#"meta[property="article:published_time"], meta[itemprop="datePublished"], meta[name="date"], meta[name="publish-date"], meta[name="dcterms.date"]"#,
            )
            .expect("published meta selector"),
            time: Selector::parse("time[datetime]").expect("time selector"),
            row: Selector::parse("tr").expect("tr selector"),
            cell: Selector::parse("th, td").expect("cell selector"),
        }
    }

    /// Get a singleton instance (selectors are compiled once)
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<HtmlExtractor> = OnceLock::new();
        INSTANCE.get_or_init(HtmlExtractor::new)
    }

    pub fn extract(&self, bytes: &[u8]) -> HtmlExtraction {
        let decoded = decode_body(bytes);
        let document = Html::parse_document(&decoded);

        let root = document
            .select(&self.article)
            .next()
            .or_else(|| document.select(&self.main).next())
            .or_else(|| document.select(&self.body).next())
            .unwrap_or_else(|| document.root_element());

        let mut blocks: Vec<String> = Vec::new();
        for element in root.descendants().filter_map(ElementRef::wrap) {
            let tag = element.value().name();
            if !BLOCK_TAGS.contains(&tag) || is_excluded(element) || has_block_ancestor(element, root) {
                continue;
            }

            let text = if tag == "table" {
                self.render_table(element)
            } else if tag == "pre" {
                element.text().collect::<String>().trim().to_string()
            } else {
                collapse_whitespace(&element.text().collect::<String>())
            };

            if !text.is_empty() {
                blocks.push(text);
            }
        }

        // Pages built from bare divs: fall back to all visible text under the root
        if blocks.is_empty() && !is_excluded(root) {
            let text = visible_text(root);
            if !text.is_empty() {
                blocks.push(text);
            }
        }

        HtmlExtraction {
            title: self.title(&document),
            published_at: self.published_at(&document),
            text: blocks.join("\n\n"),
        }
    }

    fn title(&self, document: &Html) -> Option<String> {
        let og = document
            .select(&self.og_title)
            .next()
            .and_then(|m| m.value().attr("content"))
            .map(collapse_whitespace);
        let title = || {
            document
                .select(&self.title)
                .next()
                .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        };
        let heading = || {
            document
                .select(&self.h1)
                .next()
                .map(|h| collapse_whitespace(&h.text().collect::<String>()))
        };

        og.filter(|t| !t.is_empty())
            .or_else(|| title().filter(|t| !t.is_empty()))
            .or_else(|| heading().filter(|t| !t.is_empty()))
    }

    fn published_at(&self, document: &Html) -> Option<NaiveDate> {
        document
            .select(&self.published_meta)
            .filter_map(|m| m.value().attr("content"))
            .chain(
                document
                    .select(&self.time)
                    .filter_map(|t| t.value().attr("datetime")),
            )
            .find_map(parse_date_prefix)
    }

    fn render_table(&self, table: ElementRef<'_>) -> String {
        let rows: Vec<Vec<String>> = table
            .select(&self.row)
            .map(|row| {
                row.select(&self.cell)
                    .map(|cell| collapse_whitespace(&cell.text().collect::<String>()))
                    .collect::<Vec<_>>()
            })
            .filter(|cells| !cells.is_empty())
            .collect();

        TextTable::from_rows(rows)
            .map(|t| t.render())
            .unwrap_or_default()
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_body(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn is_chrome(element: ElementRef<'_>) -> bool {
    let value = element.value();
    if STRIPPED_TAGS.contains(&value.name()) {
        return true;
    }
    let marked = |attr: Option<&str>| {
        attr.map(|a| {
            let a = a.to_lowercase();
            CHROME_MARKERS.iter().any(|m| a.contains(m))
        })
        .unwrap_or(false)
    };
    marked(value.attr("class")) || marked(value.attr("id"))
}

/// The element or one of its ancestors is chrome
fn is_excluded(element: ElementRef<'_>) -> bool {
    is_chrome(element) || element.ancestors().filter_map(ElementRef::wrap).any(is_chrome)
}

/// A block ancestor below `root` already captures this element's text
fn has_block_ancestor(element: ElementRef<'_>, root: ElementRef<'_>) -> bool {
    for ancestor in element.ancestors().filter_map(ElementRef::wrap) {
        if ancestor == root {
            return false;
        }
        if BLOCK_TAGS.contains(&ancestor.value().name()) {
            return true;
        }
    }
    false
}

fn visible_text(root: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in root.descendants() {
        if let Some(text) = node.value().as_text() {
            let hidden = node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .take_while(|a| *a != root)
                .any(is_chrome);
            if !hidden {
                raw.push_str(text);
                raw.push(' ');
            }
        }
    }
    collapse_whitespace(&raw)
}

fn parse_date_prefix(raw: &str) -> Option<NaiveDate> {
    let date = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Fallback title</title>
  <meta property="og:title" content="  Money Market Funds   Explained ">
  <meta property="article:published_time" content="2025-11-04T09:00:00+03:00">
  <style>.x { color: red }</style>
</head>
<body>
  <header><p>Site header link</p></header>
  <nav><ul><li>Home</li><li>About</li></ul></nav>
  <article>
    <h1>Money Market Funds</h1>
    <p>A money market fund pools   deposits into
       short-term instruments.</p>
    <ul><li><p>Low risk</p></li><li>Daily liquidity</li></ul>
    <div class="social-share"><p>Share this</p></div>
    <table>
      <tr><th>Fund</th><th>Yield</th></tr>
      <tr><td>Alpha MMF</td><td>14.2%</td></tr>
      <tr><td>Beta MMF</td><td>13.8%</td></tr>
    </table>
    <script>track();</script>
  </article>
  <footer><p>Copyright</p></footer>
</body>
</html>"#;

    #[test]
    fn test_extracts_article_blocks_in_order() {
        let extraction = HtmlExtractor::new().extract(PAGE.as_bytes());

        assert_eq!(
            extraction.text,
            "Money Market Funds\n\n\
             A money market fund pools deposits into short-term instruments.\n\n\
             Low risk\n\n\
             Daily liquidity\n\n\
             Fund: Alpha MMF; Yield: 14.2%\n\
             Fund: Beta MMF; Yield: 13.8%"
        );
    }

    #[test]
    fn test_title_and_publish_date() {
        let extraction = HtmlExtractor::instance().extract(PAGE.as_bytes());
        assert_eq!(extraction.title.as_deref(), Some("Money Market Funds Explained"));
        assert_eq!(extraction.published_at, NaiveDate::from_ymd_opt(2025, 11, 4));
    }

    #[test]
    fn test_title_falls_back_to_title_then_h1() {
        let html = "<html><head><title> CBK Notice </title></head><body><h1>Other</h1></body></html>";
        let extraction = HtmlExtractor::new().extract(html.as_bytes());
        assert_eq!(extraction.title.as_deref(), Some("CBK Notice"));

        let html = "<html><body><h1>Rate Decision</h1><p>Held.</p></body></html>";
        let extraction = HtmlExtractor::new().extract(html.as_bytes());
        assert_eq!(extraction.title.as_deref(), Some("Rate Decision"));
        assert_eq!(extraction.published_at, None);
    }

    #[test]
    fn test_div_only_page_uses_visible_text() {
        let html = "<html><body><div>Loan rates  <span>rose</span></div><nav>Menu</nav></body></html>";
        let extraction = HtmlExtractor::new().extract(html.as_bytes());
        assert_eq!(extraction.text, "Loan rates rose");
    }

    #[test]
    fn test_time_element_date() {
        let html = r#"<html><body><main><time datetime="2026-01-20">20 Jan</time><p>Text</p></main></body></html>"#;
        let extraction = HtmlExtractor::new().extract(html.as_bytes());
        assert_eq!(extraction.published_at, NaiveDate::from_ymd_opt(2026, 1, 20));
    }
}
