//! Ordered fallback extraction rules for the rendered profile page.
//!
//! Each profile field has a short list of rules tried in priority order; the
//! first one yielding a non-empty value wins. The markup of the target drifts
//! often, so new selectors go at the front of a list and old ones are kept as
//! fallbacks.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use super::traits::{PostRecord, ProfileInfo};

/// A single way of pulling a string out of the document.
#[derive(Debug, Clone, Copy)]
pub enum Rule {
    /// Trimmed text content of the first element matching the selector.
    Text(&'static str),
    /// Attribute value of the first element matching the selector.
    Attr {
        selector: &'static str,
        attr: &'static str,
    },
    /// First capture group of `pattern` applied to an attribute value.
    Capture {
        selector: &'static str,
        attr: &'static str,
        pattern: &'static LazyLock<Regex>,
    },
}

impl Rule {
    /// Apply the rule, returning `None` when it yields nothing usable.
    #[must_use]
    pub fn apply(&self, document: &Html) -> Option<String> {
        let value = match *self {
            Self::Text(selector) => first_element(document, selector).map(|el| element_text(&el)),
            Self::Attr { selector, attr } => {
                first_element(document, selector).and_then(|el| el.value().attr(attr).map(str::to_string))
            }
            Self::Capture {
                selector,
                attr,
                pattern,
            } => {
                let raw = first_element(document, selector)?.value().attr(attr)?;
                pattern
                    .captures(raw)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            }
        };

        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Try `rules` in order and return the first non-empty match.
#[must_use]
pub fn first_match(document: &Html, rules: &[Rule]) -> Option<String> {
    rules.iter().find_map(|rule| rule.apply(document))
}

static OG_TITLE_HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(@([A-Za-z0-9._]+)\)").unwrap());
static DESCRIPTION_FOLLOWERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9.,]+[KkMm]?) Followers").unwrap());
static OG_DESCRIPTION_BIO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"on Instagram: "(.+)"$"#).unwrap());
static OG_TITLE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+?) \(@").unwrap());

pub static USERNAME_RULES: &[Rule] = &[
    Rule::Text("header h2"),
    Rule::Text("header h1"),
    Rule::Capture {
        selector: r#"meta[property="og:title"]"#,
        attr: "content",
        pattern: &OG_TITLE_HANDLE,
    },
];

pub static FOLLOWERS_RULES: &[Rule] = &[
    Rule::Attr {
        selector: r#"a[href$="/followers/"] span[title]"#,
        attr: "title",
    },
    Rule::Text(r#"a[href$="/followers/"] span"#),
    Rule::Text("header section ul li:nth-child(2) span"),
    Rule::Capture {
        selector: r#"meta[name="description"]"#,
        attr: "content",
        pattern: &DESCRIPTION_FOLLOWERS,
    },
];

pub static BIO_RULES: &[Rule] = &[
    Rule::Text("header section > div:last-child > span"),
    Rule::Text("header section h1 + span"),
    Rule::Text(r#"div[data-testid="user-bio"]"#),
    Rule::Capture {
        selector: r#"meta[property="og:description"]"#,
        attr: "content",
        pattern: &OG_DESCRIPTION_BIO,
    },
];

pub static FULL_NAME_RULES: &[Rule] = &[
    Rule::Text("header section h1"),
    Rule::Text(r#"header section span[dir="auto"]"#),
    Rule::Capture {
        selector: r#"meta[property="og:title"]"#,
        attr: "content",
        pattern: &OG_TITLE_NAME,
    },
];

/// Headings probed for the "profile not found" page.
const NOT_FOUND_RULES: &[Rule] = &[Rule::Text("h2"), Rule::Text("h1"), Rule::Text("main span")];

const NOT_FOUND_TEXT: &str = "Sorry, this page isn't available";

/// Extract the profile header. `requested` fills in the username when the page hides it.
#[must_use]
pub fn extract_profile(document: &Html, requested: &str) -> ProfileInfo {
    ProfileInfo {
        username: first_match(document, USERNAME_RULES).unwrap_or_else(|| requested.to_string()),
        followers: first_match(document, FOLLOWERS_RULES).unwrap_or_default(),
        bio: first_match(document, BIO_RULES).unwrap_or_default(),
        full_name: first_match(document, FULL_NAME_RULES).unwrap_or_default(),
    }
}

/// Whether the rendered page is the site's "this page isn't available" screen.
#[must_use]
pub fn is_not_found_page(document: &Html) -> bool {
    NOT_FOUND_RULES.iter().any(|rule| {
        rule.apply(document)
            .is_some_and(|text| text.contains(NOT_FOUND_TEXT))
    })
}

/// Extract every post link currently in the document, in document order.
///
/// Relative permalinks are resolved against `base` with query and fragment
/// dropped. Duplicates are left in
/// place; the collector decides what to keep.
#[must_use]
pub fn extract_post_links(document: &Html, base: &Url, timestamp: &str) -> Vec<PostRecord> {
    let Ok(link_selector) = Selector::parse(r#"a[href*="/p/"], a[href*="/reel/"]"#) else {
        return Vec::new();
    };
    let Ok(img_selector) = Selector::parse("img") else {
        return Vec::new();
    };

    document
        .select(&link_selector)
        .filter_map(|link| {
            let href = link.value().attr("href")?;
            let mut url = base.join(href).ok()?;
            // Carousel and share links differ only in query or fragment
            url.set_query(None);
            url.set_fragment(None);
            let img = link.select(&img_selector).next();
            Some(PostRecord {
                url: url.to_string(),
                image_url: img
                    .and_then(|i| i.value().attr("src"))
                    .unwrap_or_default()
                    .to_string(),
                caption: img
                    .and_then(|i| i.value().attr("alt"))
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                timestamp: timestamp.to_string(),
                likes: None,
                comments: None,
                is_video: Some(href.contains("/reel/")),
            })
        })
        .collect()
}

fn first_element<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(sel) => document.select(&sel).next(),
        Err(e) => {
            warn!(selector, "Invalid extraction selector: {e:?}");
            None
        }
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_HTML: &str = r#"
<html>
  <head>
    <meta property="og:title" content="NASA (@nasa) &bull; Instagram photos and videos">
    <meta name="description" content="97M Followers, 80 Following, 4,321 Posts - See Instagram photos and videos from NASA (@nasa)">
  </head>
  <body>
    <header>
      <section>
        <h2>nasa</h2>
        <ul>
          <li><span>4,321 posts</span></li>
          <li><a href="/nasa/followers/"><span title="97,123,456">97.1M</span></a></li>
        </ul>
        <h1>NASA</h1>
        <div><span>Exploring the universe and our home planet.</span></div>
      </section>
    </header>
    <main>
      <a href="/p/AAA/"><img src="https://cdn.example.com/a.jpg" alt="Photo of a rocket"></a>
      <a href="/reel/BBB/"><img src="https://cdn.example.com/b.jpg" alt=" Launch video "></a>
      <a href="https://www.instagram.com/p/AAA/"><img src="https://cdn.example.com/a.jpg"></a>
      <a href="/explore/">Explore</a>
    </main>
  </body>
</html>"#;

    fn base() -> Url {
        Url::parse("https://www.instagram.com").unwrap()
    }

    #[test]
    fn test_extract_profile_primary_rules() {
        let doc = Html::parse_document(PROFILE_HTML);
        let profile = extract_profile(&doc, "nasa");

        assert_eq!(profile.username, "nasa");
        assert_eq!(profile.followers, "97,123,456");
        assert_eq!(profile.full_name, "NASA");
        assert_eq!(profile.bio, "Exploring the universe and our home planet.");
    }

    #[test]
    fn test_first_match_falls_through_in_order() {
        // No header at all: only meta tags remain
        let html = r#"<html><head>
            <meta property="og:title" content="Jane Doe (@jane.doe) &bull; Instagram">
            <meta name="description" content="1.5K Followers, 10 Following">
        </head><body></body></html>"#;
        let doc = Html::parse_document(html);

        assert_eq!(first_match(&doc, USERNAME_RULES).as_deref(), Some("jane.doe"));
        assert_eq!(first_match(&doc, FULL_NAME_RULES).as_deref(), Some("Jane Doe"));
        assert_eq!(first_match(&doc, FOLLOWERS_RULES).as_deref(), Some("1.5K"));
        assert_eq!(first_match(&doc, BIO_RULES), None);
    }

    #[test]
    fn test_empty_match_is_skipped() {
        let html = r#"<header><h2>   </h2><h1>fallback_user</h1></header>"#;
        let doc = Html::parse_document(html);
        assert_eq!(first_match(&doc, USERNAME_RULES).as_deref(), Some("fallback_user"));
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let doc = Html::parse_document("<html><body></body></html>");
        let profile = extract_profile(&doc, "someone");
        assert_eq!(profile.username, "someone");
        assert!(profile.followers.is_empty());
        assert!(profile.bio.is_empty());
        assert!(profile.full_name.is_empty());
    }

    #[test]
    fn test_not_found_detection() {
        let missing = Html::parse_document(
            "<main><h2>Sorry, this page isn't available.</h2><p>The link may be broken.</p></main>",
        );
        assert!(is_not_found_page(&missing));

        let present = Html::parse_document(PROFILE_HTML);
        assert!(!is_not_found_page(&present));
    }

    #[test]
    fn test_capture_patterns_compile() {
        for rules in [USERNAME_RULES, FOLLOWERS_RULES, BIO_RULES, FULL_NAME_RULES] {
            for rule in rules {
                if let Rule::Capture { pattern, .. } = rule {
                    LazyLock::force(*pattern);
                }
            }
        }
    }

    #[test]
    fn test_post_links_drop_query_and_fragment() {
        let html = r#"<main>
            <a href="/p/AAA/?img_index=1"><img src="https://cdn.example.com/a1.jpg"></a>
            <a href="/p/AAA/"><img src="https://cdn.example.com/a.jpg"></a>
            <a href="https://www.instagram.com/reel/BBB/?utm_source=ig_web#comments"></a>
        </main>"#;
        let doc = Html::parse_document(html);
        let posts = extract_post_links(&doc, &base(), "2024-01-01T00:00:00.000Z");

        assert_eq!(posts[0].url, "https://www.instagram.com/p/AAA/");
        assert_eq!(posts[1].url, posts[0].url);
        assert_eq!(posts[2].url, "https://www.instagram.com/reel/BBB/");
    }

    #[test]
    fn test_extract_post_links() {
        let doc = Html::parse_document(PROFILE_HTML);
        let posts = extract_post_links(&doc, &base(), "2024-01-01T00:00:00.000Z");

        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].url, "https://www.instagram.com/p/AAA/");
        assert_eq!(posts[0].image_url, "https://cdn.example.com/a.jpg");
        assert_eq!(posts[0].caption, "Photo of a rocket");
        assert_eq!(posts[0].is_video, Some(false));
        assert_eq!(posts[1].url, "https://www.instagram.com/reel/BBB/");
        assert_eq!(posts[1].caption, "Launch video");
        assert_eq!(posts[1].is_video, Some(true));
        // Absolute duplicate resolves to the same permalink
        assert_eq!(posts[2].url, posts[0].url);
        assert!(posts[2].caption.is_empty());
    }
}
