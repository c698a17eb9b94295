use std::collections::HashSet;

use dom_smoothie::{Config, Readability};
use globset::GlobSet;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::strategies::{StructuredExtractor, TableExtractor};
use crate::config::{ExtractionRule, SearchConfig, StrategyKind};
use crate::error::ConfigError;
use crate::filter::{host_of, host_pattern_set};

/// Shortest block the fallback extractor keeps, in characters.
const MIN_BLOCK_CHARS: usize = 20;

const SKIPPED_ANCESTORS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "header", "iframe", "aside", "form", "svg",
];

const CONTAINER_SELECTORS: &[&str] = &[
    "main",
    "article",
    r#"div[class*="product-detail"], div[class*="pdp-content"], div[class*="item-detail"]"#,
    r#"[role="main"]"#,
    r#"div[class*="content"], div[class*="main"], div[class*="article"]"#,
    "body",
];

const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, li";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub title: Option<String>,
    pub text: String,
}

/// Turns a decoded HTML page into plain text.
pub trait ContentExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, html: &str, url: &str) -> Extracted;
}

/// Readability when the page looks like an article, prose blocks otherwise.
pub struct GenericExtractor;

impl ContentExtractor for GenericExtractor {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn extract(&self, html: &str, url: &str) -> Extracted {
        if let Some(article) = readable_article(html, url) {
            return article;
        }
        let document = Html::parse_document(html);
        Extracted {
            title: page_title(&document),
            text: prose_blocks(&document),
        }
    }
}

fn readable_article(html: &str, url: &str) -> Option<Extracted> {
    let mut readability = match Readability::new(html, Some(url), Some(Config::default())) {
        Ok(r) => r,
        Err(e) => {
            warn!(%e, "readability init failed, using block extraction");
            return None;
        }
    };
    if !readability.is_probably_readable() {
        return None;
    }
    let article = match readability.parse() {
        Ok(article) => article,
        Err(e) => {
            debug!(%e, "readability parse failed, using block extraction");
            return None;
        }
    };
    let text = tidy_lines(&article.text_content.to_string());
    if text.is_empty() {
        return None;
    }
    let title = article.title.to_string();
    Some(Extracted {
        title: (!title.trim().is_empty()).then(|| collapse_whitespace(&title)),
        text,
    })
}

pub(super) fn page_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let title = collapse_whitespace(&element_text(&document.select(&selector).next()?));
    (!title.is_empty()).then_some(title)
}

/// Text blocks from the most specific content container, skipping page chrome
/// and consent notices. Repeated blocks are kept once.
pub(super) fn prose_blocks(document: &Html) -> String {
    let Ok(blocks) = Selector::parse(BLOCK_SELECTOR) else {
        return String::new();
    };
    let container = CONTAINER_SELECTORS.iter().find_map(|s| {
        let selector = Selector::parse(s).ok()?;
        document.select(&selector).next()
    });
    let Some(container) = container else {
        return String::new();
    };

    let mut seen = HashSet::new();
    container
        .select(&blocks)
        .filter(|el| !inside_chrome(el))
        // a paragraph nested in a list item is emitted by the item
        .filter(|el| el.value().name() == "li" || !has_ancestor(el, &["li"]))
        .map(|el| collapse_whitespace(&element_text(&el)))
        .filter(|text| text.chars().count() > MIN_BLOCK_CHARS && !is_notice(text))
        .filter(|text| seen.insert(text.clone()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(super) fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

pub(super) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tidy_lines(text: &str) -> String {
    text.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty() && !is_notice(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn inside_chrome(el: &ElementRef<'_>) -> bool {
    has_ancestor(el, SKIPPED_ANCESTORS)
}

fn has_ancestor(el: &ElementRef<'_>, names: &[&str]) -> bool {
    el.ancestors()
        .filter_map(|node| node.value().as_element())
        .any(|parent| names.contains(&parent.name()))
}

fn is_notice(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["cookie", "privacy policy", "terms of use"]
        .iter()
        .any(|marker| lower.contains(marker))
}

struct Route {
    pattern: String,
    hosts: GlobSet,
    specificity: usize,
    extractor: Box<dyn ContentExtractor>,
}

/// Domain pattern → extractor table, most specific pattern first, with the
/// generic extractor as fallback.
pub struct ExtractorRegistry {
    routes: Vec<Route>,
    fallback: GenericExtractor,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: GenericExtractor,
        }
    }

    pub fn from_rules(rules: &[ExtractionRule]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for rule in rules {
            let extractor: Box<dyn ContentExtractor> = match rule.strategy {
                StrategyKind::Generic => Box::new(GenericExtractor),
                StrategyKind::Structured => Box::new(StructuredExtractor),
                StrategyKind::Tables => Box::new(TableExtractor),
            };
            registry.register(&rule.pattern, extractor)?;
        }
        Ok(registry)
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self, ConfigError> {
        Self::from_rules(&config.extraction_rules)
    }

    pub fn register(
        &mut self,
        pattern: &str,
        extractor: Box<dyn ContentExtractor>,
    ) -> Result<(), ConfigError> {
        let hosts = host_pattern_set(&[pattern])?;
        let specificity = pattern
            .chars()
            .filter(|c| !matches!(c, '*' | '?' | '[' | ']' | '{' | '}'))
            .count();
        self.routes.push(Route {
            pattern: pattern.to_string(),
            hosts,
            specificity,
            extractor,
        });
        // stable: equal specificity keeps registration order
        self.routes.sort_by(|a, b| b.specificity.cmp(&a.specificity));
        Ok(())
    }

    pub fn resolve(&self, url: &str) -> &dyn ContentExtractor {
        let Some(host) = host_of(url) else {
            return &self.fallback;
        };
        self.routes
            .iter()
            .find(|route| route.hosts.is_match(&host))
            .map(|route| {
                debug!(pattern = %route.pattern, extractor = route.extractor.name(), "extraction rule matched");
                route.extractor.as_ref()
            })
            .unwrap_or(&self.fallback)
    }

    pub fn extract(&self, html: &str, url: &str) -> Extracted {
        self.resolve(url).extract(html, url)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOG_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head><title>EV Buyers Guide</title></head>
<body>
<nav>Home | News | Reviews | Contact</nav>
<article>
    <h1>The Best Electric Cars of 2024</h1>
    <p>Electric cars have improved quickly. Range, charging speed and price have all
    moved in the buyer's favour, and this year the choice is wider than ever.</p>
    <p>The Hyundai Ioniq 6 pairs a streamlined body with a range above five hundred
    kilometres and some of the fastest charging available at its price.</p>
    <p>The Tesla Model 3 remains a benchmark thanks to its efficiency, software and
    the reach of the Supercharger network across most markets.</p>
    <p>The Kia EV6 offers practical space, a comfortable ride and strong charging
    performance, making it an easy recommendation for families.</p>
    <p>Budget buyers should look at the BYD Dolphin, which brings a long warranty and
    a generous equipment list at a price well below most rivals.</p>
</article>
<footer>Copyright EV Guide. Read our privacy policy.</footer>
</body>
</html>"#;

    const NON_ARTICLE_HTML: &str = r#"
<html><head><title>Rates</title></head>
<body>
<script>var tracking = "this script text should never be extracted";</script>
<nav><p>Navigation paragraph that is long enough to count</p></nav>
<div class="content">
  <h2>Short</h2>
  <p>Today's market summary shows steady prices across the valley.</p>
  <p>Today's market summary shows steady prices across the valley.</p>
  <p>We use cookies to improve your experience on this website.</p>
  <ul><li><p>Vegetable prices were unchanged in the morning session.</p></li></ul>
</div>
<footer><p>Footer paragraph that is long enough to count as prose</p></footer>
</body></html>"#;

    struct Named(&'static str);

    impl ContentExtractor for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn extract(&self, _html: &str, _url: &str) -> Extracted {
            Extracted {
                title: None,
                text: self.0.to_string(),
            }
        }
    }

    #[test]
    fn generic_extracts_article_prose_without_chrome() {
        let extracted = GenericExtractor.extract(BLOG_HTML, "https://ev.example.com/guide");
        assert!(extracted.text.contains("Ioniq 6"));
        assert!(!extracted.text.contains("Home | News"));
        assert!(!extracted.text.contains("privacy policy"));
        assert!(extracted.title.is_some());
    }

    #[test]
    fn block_fallback_skips_chrome_notices_and_repeats() {
        let document = Html::parse_document(NON_ARTICLE_HTML);
        let text = prose_blocks(&document);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Today's market summary shows steady prices across the valley.",
                "Vegetable prices were unchanged in the morning session.",
            ]
        );
        assert_eq!(page_title(&document).as_deref(), Some("Rates"));
    }

    #[test]
    fn empty_page_extracts_nothing() {
        let extracted = GenericExtractor.extract("<html><body></body></html>", "https://a.com/");
        assert!(extracted.text.is_empty());
        assert!(extracted.title.is_none());
    }

    #[test]
    fn most_specific_pattern_wins() {
        let mut registry = ExtractorRegistry::new();
        registry.register("*.com", Box::new(Named("broad"))).unwrap();
        registry.register("shop.example.com", Box::new(Named("exact"))).unwrap();

        assert_eq!(registry.resolve("https://shop.example.com/item").name(), "exact");
        assert_eq!(registry.resolve("https://other.com/").name(), "broad");
        assert_eq!(registry.resolve("https://site.org/").name(), "generic");
        assert_eq!(registry.resolve("not a url").name(), "generic");
    }

    #[test]
    fn default_rules_route_known_domains() {
        let registry = ExtractorRegistry::from_config(&SearchConfig::default()).unwrap();
        assert_eq!(registry.resolve("https://www.daraz.com.np/products/x").name(), "structured");
        assert_eq!(registry.resolve("https://www.hamropatro.com/gold").name(), "tables");
        assert_eq!(registry.resolve("https://news.example.com/").name(), "generic");
    }

    #[test]
    fn invalid_rule_pattern_is_config_error() {
        let rules = [ExtractionRule::new("[oops", StrategyKind::Tables)];
        assert!(matches!(
            ExtractorRegistry::from_rules(&rules),
            Err(ConfigError::DomainPattern { .. })
        ));
    }
}
