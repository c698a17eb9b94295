//! Site-shaped extractors: product pages and rate tables. Both put their
//! structured facts ahead of whatever the generic extractor finds.

use std::collections::HashSet;

use scraper::{Html, Selector};
use serde_json::Value;

use super::extractor::{
    ContentExtractor, Extracted, GenericExtractor, collapse_whitespace, element_text,
};

const MAX_TABLE_ROWS: usize = 200;
/// Longer matches are page sections, not a price or a rating.
const MAX_FACT_CHARS: usize = 120;

const NAME_SELECTORS: &[&str] = &[r#"[class*="pdp-title"]"#, r#"[class*="product-title"]"#, "h1"];
const PRICE_SELECTORS: &[&str] = &[
    r#"[class*="pdp-price"]"#,
    r#"[class*="product-price"]"#,
    "[data-price]",
    r#"[class*="price"]"#,
];
const DISCOUNT_SELECTORS: &[&str] = &[r#"[class*="discount"]"#, r#"[class*="saving"]"#];
const STOCK_SELECTORS: &[&str] = &[
    r#"[class*="stock"]"#,
    r#"[class*="inventory"]"#,
    r#"[class*="quantity"]"#,
];
const RATING_SELECTORS: &[&str] = &[r#"[class*="rating"]"#, r#"[class*="stars"]"#];

#[derive(Debug, Default, PartialEq)]
struct ProductFacts {
    name: Option<String>,
    price: Option<String>,
    discount: Option<String>,
    availability: Option<String>,
    rating: Option<String>,
}

impl ProductFacts {
    fn or(self, other: ProductFacts) -> ProductFacts {
        ProductFacts {
            name: self.name.or(other.name),
            price: self.price.or(other.price),
            discount: self.discount.or(other.discount),
            availability: self.availability.or(other.availability),
            rating: self.rating.or(other.rating),
        }
    }

    fn lines(&self) -> Vec<String> {
        [
            ("Product", &self.name),
            ("Price", &self.price),
            ("Discount", &self.discount),
            ("Availability", &self.availability),
            ("Rating", &self.rating),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}: {v}")))
        .collect()
    }
}

/// E-commerce product pages: schema.org `Product` data, then price/stock/rating markup.
pub struct StructuredExtractor;

impl ContentExtractor for StructuredExtractor {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn extract(&self, html: &str, url: &str) -> Extracted {
        let facts = {
            let document = Html::parse_document(html);
            json_ld_product(&document)
                .unwrap_or_default()
                .or(markup_product(&document))
        };
        let generic = GenericExtractor.extract(html, url);
        let title = facts.name.clone().or(generic.title);
        Extracted {
            title,
            text: facts_first(facts.lines(), &generic.text),
        }
    }
}

/// Market-rate pages: each table row with two filled cells becomes `key: value`.
pub struct TableExtractor;

impl ContentExtractor for TableExtractor {
    fn name(&self) -> &'static str {
        "tables"
    }

    fn extract(&self, html: &str, url: &str) -> Extracted {
        let rows = {
            let document = Html::parse_document(html);
            table_rows(&document)
        };
        let generic = GenericExtractor.extract(html, url);
        Extracted {
            title: generic.title,
            text: facts_first(rows, &generic.text),
        }
    }
}

fn facts_first(facts: Vec<String>, body: &str) -> String {
    match (facts.is_empty(), body.is_empty()) {
        (true, _) => body.to_string(),
        (false, true) => facts.join("\n"),
        (false, false) => format!("{}\n\n{body}", facts.join("\n")),
    }
}

fn json_ld_product(document: &Html) -> Option<ProductFacts> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;
    document
        .select(&selector)
        .filter_map(|el| serde_json::from_str::<Value>(&el.text().collect::<String>()).ok())
        .find_map(|value| find_product(&value).map(product_from_json))
}

fn find_product(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(map) => {
            if has_type(map.get("@type"), "Product") {
                Some(value)
            } else {
                map.get("@graph").and_then(find_product)
            }
        }
        _ => None,
    }
}

fn has_type(value: Option<&Value>, wanted: &str) -> bool {
    match value {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

fn product_from_json(product: &Value) -> ProductFacts {
    let offer = match product.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        other => other,
    };

    let price = offer.and_then(|o| {
        let amount = scalar(o.get("price")).or_else(|| scalar(o.get("lowPrice")))?;
        Some(match scalar(o.get("priceCurrency")) {
            Some(currency) => format!("{currency} {amount}"),
            None => amount,
        })
    });

    // "https://schema.org/InStock" -> "InStock"
    let availability = offer
        .and_then(|o| scalar(o.get("availability")))
        .map(|a| a.rsplit('/').next().unwrap_or_default().to_string())
        .filter(|a| !a.is_empty());

    let rating = product.get("aggregateRating").and_then(|r| {
        let value = scalar(r.get("ratingValue"))?;
        Some(match scalar(r.get("reviewCount")).or_else(|| scalar(r.get("ratingCount"))) {
            Some(count) => format!("{value} ({count} reviews)"),
            None => value,
        })
    });

    ProductFacts {
        name: scalar(product.get("name")),
        price,
        discount: None,
        availability,
        rating,
    }
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let s = collapse_whitespace(s);
            (!s.is_empty()).then_some(s)
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn markup_product(document: &Html) -> ProductFacts {
    ProductFacts {
        name: first_text(document, NAME_SELECTORS),
        price: first_text(document, PRICE_SELECTORS)
            .or_else(|| first_attr(document, "[data-price]", "data-price")),
        discount: first_text(document, DISCOUNT_SELECTORS),
        availability: first_text(document, STOCK_SELECTORS),
        rating: first_text(document, RATING_SELECTORS),
    }
}

/// First short, non-empty text matched, trying selectors in priority order.
fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|s| {
        let selector = Selector::parse(s).ok()?;
        document
            .select(&selector)
            .map(|el| collapse_whitespace(&element_text(&el)))
            .find(|text| !text.is_empty() && text.chars().count() <= MAX_FACT_CHARS)
    })
}

fn first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(collapse_whitespace)
        .find(|v| !v.is_empty())
}

fn table_rows(document: &Html) -> Vec<String> {
    let (Ok(rows), Ok(cells)) = (Selector::parse("tr"), Selector::parse("th, td")) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    document
        .select(&rows)
        .filter_map(|row| {
            let mut texts = row
                .select(&cells)
                .map(|cell| collapse_whitespace(&element_text(&cell)));
            let key = texts.next()?;
            let value = texts.next()?;
            (!key.is_empty() && !value.is_empty()).then(|| format!("{key}: {value}"))
        })
        .filter(|line| seen.insert(line.clone()))
        .take(MAX_TABLE_ROWS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_JSON_LD: &str = r#"
<html><head><title>Phone | Shop</title>
<script type="application/ld+json">
{"@context": "https://schema.org", "@graph": [
  {"@type": "BreadcrumbList"},
  {"@type": ["Product"], "name": "Redmi Note 13",
   "offers": [{"@type": "Offer", "price": 27999, "priceCurrency": "NPR",
               "availability": "https://schema.org/InStock"}],
   "aggregateRating": {"ratingValue": "4.6", "reviewCount": 312}}
]}
</script></head>
<body><div class="pdp-content">
<p>A large AMOLED display and a long-lasting battery make this phone good value.</p>
</div></body></html>"#;

    const PRODUCT_MARKUP: &str = r#"
<html><head><title>Kettle</title></head>
<body>
<h1 class="pdp-title">Electric Kettle 1.8L</h1>
<span class="pdp-price">Rs. 2,499</span>
<span class="discount-tag">-20%</span>
<div class="stock-status">Only 3 items left</div>
<div class="rating-score">4.2</div>
</body></html>"#;

    const RATES_HTML: &str = r#"
<html><head><title>Bullion rates</title></head>
<body>
<table>
  <tr><th>Item</th><th>Price</th></tr>
  <tr><td>Gold Hallmark - tola</td><td>Nrs. 1,52,100</td></tr>
  <tr><td>Silver - tola</td><td>Nrs. 1,890</td></tr>
  <tr><td>Note</td><td></td></tr>
  <tr><td>Single cell</td></tr>
</table>
</body></html>"#;

    #[test]
    fn json_ld_product_facts_come_first() {
        let extracted = StructuredExtractor.extract(PRODUCT_JSON_LD, "https://www.daraz.com.np/p/1");
        let lines: Vec<&str> = extracted.text.lines().collect();
        assert_eq!(lines[0], "Product: Redmi Note 13");
        assert_eq!(lines[1], "Price: NPR 27999");
        assert!(lines.contains(&"Availability: InStock"));
        assert!(lines.contains(&"Rating: 4.6 (312 reviews)"));
        assert!(extracted.text.contains("AMOLED display"));
        assert_eq!(extracted.title.as_deref(), Some("Redmi Note 13"));
    }

    #[test]
    fn markup_fills_facts_without_json_ld() {
        let extracted = StructuredExtractor.extract(PRODUCT_MARKUP, "https://www.daraz.com.np/p/2");
        assert!(extracted.text.starts_with("Product: Electric Kettle 1.8L\nPrice: Rs. 2,499"));
        assert!(extracted.text.contains("Discount: -20%"));
        assert!(extracted.text.contains("Availability: Only 3 items left"));
        assert!(extracted.text.contains("Rating: 4.2"));
    }

    #[test]
    fn table_rows_become_key_value_lines() {
        let extracted = TableExtractor.extract(RATES_HTML, "https://www.hamropatro.com/gold");
        let lines: Vec<&str> = extracted.text.lines().collect();
        assert_eq!(
            &lines[..3],
            &[
                "Item: Price",
                "Gold Hallmark - tola: Nrs. 1,52,100",
                "Silver - tola: Nrs. 1,890",
            ]
        );
        assert!(!extracted.text.contains("Note:"));
        assert!(!extracted.text.contains("Single cell"));
    }

    #[test]
    fn page_without_tables_falls_back_to_generic_text() {
        let html = "<html><body><div class=\"content\">\
                    <p>Exchange rates are published every morning by the central bank.</p>\
                    </div></body></html>";
        let extracted = TableExtractor.extract(html, "https://www.hamropatro.com/forex");
        assert_eq!(
            extracted.text,
            "Exchange rates are published every morning by the central bank."
        );
    }

    #[test]
    fn facts_first_joins_sections() {
        assert_eq!(facts_first(vec![], "body"), "body");
        assert_eq!(facts_first(vec!["a: 1".into()], ""), "a: 1");
        assert_eq!(facts_first(vec!["a: 1".into()], "body"), "a: 1\n\nbody");
    }
}
