//! Extraction strategies.
//!
//! The recovery engine only counts and positions what an [`Extractor`]
//! returns. Two strategies ship with the crate so the engine can run (and
//! shadow-score a challenger) without a site-specific plug-in.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use shelfscout_core::{Item, ItemOrigin};

pub trait Extractor: Send + Sync {
    /// Strategy id as stored in the selector policy.
    fn id(&self) -> &str;

    /// Items found in `content`. Relative links resolve against `base_url`.
    fn extract(&self, content: &str, base_url: &str) -> Vec<Item>;
}

static LD_SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]+type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .expect("valid regex")
});

static PRODUCT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)["@]\s*type"\s*:\s*\[?\s*"Product""#).expect("valid regex"));

/// Number of schema.org `Product` declarations in raw markup.
#[must_use]
pub fn count_structured_products(content: &str) -> usize {
    PRODUCT_TYPE_RE.find_iter(content).count()
}

/// schema.org `Product` objects in `<script type="application/ld+json">`
/// blocks, including `@graph` containers and `ItemList` wrappers.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLdExtractor;

impl Extractor for JsonLdExtractor {
    fn id(&self) -> &str {
        "jsonld"
    }

    fn extract(&self, content: &str, base_url: &str) -> Vec<Item> {
        let mut items = Vec::new();
        for cap in LD_SCRIPT_RE.captures_iter(content) {
            let Some(json_text) = cap.get(1) else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(json_text.as_str().trim()) else {
                continue;
            };
            let mut nodes = Vec::new();
            flatten_nodes(&value, &mut nodes);
            items.extend(
                nodes
                    .into_iter()
                    .filter_map(|node| product_to_item(node, base_url)),
            );
        }
        items
    }
}

fn flatten_nodes<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(values) => {
            for v in values {
                flatten_nodes(v, out);
            }
        }
        Value::Object(map) => {
            out.push(value);
            if let Some(graph) = map.get("@graph") {
                flatten_nodes(graph, out);
            }
            if let Some(elements) = map.get("itemListElement") {
                flatten_nodes(elements, out);
            }
            if let Some(item) = map.get("item") {
                flatten_nodes(item, out);
            }
        }
        _ => {}
    }
}

fn has_type(node: &Value, wanted: &str) -> bool {
    match node.get("@type") {
        Some(Value::String(s)) => s.eq_ignore_ascii_case(wanted),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s.eq_ignore_ascii_case(wanted)),
        _ => false,
    }
}

fn product_to_item(node: &Value, base_url: &str) -> Option<Item> {
    if !has_type(node, "Product") {
        return None;
    }
    let name = node.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let offer = match node.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        other => other,
    };
    let price = offer.and_then(|o| {
        o.get("price")
            .or_else(|| o.get("lowPrice"))
            .and_then(parse_price_value)
    });

    let quantity = node
        .get("size")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| {
            let weight = node.get("weight")?;
            let value = weight.get("value")?;
            let unit = weight
                .get("unitText")
                .or_else(|| weight.get("unitCode"))
                .and_then(Value::as_str)
                .unwrap_or("");
            Some(format!("{} {unit}", scalar_text(value)?).trim().to_string())
        });

    let href = node
        .get("url")
        .or_else(|| offer.and_then(|o| o.get("url")))
        .and_then(Value::as_str);

    Some(Item {
        name: name.to_string(),
        quantity,
        price,
        source_url: resolve(base_url, href),
        origin: ItemOrigin::Live,
        stale: false,
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_price_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price_text(s),
        _ => None,
    }
}

/// `"7,99"`, `"€ 7.99"`, `"1.299,00"` -> f64.
pub(crate) fn parse_price_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    normalized.parse::<f64>().ok()
}

fn resolve(base_url: &str, href: Option<&str>) -> String {
    let Some(href) = href.filter(|h| !h.trim().is_empty()) else {
        return base_url.to_string();
    };
    reqwest::Url::parse(base_url)
        .and_then(|base| base.join(href.trim()))
        .map_or_else(|_| href.trim().to_string(), |u| u.to_string())
}

static MICRODATA_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)itemtype\s*=\s*["']https?://schema\.org/Product["']"#).expect("valid regex")
});

static ITEMPROP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<(\w+)[^>]*\bitemprop\s*=\s*["'](name|price|url|size)["'][^>]*?(?:\b(?:content|href)\s*=\s*["']([^"']*)["'][^>]*)?>([^<]*)"#,
    )
    .expect("valid regex")
});

/// schema.org `Product` microdata (`itemscope itemtype=".../Product"` blocks).
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrodataExtractor;

impl Extractor for MicrodataExtractor {
    fn id(&self) -> &str {
        "microdata"
    }

    fn extract(&self, content: &str, base_url: &str) -> Vec<Item> {
        let starts: Vec<usize> = MICRODATA_SPLIT_RE
            .find_iter(content)
            .map(|m| m.end())
            .collect();

        let mut items = Vec::new();
        for (idx, start) in starts.iter().enumerate() {
            let end = starts.get(idx + 1).copied().unwrap_or(content.len());
            let block = &content[*start..end];

            let mut name = None;
            let mut price = None;
            let mut href = None;
            let mut quantity = None;
            for cap in ITEMPROP_RE.captures_iter(block) {
                let prop = cap.get(2).map_or("", |m| m.as_str()).to_ascii_lowercase();
                let value = cap
                    .get(3)
                    .map(|m| m.as_str().trim())
                    .filter(|v| !v.is_empty())
                    .or_else(|| cap.get(4).map(|m| m.as_str().trim()))
                    .unwrap_or("");
                if value.is_empty() {
                    continue;
                }
                match prop.as_str() {
                    "name" if name.is_none() => name = Some(value.to_string()),
                    "price" if price.is_none() => price = parse_price_text(value),
                    "url" if href.is_none() => href = Some(value.to_string()),
                    "size" if quantity.is_none() => quantity = Some(value.to_string()),
                    _ => {}
                }
            }

            if let Some(name) = name {
                items.push(Item {
                    name,
                    quantity,
                    price,
                    source_url: resolve(base_url, href.as_deref()),
                    origin: ItemOrigin::Live,
                    stale: false,
                });
            }
        }
        items
    }
}
