//! Field normalization shared by every site transformer.
//!
//! Raw payloads name their fields differently per site; extraction results use
//! the canonical names. Lookups check the extraction result first and fall back
//! to the raw payload through the site's alias table.

use crate::constants;
use crate::sites::{FieldAliases, SiteProfile};
use crate::types::{CanonicalEvent, ImageEntry, PriceEntry, RawEventData, ScheduleEntry};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("amount regex is valid"));

const FREE_MARKERS: &[&str] = &["free", "無料", "入場無料", "free admission"];
const SOLD_OUT_MARKERS: &[&str] = &["true", "yes", "sold out", "soldout", "完売", "売り切れ"];

/// First non-blank string (or number rendered as a string) under any of `keys`
pub fn first_str(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key) {
        Some(Value::String(s)) => blank_to_none(Some(s.as_str())),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// First non-null value under any of `keys`
pub fn first_value<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| raw.get(*key).filter(|v| !v.is_null()))
}

/// Empty or whitespace-only strings become None
pub fn blank_to_none(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Time fields: blank and "TBA" (any case) become None, anything else passes through
pub fn normalize_time(value: Option<&str>) -> Option<String> {
    blank_to_none(value).filter(|s| !s.eq_ignore_ascii_case(constants::TIME_TBA))
}

/// Parse a date with the site's formats, accepting a trailing `T...` time part
pub fn parse_date(text: &str, formats: &[&str]) -> Option<NaiveDate> {
    let text = text.trim();
    let try_formats = |candidate: &str| {
        formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
    };
    try_formats(text).or_else(|| {
        text.split(['T', ' '])
            .next()
            .filter(|head| *head != text)
            .and_then(try_formats)
    })
}

/// Parse a price amount given as a number, a numeric string, or price text
/// such as `¥3,000`, `3,000円` or `無料`
pub fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let text = s.trim();
            if text.is_empty() {
                return None;
            }
            if FREE_MARKERS.contains(&text.to_lowercase().as_str()) {
                return Some(0.0);
            }
            let digits = AMOUNT_RE.find(text)?.as_str().replace(',', "");
            digits.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Free when every price is zero or absent; a single positive tier makes the
/// whole event paid. No prices at all keeps the site default.
pub fn infer_free(prices: &[PriceEntry], default_free: bool) -> bool {
    if prices.is_empty() {
        return default_free;
    }
    !prices
        .iter()
        .any(|p| p.amount.map_or(false, |amount| amount > 0.0))
}

/// Rewrite a relative image URL against the event link, when there is one
pub fn resolve_image_url(image_url: &str, event_link: Option<&str>) -> String {
    if Url::parse(image_url).is_ok() {
        return image_url.to_string();
    }
    let Some(link) = event_link else {
        return image_url.to_string();
    };
    match Url::parse(link).and_then(|base| base.join(image_url)) {
        Ok(resolved) => resolved.to_string(),
        Err(e) => {
            debug!("Could not resolve image url {} against {}: {}", image_url, link, e);
            image_url.to_string()
        }
    }
}

/// Names from an array of strings or a comma separated string, trimmed and deduplicated
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    let items: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split([',', '、']).map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter_map(|s| blank_to_none(Some(s.as_str())))
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

const TRUE_MARKERS: &[&str] = &["true", "yes", "1"];
const FALSE_MARKERS: &[&str] = &["false", "no", "0"];

/// Boolean from a bool, a number or a marker string. Blank and unrecognised
/// strings are None so the caller's default or inference applies.
pub fn parse_flag(value: Option<&Value>, markers: &[&str]) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let lower = s.trim().to_lowercase();
            if FALSE_MARKERS.contains(&lower.as_str()) {
                Some(false)
            } else if TRUE_MARKERS.contains(&lower.as_str()) || markers.contains(&lower.as_str()) {
                Some(true)
            } else {
                None
            }
        }
        Value::Number(n) => Some(n.as_f64().map_or(false, |v| v != 0.0)),
        _ => None,
    }
}

/// Per-site field normalizer
pub struct FieldNormalizer<'a> {
    profile: &'a SiteProfile,
}

struct Sources<'a> {
    raw: &'a RawEventData,
    extracted: Option<&'a Value>,
}

impl<'a> Sources<'a> {
    fn str(&self, keys: &[&str]) -> Option<String> {
        self.extracted
            .and_then(|e| first_str(e, keys))
            .or_else(|| first_str(self.raw, keys))
    }

    fn value(&self, keys: &[&str]) -> Option<&'a Value> {
        self.extracted
            .and_then(|e| first_value(e, keys))
            .or_else(|| first_value(self.raw, keys))
    }
}

impl<'a> FieldNormalizer<'a> {
    pub fn new(profile: &'a SiteProfile) -> Self {
        Self { profile }
    }

    fn aliases(&self) -> &FieldAliases {
        &self.profile.aliases
    }

    pub fn normalize(
        &self,
        raw: &RawEventData,
        external_id: &str,
        extracted: Option<&Value>,
    ) -> CanonicalEvent {
        let src = Sources { raw, extracted };
        let a = self.aliases();

        let title = src.str(a.title).unwrap_or_default();
        let organization = src
            .str(a.organization)
            .unwrap_or_else(|| self.profile.organization.to_string());

        let date_start = src
            .str(a.date_start)
            .and_then(|s| self.parse_date_logged(&s, "date_start"));
        // An absent end date means a single-day event; an unparseable one stays invalid
        let date_end = match src.str(a.date_end) {
            Some(s) => self.parse_date_logged(&s, "date_end"),
            None => date_start,
        };

        let venue = src
            .str(a.venue)
            .or_else(|| self.profile.fallback_venue(&organization));

        let event_link = src.str(a.event_link);
        if event_link.is_none() {
            warn!(site = self.profile.key, external_id, "Event has no link");
        }

        let prices = self.prices(&src);
        let free = parse_flag(src.value(a.free), FREE_MARKERS)
            .unwrap_or_else(|| infer_free(&prices, self.profile.default_free));
        let sold_out = parse_flag(src.value(a.sold_out), SOLD_OUT_MARKERS).unwrap_or(false);

        let mut categories: Vec<String> = self
            .profile
            .default_categories
            .iter()
            .map(|c| c.to_string())
            .collect();
        for category in string_list(src.value(a.categories)) {
            if !categories.contains(&category) {
                categories.push(category);
            }
        }

        CanonicalEvent {
            external_id: external_id.to_string(),
            site_key: self.profile.key.to_string(),
            schedule: self.schedule(&src, date_start),
            images: self.images(&src, &title, event_link.as_deref()),
            description: src.str(a.description),
            program: src.str(a.program),
            tags: string_list(src.value(a.tags)),
            link_type: self.profile.link_type.to_string(),
            title,
            organization,
            date_start,
            date_end,
            venue,
            sold_out,
            free,
            event_link,
            categories,
            prices,
        }
    }

    fn parse_date_logged(&self, text: &str, field: &str) -> Option<NaiveDate> {
        let parsed = parse_date(text, self.profile.date_formats);
        if parsed.is_none() {
            warn!(site = self.profile.key, field, value = text, "Unparseable date");
        }
        parsed
    }

    fn schedule(&self, src: &Sources<'_>, date_start: Option<NaiveDate>) -> Vec<ScheduleEntry> {
        let a = self.aliases();
        let mut entries: Vec<ScheduleEntry> = Vec::new();

        if let Some(Value::Array(items)) = src.value(a.schedule) {
            for item in items {
                let Some(date) = first_str(item, &["date", "day"])
                    .and_then(|s| self.parse_date_logged(&s, "schedule.date"))
                else {
                    continue;
                };
                let entry = ScheduleEntry {
                    date,
                    time_start: normalize_time(first_str(item, a.time_start).as_deref()),
                    time_end: normalize_time(first_str(item, a.time_end).as_deref()),
                    special_notes: first_str(item, &["special_notes", "notes", "note"]),
                };
                // One entry per date; the last one seen wins
                match entries.iter_mut().find(|e| e.date == date) {
                    Some(existing) => *existing = entry,
                    None => entries.push(entry),
                }
            }
        }

        if entries.is_empty() {
            if let Some(date) = date_start {
                entries.push(ScheduleEntry {
                    date,
                    time_start: normalize_time(src.str(a.time_start).as_deref()),
                    time_end: normalize_time(src.str(a.time_end).as_deref()),
                    special_notes: None,
                });
            }
        }
        entries
    }

    fn prices(&self, src: &Sources<'_>) -> Vec<PriceEntry> {
        let a = self.aliases();
        let currency = self.profile.currency;
        let mut prices: Vec<PriceEntry> = Vec::new();

        let tier_name = |index: usize| {
            if index == 0 {
                constants::DEFAULT_PRICE_TIER.to_string()
            } else {
                format!("{} {}", constants::DEFAULT_PRICE_TIER, index + 1)
            }
        };

        match src.value(a.prices) {
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let entry = match item {
                        Value::Object(_) => PriceEntry {
                            price_tier: first_str(item, &["price_tier", "tier", "name", "label"])
                                .unwrap_or_else(|| tier_name(i)),
                            amount: first_value(item, &["amount", "price", "value"])
                                .and_then(parse_amount),
                            currency: first_str(item, &["currency"])
                                .unwrap_or_else(|| currency.to_string()),
                            discount_info: first_str(item, &["discount_info", "discount", "note"]),
                        },
                        other => PriceEntry {
                            price_tier: tier_name(i),
                            amount: parse_amount(other),
                            currency: currency.to_string(),
                            discount_info: None,
                        },
                    };
                    match prices.iter_mut().find(|p| p.price_tier == entry.price_tier) {
                        Some(existing) => *existing = entry,
                        None => prices.push(entry),
                    }
                }
            }
            Some(single @ (Value::String(_) | Value::Number(_))) => {
                if parse_amount(single).is_some() {
                    prices.push(PriceEntry {
                        price_tier: tier_name(0),
                        amount: parse_amount(single),
                        currency: currency.to_string(),
                        discount_info: None,
                    });
                }
            }
            _ => {}
        }
        prices
    }

    fn images(&self, src: &Sources<'_>, title: &str, event_link: Option<&str>) -> Vec<ImageEntry> {
        let a = self.aliases();
        let alt = blank_to_none(Some(title));

        let mut extra: Vec<ImageEntry> = Vec::new();
        if let Some(Value::Array(items)) = src.value(a.images) {
            for item in items {
                let (url, alt_text, featured) = match item {
                    Value::String(s) => (blank_to_none(Some(s.as_str())), None, false),
                    Value::Object(_) => (
                        first_str(item, &["image_url", "url", "src"]),
                        first_str(item, &["alt_text", "alt"]),
                        parse_flag(item.get("is_featured"), &[]).unwrap_or(false),
                    ),
                    _ => continue,
                };
                let Some(url) = url else { continue };
                extra.push(ImageEntry {
                    image_url: resolve_image_url(&url, event_link),
                    alt_text: alt_text.or_else(|| alt.clone()),
                    is_featured: featured,
                });
            }
        }

        // At most one featured image: the primary, else the first flagged extra
        let primary = match src.str(a.image) {
            Some(url) => ImageEntry {
                image_url: resolve_image_url(&url, event_link),
                alt_text: alt.clone(),
                is_featured: true,
            },
            None => match extra.iter().position(|img| img.is_featured) {
                Some(pos) => extra.remove(pos),
                None => ImageEntry {
                    image_url: self.profile.placeholder_image.to_string(),
                    alt_text: alt.clone(),
                    is_featured: true,
                },
            },
        };

        let mut images = vec![primary];
        for mut image in extra {
            if images.iter().any(|i| i.image_url == image.image_url) {
                continue;
            }
            image.is_featured = false;
            images.push(image);
        }
        images
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::profiles::profile_for;
    use serde_json::json;

    fn price(amount: Option<f64>) -> PriceEntry {
        PriceEntry {
            price_tier: "t".into(),
            amount,
            currency: "JPY".into(),
            discount_info: None,
        }
    }

    #[test]
    fn test_infer_free_all_zero() {
        assert!(infer_free(&[price(Some(0.0)), price(Some(0.0))], false));
    }

    #[test]
    fn test_infer_free_any_positive_is_paid() {
        assert!(!infer_free(&[price(Some(0.0)), price(Some(500.0))], true));
    }

    #[test]
    fn test_infer_free_absent_amounts_count_as_free() {
        assert!(infer_free(&[price(None), price(Some(0.0))], false));
    }

    #[test]
    fn test_infer_free_empty_keeps_site_default() {
        assert!(infer_free(&[], true));
        assert!(!infer_free(&[], false));
    }

    #[test]
    fn test_normalize_time() {
        assert_eq!(normalize_time(Some("")), None);
        assert_eq!(normalize_time(Some("TBA")), None);
        assert_eq!(normalize_time(Some("tba")), None);
        assert_eq!(normalize_time(Some("18:00")), Some("18:00".to_string()));
        assert_eq!(normalize_time(None), None);
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount(&json!(0)), Some(0.0));
        assert_eq!(parse_amount(&json!("0")), Some(0.0));
        assert_eq!(parse_amount(&json!("¥3,000")), Some(3000.0));
        assert_eq!(parse_amount(&json!("3,500円")), Some(3500.0));
        assert_eq!(parse_amount(&json!("無料")), Some(0.0));
        assert_eq!(parse_amount(&json!("Free")), Some(0.0));
        assert_eq!(parse_amount(&json!("ask at door")), None);
        assert_eq!(parse_amount(&json!("")), None);
    }

    #[test]
    fn test_parse_flag_markers() {
        assert_eq!(parse_flag(Some(&json!(true)), FREE_MARKERS), Some(true));
        assert_eq!(parse_flag(Some(&json!("No")), FREE_MARKERS), Some(false));
        assert_eq!(parse_flag(Some(&json!("free")), FREE_MARKERS), Some(true));
        assert_eq!(parse_flag(Some(&json!("無料")), FREE_MARKERS), Some(true));
        assert_eq!(parse_flag(Some(&json!("完売")), SOLD_OUT_MARKERS), Some(true));
        assert_eq!(parse_flag(Some(&json!("")), FREE_MARKERS), None);
        assert_eq!(parse_flag(Some(&json!("TBA")), FREE_MARKERS), None);
        assert_eq!(parse_flag(Some(&json!("free")), SOLD_OUT_MARKERS), None);
        assert_eq!(parse_flag(None, FREE_MARKERS), None);
    }

    #[test]
    fn test_unknown_free_text_falls_back_to_price_inference() {
        let profile = profile_for(constants::BLUE_NOTE_TOKYO).unwrap();
        for (flag, expected) in [("", true), ("TBA", true), ("free", true), ("無料", true), ("no", false)] {
            let raw = json!({
                "title": "Set",
                "date_start": "2024-05-01",
                "free": flag,
                "prices": [{"amount": 0}]
            });
            let event = FieldNormalizer::new(profile).normalize(&raw, "abc", None);
            assert_eq!(event.free, expected, "free = {:?}", flag);
        }

        let paid = json!({"title": "Set", "date_start": "2024-05-01", "free": "TBA", "prices": ["¥4,000"]});
        assert!(!FieldNormalizer::new(profile).normalize(&paid, "abc", None).free);
    }

    #[test]
    fn test_sold_out_markers() {
        let profile = profile_for(constants::BLUE_NOTE_TOKYO).unwrap();
        let sold = json!({"title": "Set", "date_start": "2024-05-01", "sold_out": "売り切れ"});
        assert!(FieldNormalizer::new(profile).normalize(&sold, "abc", None).sold_out);
        let unknown = json!({"title": "Set", "date_start": "2024-05-01", "sold_out": "few left"});
        assert!(!FieldNormalizer::new(profile).normalize(&unknown, "abc", None).sold_out);
    }

    #[test]
    fn test_parse_date_formats() {
        let formats = &["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日"];
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1);
        assert_eq!(parse_date("2024-05-01", formats), expected);
        assert_eq!(parse_date("2024/05/01", formats), expected);
        assert_eq!(parse_date("2024年5月1日", formats), expected);
        assert_eq!(parse_date("2024-05-01T19:00:00+09:00", formats), expected);
        assert_eq!(parse_date("next tuesday", formats), None);
    }

    #[test]
    fn test_resolve_image_url() {
        let link = Some("https://example.jp/events/2024/jazz.html");
        assert_eq!(
            resolve_image_url("./img/a.jpg", link),
            "https://example.jp/events/2024/img/a.jpg"
        );
        assert_eq!(
            resolve_image_url("../img/a.jpg", link),
            "https://example.jp/events/img/a.jpg"
        );
        assert_eq!(
            resolve_image_url("https://cdn.example.jp/a.jpg", link),
            "https://cdn.example.jp/a.jpg"
        );
        assert_eq!(resolve_image_url("./img/a.jpg", None), "./img/a.jpg");
    }

    #[test]
    fn test_string_list() {
        assert_eq!(
            string_list(Some(&json!(["Jazz", " Live ", "Jazz", ""]))),
            vec!["Jazz".to_string(), "Live".to_string()]
        );
        assert_eq!(
            string_list(Some(&json!("Jazz, Live、Piano"))),
            vec!["Jazz".to_string(), "Live".to_string(), "Piano".to_string()]
        );
        assert!(string_list(None).is_empty());
    }

    #[test]
    fn test_normalize_defaults_and_coercions() {
        let profile = profile_for(constants::SUNTORY_HALL).unwrap();
        let raw = json!({
            "title": "Organ Recital",
            "date_start": "2024/06/10",
            "time_start": "TBA",
            "time_end": "",
            "prices": [{"price_tier": "S", "amount": "¥5,000"}, {"price_tier": "Student", "amount": 0}]
        });
        let event = FieldNormalizer::new(profile).normalize(&raw, "abc", None);

        assert_eq!(event.date_start, NaiveDate::from_ymd_opt(2024, 6, 10));
        assert_eq!(event.date_end, event.date_start);
        assert!(!event.free);
        assert_eq!(event.schedule.len(), 1);
        assert_eq!(event.schedule[0].time_start, None);
        assert_eq!(event.schedule[0].time_end, None);
        assert_eq!(event.images.len(), 1);
        assert_eq!(event.images[0].image_url, profile.placeholder_image);
        assert!(event.images[0].is_featured);
        assert_eq!(event.venue.as_deref(), Some(profile.organization));
        assert_eq!(event.prices[0].currency, "JPY");
    }

    #[test]
    fn test_extracted_fields_take_precedence() {
        let profile = profile_for(constants::SUNTORY_HALL).unwrap();
        let raw = json!({"title": "raw title", "date_start": "2024-06-10"});
        let extracted = json!({
            "title": "Extracted Title",
            "schedule": [
                {"date": "2024-06-10", "time_start": "18:30"},
                {"date": "2024-06-11", "time_start": "TBA"}
            ],
            "tags": ["organ"]
        });
        let event = FieldNormalizer::new(profile).normalize(&raw, "abc", Some(&extracted));
        assert_eq!(event.title, "Extracted Title");
        assert_eq!(event.schedule.len(), 2);
        assert_eq!(event.schedule[0].time_start.as_deref(), Some("18:30"));
        assert_eq!(event.schedule[1].time_start, None);
        assert_eq!(event.tags, vec!["organ".to_string()]);
    }

    #[test]
    fn test_unparseable_end_date_stays_invalid() {
        let profile = profile_for(constants::BLUE_NOTE_TOKYO).unwrap();
        let raw = json!({"title": "Set", "date_start": "2024-05-01", "date_end": "soon"});
        let event = FieldNormalizer::new(profile).normalize(&raw, "abc", None);
        assert!(event.date_start.is_some());
        assert!(event.date_end.is_none());
    }

    #[test]
    fn test_primary_and_additional_images() {
        let profile = profile_for(constants::BLUE_NOTE_TOKYO).unwrap();
        let raw = json!({
            "title": "Set",
            "date_start": "2024-05-01",
            "url": "https://example.jp/live/set.html",
            "image_url": "./main.jpg",
            "images": ["./main.jpg", {"url": "https://cdn.example.jp/b.jpg", "is_featured": true}]
        });
        let event = FieldNormalizer::new(profile).normalize(&raw, "abc", None);
        assert_eq!(event.images.len(), 2);
        assert_eq!(event.images[0].image_url, "https://example.jp/live/main.jpg");
        assert!(event.images[0].is_featured);
        assert!(!event.images[1].is_featured);
    }

    #[test]
    fn test_flagged_extra_becomes_primary_without_image_url() {
        let profile = profile_for(constants::BLUE_NOTE_TOKYO).unwrap();
        let raw = json!({
            "title": "Set",
            "date_start": "2024-05-01",
            "images": [
                "https://cdn.example.jp/a.jpg",
                {"url": "https://cdn.example.jp/b.jpg", "is_featured": true},
                {"url": "https://cdn.example.jp/c.jpg", "is_featured": "yes"}
            ]
        });
        let event = FieldNormalizer::new(profile).normalize(&raw, "abc", None);
        assert_eq!(event.images[0].image_url, "https://cdn.example.jp/b.jpg");
        assert_eq!(event.images.iter().filter(|i| i.is_featured).count(), 1);
        assert_eq!(event.images.len(), 3);
    }

    #[test]
    fn test_missing_image_uses_placeholder() {
        let profile = profile_for(constants::BLUE_NOTE_TOKYO).unwrap();
        let raw = json!({"title": "Set", "date_start": "2024-05-01", "images": ["https://cdn.example.jp/c.jpg"]});
        let event = FieldNormalizer::new(profile).normalize(&raw, "abc", None);
        assert_eq!(event.images[0].image_url, profile.placeholder_image);
        assert!(event.images[0].is_featured);
        assert!(!event.images[1].is_featured);
    }
}
