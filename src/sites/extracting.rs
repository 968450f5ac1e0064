use super::SiteProfile;
use crate::external_id::compute_external_id;
use crate::normalize::FieldNormalizer;
use crate::types::{CanonicalEvent, RawEventData, TransformerStrategy};
use crate::extraction::ExtractionError;
use serde_json::Value;

const RESPONSE_SHAPE: &str = r#"{"title": "", "date_start": "YYYY-MM-DD", "date_end": "YYYY-MM-DD", "venue": "", "description": "", "program": "", "sold_out": false, "schedule": [{"date": "YYYY-MM-DD", "time_start": "HH:MM", "time_end": "HH:MM", "special_notes": ""}], "prices": [{"price_tier": "", "amount": 0, "currency": "JPY", "discount_info": ""}], "categories": [], "tags": [], "image_url": ""}"#;

/// Transformer for sites whose listings are free text; field extraction is
/// delegated to the upstream text-generation service
pub struct ExtractingTransformer {
    profile: &'static SiteProfile,
}

impl ExtractingTransformer {
    pub fn new(profile: &'static SiteProfile) -> Self {
        Self { profile }
    }
}

/// Keys the response shape asks for; an object with none of them is not an event
const EVENT_KEYS: &[&str] = &[
    "title",
    "date_start",
    "date_end",
    "venue",
    "description",
    "program",
    "schedule",
    "prices",
];

fn is_event(value: &Value) -> bool {
    value
        .as_object()
        .map_or(false, |map| EVENT_KEYS.iter().any(|k| map.get(*k).map_or(false, |v| !v.is_null())))
}

/// Extraction results come back flat, as `{"event": {...}}`, as
/// `{"events": [...]}` or as a bare array. The first event belongs to the
/// listing; the rest are returned separately.
pub fn split_events(extracted: Value) -> Result<(Value, Vec<Value>), ExtractionError> {
    let mut events = match extracted {
        Value::Object(mut map) => match (map.remove("event"), map.remove("events")) {
            (Some(event), _) if event.is_object() => vec![event],
            (_, Some(Value::Array(items))) => items,
            (_, Some(_)) => Vec::new(),
            (_, None) => vec![Value::Object(map)],
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    events.retain(is_event);
    if events.is_empty() {
        return Err(ExtractionError::NoEvent);
    }
    let first = events.remove(0);
    Ok((first, events))
}

impl TransformerStrategy for ExtractingTransformer {
    fn site_key(&self) -> &'static str {
        self.profile.key
    }

    fn profile(&self) -> &SiteProfile {
        self.profile
    }

    fn external_id(&self, raw: &RawEventData) -> String {
        compute_external_id(self.profile, raw)
    }

    fn extraction_prompt(&self, raw: &RawEventData) -> Option<String> {
        let listing = serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string());
        let mut prompt = format!(
            "Extract the event from this {} listing. Respond with one JSON object shaped like:\n{}\n",
            self.profile.organization, RESPONSE_SHAPE
        );
        if !self.profile.prompt_notes.is_empty() {
            prompt.push_str(self.profile.prompt_notes);
            prompt.push('\n');
        }
        prompt.push_str("\nListing:\n");
        prompt.push_str(&listing);
        Some(prompt)
    }

    fn split_extracted(&self, extracted: Value) -> Result<(Value, Vec<Value>), ExtractionError> {
        split_events(extracted)
    }

    fn normalize(
        &self,
        raw: &RawEventData,
        external_id: &str,
        extracted: Option<&Value>,
    ) -> CanonicalEvent {
        FieldNormalizer::new(self.profile).normalize(raw, external_id, extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants;
    use crate::sites::profiles::profile_for;
    use serde_json::json;

    fn transformer() -> ExtractingTransformer {
        ExtractingTransformer::new(profile_for(constants::SUNTORY_HALL).unwrap())
    }

    #[test]
    fn test_prompt_contains_listing_and_notes() {
        let raw = json!({"title": "Organ Recital", "body": "S ¥5,000 / A ¥3,000"});
        let prompt = transformer().extraction_prompt(&raw).unwrap();
        assert!(prompt.contains("Suntory Hall"));
        assert!(prompt.contains("Blue Rose"));
        assert!(prompt.contains("S ¥5,000 / A ¥3,000"));
    }

    #[test]
    fn test_splits_events_array() {
        let raw = json!({"title": "raw", "date_start": "2024-06-10"});
        let extracted = json!({"events": [
            {"title": "First", "prices": [{"price_tier": "S", "amount": 5000}]},
            {"title": "Second"}
        ]});
        let (first, rest) = transformer().split_extracted(extracted).unwrap();
        assert_eq!(rest, vec![json!({"title": "Second"})]);

        let event = transformer().normalize(&raw, "id", Some(&first));
        assert_eq!(event.title, "First");
        assert_eq!(event.prices[0].price_tier, "S");
        assert!(!event.free);
    }

    #[test]
    fn test_unwraps_event_object() {
        let raw = json!({"title": "raw", "date_start": "2024-06-10"});
        let extracted = json!({"event": {"title": "Nested", "free": true}});
        let (event, rest) = transformer().split_extracted(extracted).unwrap();
        assert!(rest.is_empty());

        let event = transformer().normalize(&raw, "id", Some(&event));
        assert_eq!(event.title, "Nested");
        assert!(event.free);
        assert_eq!(event.date_start, chrono::NaiveDate::from_ymd_opt(2024, 6, 10));
    }

    #[test]
    fn test_flat_object_is_one_event() {
        let (event, rest) = split_events(json!({"title": "Flat", "venue": "Blue Rose"})).unwrap();
        assert_eq!(event["title"], "Flat");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_no_event_is_an_error() {
        for extracted in [
            json!({"events": []}),
            json!({"events": [{}, "text"]}),
            json!({}),
            json!({"error": "nothing found"}),
            json!({"title": null}),
            json!([]),
        ] {
            assert!(
                matches!(split_events(extracted.clone()), Err(ExtractionError::NoEvent)),
                "{}",
                extracted
            );
        }
    }
}
