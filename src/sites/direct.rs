use super::SiteProfile;
use crate::external_id::compute_external_id;
use crate::normalize::FieldNormalizer;
use crate::types::{CanonicalEvent, RawEventData, TransformerStrategy};
use serde_json::Value;

/// Transformer for sites whose scraped fields map directly onto the canonical event
pub struct DirectTransformer {
    profile: &'static SiteProfile,
}

impl DirectTransformer {
    pub fn new(profile: &'static SiteProfile) -> Self {
        Self { profile }
    }
}

impl TransformerStrategy for DirectTransformer {
    fn site_key(&self) -> &'static str {
        self.profile.key
    }

    fn profile(&self) -> &SiteProfile {
        self.profile
    }

    fn external_id(&self, raw: &RawEventData) -> String {
        compute_external_id(self.profile, raw)
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
    use crate::external_id::hash_parts;
    use crate::sites::profiles::profile_for;
    use serde_json::json;

    #[test]
    fn test_billboard_uses_artist_as_title() {
        let transformer = DirectTransformer::new(profile_for(constants::BILLBOARD_LIVE_OSAKA).unwrap());
        let raw = json!({
            "artist": "Some Quartet",
            "date": "2024-07-01",
            "url": "https://example.jp/osaka/quartet",
            "price": "¥8,900"
        });
        let id = transformer.external_id(&raw);
        assert_eq!(
            id,
            hash_parts(&["some quartet", "2024-07-01", "https://example.jp/osaka/quartet"])
        );

        let event = transformer.normalize(&raw, &id, None);
        assert_eq!(event.title, "Some Quartet");
        assert_eq!(event.venue.as_deref(), Some("Billboard Live OSAKA"));
        assert_eq!(event.prices.len(), 1);
        assert_eq!(event.prices[0].amount, Some(8900.0));
        assert!(!event.free);
        assert_eq!(event.categories, vec!["Live Music".to_string()]);
        assert_eq!(event.link_type, constants::LINK_TYPE_OFFICIAL);
    }

    #[test]
    fn test_exhibition_period_aliases() {
        let transformer = DirectTransformer::new(profile_for(constants::MORI_ART_MUSEUM).unwrap());
        let raw = json!({
            "title": "Retrospective",
            "period_start": "2024-04-24",
            "period_end": "2024-09-01",
            "url": "https://example.jp/exhibitions/retro"
        });
        let event = transformer.normalize(&raw, "id", None);
        assert_eq!(event.date_start, chrono::NaiveDate::from_ymd_opt(2024, 4, 24));
        assert_eq!(event.date_end, chrono::NaiveDate::from_ymd_opt(2024, 9, 1));
    }
}
