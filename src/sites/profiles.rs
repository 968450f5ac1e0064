use super::{ExtractionMode, FieldAliases, SiteProfile, VenueFallback, DEFAULT_ALIASES};
use crate::constants::*;
use crate::external_id::IdField;

const BY_LINK: &[IdField] = &[IdField::Title, IdField::DateStart, IdField::EventLink];
const BY_VENUE: &[IdField] = &[IdField::Title, IdField::DateStart, IdField::Venue];

const ISO_DATES: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];
const JA_DATES: &[&str] = &["%Y年%m月%d日", "%Y-%m-%d", "%Y/%m/%d"];

const EXHIBITION_ALIASES: FieldAliases = FieldAliases {
    date_start: &["period_start", "date_start", "start_date"],
    date_end: &["period_end", "date_end", "end_date"],
    ..DEFAULT_ALIASES
};

const HALL_ALIASES: FieldAliases = FieldAliases {
    venue: &["hall", "venue", "venue_name"],
    ..DEFAULT_ALIASES
};

pub static PROFILES: &[SiteProfile] = &[
    SiteProfile {
        key: BLUE_NOTE_TOKYO,
        organization: "Blue Note Tokyo",
        mode: ExtractionMode::Direct,
        id_fields: BY_LINK,
        aliases: DEFAULT_ALIASES,
        date_formats: &["%Y-%m-%d", "%Y.%m.%d"],
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: "https://static.event-ingest.example/placeholder/blue_note_tokyo.png",
        venue_fallback: VenueFallback::Fixed("Blue Note Tokyo"),
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &["Jazz"],
        prompt_notes: "",
    },
    SiteProfile {
        key: BILLBOARD_LIVE_OSAKA,
        organization: "Billboard Live",
        mode: ExtractionMode::Direct,
        id_fields: BY_LINK,
        aliases: FieldAliases {
            title: &["artist", "title", "name"],
            ..DEFAULT_ALIASES
        },
        date_formats: ISO_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Fixed("Billboard Live OSAKA"),
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &["Live Music"],
        prompt_notes: "",
    },
    SiteProfile {
        key: COTTON_CLUB,
        organization: "Cotton Club",
        mode: ExtractionMode::Direct,
        id_fields: BY_LINK,
        aliases: DEFAULT_ALIASES,
        date_formats: ISO_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Fixed("Cotton Club"),
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &["Jazz"],
        prompt_notes: "",
    },
    SiteProfile {
        key: SUNTORY_HALL,
        organization: "Suntory Hall",
        mode: ExtractionMode::Upstream,
        id_fields: BY_LINK,
        aliases: DEFAULT_ALIASES,
        date_formats: ISO_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: "https://static.event-ingest.example/placeholder/suntory_hall.png",
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_PRIMARY,
        default_categories: &["Classical"],
        prompt_notes: "Main Hall and Blue Rose are separate venues. Ticket tiers are S, A, B, C and P.",
    },
    SiteProfile {
        key: TOKYO_OPERA_CITY,
        organization: "Tokyo Opera City",
        mode: ExtractionMode::Upstream,
        id_fields: BY_VENUE,
        aliases: HALL_ALIASES,
        date_formats: JA_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_PRIMARY,
        default_categories: &["Classical"],
        prompt_notes: "Student and U-25 discounts belong in discount_info.",
    },
    SiteProfile {
        key: KYOTO_CONCERT_HALL,
        organization: "Kyoto Concert Hall",
        mode: ExtractionMode::Direct,
        id_fields: BY_VENUE,
        aliases: HALL_ALIASES,
        date_formats: JA_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &["Classical"],
        prompt_notes: "",
    },
    SiteProfile {
        key: FESTIVAL_HALL,
        organization: "Festival Hall",
        mode: ExtractionMode::Direct,
        id_fields: BY_LINK,
        aliases: DEFAULT_ALIASES,
        date_formats: ISO_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &[],
        prompt_notes: "",
    },
    SiteProfile {
        key: SAPPORO_KITARA,
        organization: "Sapporo Concert Hall Kitara",
        mode: ExtractionMode::Upstream,
        id_fields: BY_VENUE,
        aliases: HALL_ALIASES,
        date_formats: JA_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_PRIMARY,
        default_categories: &["Classical"],
        prompt_notes: "The Main Hall and Small Hall are separate venues.",
    },
    SiteProfile {
        key: MORI_ART_MUSEUM,
        organization: "Mori Art Museum",
        mode: ExtractionMode::Direct,
        id_fields: BY_LINK,
        aliases: EXHIBITION_ALIASES,
        date_formats: ISO_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &["Exhibition"],
        prompt_notes: "",
    },
    SiteProfile {
        key: TOKYO_NATIONAL_MUSEUM,
        organization: "Tokyo National Museum",
        mode: ExtractionMode::Upstream,
        id_fields: BY_LINK,
        aliases: EXHIBITION_ALIASES,
        date_formats: JA_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_PRIMARY,
        default_categories: &["Exhibition"],
        prompt_notes: "Exhibitions span a period; use the first and last day as date_start and date_end.",
    },
    SiteProfile {
        key: KANAZAWA_21C,
        organization: "21st Century Museum of Contemporary Art, Kanazawa",
        mode: ExtractionMode::Direct,
        id_fields: BY_LINK,
        aliases: EXHIBITION_ALIASES,
        date_formats: JA_DATES,
        default_free: true,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &["Exhibition"],
        prompt_notes: "",
    },
    SiteProfile {
        key: ZEPP_HANEDA,
        organization: "Zepp Haneda",
        mode: ExtractionMode::Direct,
        id_fields: BY_VENUE,
        aliases: DEFAULT_ALIASES,
        date_formats: ISO_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &["Live Music"],
        prompt_notes: "",
    },
    SiteProfile {
        key: CLUB_QUATTRO,
        organization: "CLUB QUATTRO",
        mode: ExtractionMode::Direct,
        id_fields: BY_VENUE,
        aliases: HALL_ALIASES,
        date_formats: ISO_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &["Live Music"],
        prompt_notes: "",
    },
    SiteProfile {
        key: YOKOHAMA_CENTRAL_LIBRARY,
        organization: "Yokohama City Central Library",
        mode: ExtractionMode::Upstream,
        id_fields: BY_LINK,
        aliases: DEFAULT_ALIASES,
        date_formats: JA_DATES,
        default_free: true,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_PRIMARY,
        default_categories: &["Library"],
        prompt_notes: "Most programs need advance registration; put that in special_notes.",
    },
    SiteProfile {
        key: TOKYO_INTERNATIONAL_FORUM,
        organization: "Tokyo International Forum",
        mode: ExtractionMode::Direct,
        id_fields: BY_VENUE,
        aliases: HALL_ALIASES,
        date_formats: ISO_DATES,
        default_free: false,
        currency: DEFAULT_CURRENCY,
        placeholder_image: DEFAULT_PLACEHOLDER_IMAGE,
        venue_fallback: VenueFallback::Organization,
        link_type: LINK_TYPE_OFFICIAL,
        default_categories: &[],
        prompt_notes: "",
    },
];

/// Look up a built-in profile by site key
pub fn profile_for(site_key: &str) -> Option<&'static SiteProfile> {
    PROFILES.iter().find(|p| p.key == site_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_site_keys_are_unique() {
        let keys: HashSet<&str> = PROFILES.iter().map(|p| p.key).collect();
        assert_eq!(keys.len(), PROFILES.len());
    }

    #[test]
    fn test_every_profile_has_id_tuple_and_formats() {
        for profile in PROFILES {
            assert!(!profile.id_fields.is_empty(), "{}", profile.key);
            assert!(profile.id_fields.contains(&IdField::Title), "{}", profile.key);
            assert!(!profile.date_formats.is_empty(), "{}", profile.key);
        }
    }

    #[test]
    fn test_free_defaults_differ_per_site() {
        assert!(profile_for(YOKOHAMA_CENTRAL_LIBRARY).unwrap().default_free);
        assert!(!profile_for(BLUE_NOTE_TOKYO).unwrap().default_free);
    }
}
