/// Site key constants to ensure consistency across the codebase.
/// These are the keys the dispatcher resolves and the queue carries.
pub const BLUE_NOTE_TOKYO: &str = "blue_note_tokyo";
pub const BILLBOARD_LIVE_OSAKA: &str = "billboard_live_osaka";
pub const COTTON_CLUB: &str = "cotton_club";
pub const SUNTORY_HALL: &str = "suntory_hall";
pub const TOKYO_OPERA_CITY: &str = "tokyo_opera_city";
pub const KYOTO_CONCERT_HALL: &str = "kyoto_concert_hall";
pub const FESTIVAL_HALL: &str = "festival_hall";
pub const SAPPORO_KITARA: &str = "sapporo_kitara";
pub const MORI_ART_MUSEUM: &str = "mori_art_museum";
pub const TOKYO_NATIONAL_MUSEUM: &str = "tokyo_national_museum";
pub const KANAZAWA_21C: &str = "kanazawa_21c";
pub const ZEPP_HANEDA: &str = "zepp_haneda";
pub const CLUB_QUATTRO: &str = "club_quattro";
pub const YOKOHAMA_CENTRAL_LIBRARY: &str = "yokohama_central_library";
pub const TOKYO_INTERNATIONAL_FORUM: &str = "tokyo_international_forum";

// Canonical defaults
pub const DEFAULT_CURRENCY: &str = "JPY";
pub const DEFAULT_PRICE_TIER: &str = "General";
pub const DEFAULT_SCHEDULE_STATUS: &str = "upcoming";
pub const LINK_TYPE_PRIMARY: &str = "primary";
pub const LINK_TYPE_OFFICIAL: &str = "official";
pub const DEFAULT_PLACEHOLDER_IMAGE: &str = "https://static.event-ingest.example/placeholder/event.png";

/// Time fields carrying this value (any case) are treated as unknown
pub const TIME_TBA: &str = "TBA";

// Upstream text generation
pub const DEFAULT_COMPLETIONS_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Get all supported site keys
pub fn get_supported_sites() -> Vec<&'static str> {
    vec![
        BLUE_NOTE_TOKYO,
        BILLBOARD_LIVE_OSAKA,
        COTTON_CLUB,
        SUNTORY_HALL,
        TOKYO_OPERA_CITY,
        KYOTO_CONCERT_HALL,
        FESTIVAL_HALL,
        SAPPORO_KITARA,
        MORI_ART_MUSEUM,
        TOKYO_NATIONAL_MUSEUM,
        KANAZAWA_21C,
        ZEPP_HANEDA,
        CLUB_QUATTRO,
        YOKOHAMA_CENTRAL_LIBRARY,
        TOKYO_INTERNATIONAL_FORUM,
    ]
}
