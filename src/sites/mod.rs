// Per-site transformers and the dispatcher that selects them

pub mod direct;
pub mod extracting;
pub mod profiles;

use crate::error::{IngestError, Result};
use crate::external_id::IdField;
use crate::types::TransformerStrategy;
use std::collections::HashMap;
use std::sync::Arc;

pub use direct::DirectTransformer;
pub use extracting::ExtractingTransformer;

/// Raw field names a site uses for each canonical field, most specific first
#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub title: &'static [&'static str],
    pub date_start: &'static [&'static str],
    pub date_end: &'static [&'static str],
    pub time_start: &'static [&'static str],
    pub time_end: &'static [&'static str],
    pub venue: &'static [&'static str],
    pub event_link: &'static [&'static str],
    pub description: &'static [&'static str],
    pub organization: &'static [&'static str],
    pub program: &'static [&'static str],
    pub sold_out: &'static [&'static str],
    pub free: &'static [&'static str],
    pub image: &'static [&'static str],
    pub images: &'static [&'static str],
    pub prices: &'static [&'static str],
    pub schedule: &'static [&'static str],
    pub categories: &'static [&'static str],
    pub tags: &'static [&'static str],
}

pub const DEFAULT_ALIASES: FieldAliases = FieldAliases {
    title: &["title", "name", "event_name"],
    date_start: &["date_start", "start_date", "date"],
    date_end: &["date_end", "end_date"],
    time_start: &["time_start", "start_time", "open_time"],
    time_end: &["time_end", "end_time", "close_time"],
    venue: &["venue", "venue_name", "place"],
    event_link: &["event_link", "url", "link"],
    description: &["description", "summary", "body"],
    organization: &["organization", "organizer"],
    program: &["program", "programme", "setlist"],
    sold_out: &["sold_out", "soldout"],
    free: &["free", "is_free"],
    image: &["image_url", "image", "thumbnail"],
    images: &["images", "gallery"],
    prices: &["prices", "price", "ticket_prices"],
    schedule: &["schedule", "schedules", "performances"],
    categories: &["categories", "category", "genre"],
    tags: &["tags", "keywords"],
};

/// Whether a site's fields are mapped directly or extracted upstream first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Direct,
    Upstream,
}

/// What to use as the venue when the payload names none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueFallback {
    Organization,
    Fixed(&'static str),
    None,
}

/// Per-site configuration data. Everything that differs between sites lives here.
#[derive(Debug)]
pub struct SiteProfile {
    pub key: &'static str,
    pub organization: &'static str,
    pub mode: ExtractionMode,
    pub id_fields: &'static [IdField],
    pub aliases: FieldAliases,
    pub date_formats: &'static [&'static str],
    pub default_free: bool,
    pub currency: &'static str,
    pub placeholder_image: &'static str,
    pub venue_fallback: VenueFallback,
    pub link_type: &'static str,
    pub default_categories: &'static [&'static str],
    /// Site-specific notes appended to the extraction prompt
    pub prompt_notes: &'static str,
}

impl SiteProfile {
    /// Venue to use when the payload names none
    pub fn fallback_venue(&self, organization: &str) -> Option<String> {
        match self.venue_fallback {
            VenueFallback::Organization => Some(organization.to_string()),
            VenueFallback::Fixed(name) => Some(name.to_string()),
            VenueFallback::None => None,
        }
    }
}

/// Registry mapping site keys to transformer strategies
pub struct TransformerDispatcher {
    transformers: HashMap<String, Arc<dyn TransformerStrategy>>,
}

impl Default for TransformerDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformerDispatcher {
    /// Create a dispatcher with every built-in site registered
    pub fn new() -> Self {
        let mut dispatcher = Self::empty();
        for profile in profiles::PROFILES {
            let transformer: Arc<dyn TransformerStrategy> = match profile.mode {
                ExtractionMode::Direct => Arc::new(DirectTransformer::new(profile)),
                ExtractionMode::Upstream => Arc::new(ExtractingTransformer::new(profile)),
            };
            dispatcher.register(transformer);
        }
        dispatcher
    }

    pub fn empty() -> Self {
        Self {
            transformers: HashMap::new(),
        }
    }

    /// Register a transformer under its own site key, replacing any previous one
    pub fn register(&mut self, transformer: Arc<dyn TransformerStrategy>) {
        self.transformers
            .insert(transformer.site_key().to_string(), transformer);
    }

    /// Resolve a site key; unknown keys are an explicit `UnsupportedSite` error
    pub fn resolve(&self, site_key: &str) -> Result<Arc<dyn TransformerStrategy>> {
        self.transformers
            .get(site_key)
            .cloned()
            .ok_or_else(|| IngestError::UnsupportedSite(site_key.to_string()))
    }

    /// List all registered site keys, sorted
    pub fn list_sites(&self) -> Vec<&str> {
        let mut sites: Vec<&str> = self.transformers.keys().map(|k| k.as_str()).collect();
        sites.sort_unstable();
        sites
    }
}
