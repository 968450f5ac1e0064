use crate::extraction::ExtractionError;
use crate::sites::SiteProfile;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Raw event data as delivered by the scraper for one listing
pub type RawEventData = serde_json::Value;

/// Canonical event produced by normalization, handed once to the upsert engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub external_id: String,
    pub site_key: String,
    pub title: String,
    pub organization: String,
    pub description: Option<String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub venue: Option<String>,
    pub program: Option<String>,
    pub sold_out: bool,
    pub free: bool,
    pub event_link: Option<String>,
    pub link_type: String,
    pub schedule: Vec<ScheduleEntry>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub prices: Vec<PriceEntry>,
    pub images: Vec<ImageEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub date: NaiveDate,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub special_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub price_tier: String,
    pub amount: Option<f64>,
    pub currency: String,
    pub discount_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub image_url: String,
    pub alt_text: Option<String>,
    pub is_featured: bool,
}

/// Types of changes an upsert can make to the event row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Updated,
    NoChange,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::NoChange => "no_change",
        }
    }
}

/// Core trait that every per-site transformer implements
pub trait TransformerStrategy: Send + Sync {
    /// Site key this transformer is registered under
    fn site_key(&self) -> &'static str;

    /// Per-site configuration data
    fn profile(&self) -> &SiteProfile;

    /// Stable identifier for the real-world event occurrence
    fn external_id(&self, raw: &RawEventData) -> String;

    /// Prompt for the upstream extraction call, or None when the site's
    /// fields are mapped directly
    fn extraction_prompt(&self, _raw: &RawEventData) -> Option<String> {
        None
    }

    /// Split a decoded extraction result into the event for this listing and
    /// any further events it described. Fails when it describes none.
    fn split_extracted(
        &self,
        extracted: serde_json::Value,
    ) -> Result<(serde_json::Value, Vec<serde_json::Value>), ExtractionError> {
        Ok((extracted, Vec::new()))
    }

    /// Build the canonical event from the raw payload and, if extraction ran,
    /// the decoded extraction result
    fn normalize(
        &self,
        raw: &RawEventData,
        external_id: &str,
        extracted: Option<&serde_json::Value>,
    ) -> CanonicalEvent;
}
