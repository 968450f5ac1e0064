use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A venue, shared across events and looked up by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted event, unique per external_id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<Uuid>,
    pub external_id: String,
    pub title: String,
    pub organization: String,
    pub description: Option<String>,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub venue_id: Option<Uuid>,
    pub program: Option<String>,
    pub sold_out: bool,
    pub free: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

/// Schedule row, unique per (event_id, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub event_id: Uuid,
    pub date: NaiveDate,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub special_notes: Option<String>,
    pub status: String,
}

/// Price row, unique per (event_id, price_tier)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub event_id: Uuid,
    pub price_tier: String,
    pub amount: Option<f64>,
    pub currency: String,
    pub discount_info: Option<String>,
}

/// Image row, unique per (event_id, image_url)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub event_id: Uuid,
    pub image_url: String,
    pub alt_text: Option<String>,
    pub is_featured: bool,
}

/// Link row, unique per (event_id, url)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLink {
    pub event_id: Uuid,
    pub url: String,
    pub link_type: String,
}
