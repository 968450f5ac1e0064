use super::Storage;
use crate::domain::*;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    venues: HashMap<String, Venue>,
    categories: HashMap<String, Category>,
    tags: HashMap<String, Tag>,
    events: HashMap<Uuid, Event>,
    event_ids_by_external: HashMap<String, Uuid>,
    schedules: HashMap<(Uuid, NaiveDate), Schedule>,
    prices: HashMap<(Uuid, String), Price>,
    images: HashMap<(Uuid, String), Image>,
    links: HashMap<(Uuid, String), EventLink>,
    event_categories: HashSet<(Uuid, Uuid)>,
    event_tags: HashSet<(Uuid, Uuid)>,
}

/// In-memory storage implementation for development/testing.
///
/// All tables sit behind one lock, so every find-or-create is atomic.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| IngestError::storage("in-memory store lock poisoned"))
    }

    fn require_event(tables: &Tables, event_id: Uuid) -> Result<()> {
        if tables.events.contains_key(&event_id) {
            Ok(())
        } else {
            Err(IngestError::storage(format!("unknown event {}", event_id)))
        }
    }
}

fn sorted_by<T, K: Ord, F: Fn(&T) -> K>(mut rows: Vec<T>, key: F) -> Vec<T> {
    rows.sort_by_key(|r| key(r));
    rows
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn find_or_create_venue(&self, name: &str) -> Result<Venue> {
        let mut tables = self.tables()?;
        let venue = tables
            .venues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Created venue: {}", name);
                Venue {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    created_at: Utc::now(),
                }
            })
            .clone();
        Ok(venue)
    }

    async fn find_or_create_category(&self, name: &str) -> Result<Category> {
        let mut tables = self.tables()?;
        Ok(tables
            .categories
            .entry(name.to_string())
            .or_insert_with(|| Category {
                id: Uuid::new_v4(),
                name: name.to_string(),
            })
            .clone())
    }

    async fn find_or_create_tag(&self, name: &str) -> Result<Tag> {
        let mut tables = self.tables()?;
        Ok(tables
            .tags
            .entry(name.to_string())
            .or_insert_with(|| Tag {
                id: Uuid::new_v4(),
                name: name.to_string(),
            })
            .clone())
    }

    async fn get_event_by_external_id(&self, external_id: &str) -> Result<Option<Event>> {
        let tables = self.tables()?;
        Ok(tables
            .event_ids_by_external
            .get(external_id)
            .and_then(|id| tables.events.get(id))
            .cloned())
    }

    async fn create_event(&self, event: &mut Event) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.event_ids_by_external.contains_key(&event.external_id) {
            return Err(IngestError::DuplicateKey {
                entity: "event",
                key: event.external_id.clone(),
            });
        }
        let id = Uuid::new_v4();
        event.id = Some(id);
        tables
            .event_ids_by_external
            .insert(event.external_id.clone(), id);
        tables.events.insert(id, event.clone());

        debug!("Created event: {} with id {}", event.title, id);
        Ok(())
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let event_id = event
            .id
            .ok_or_else(|| IngestError::storage("Cannot update event without ID"))?;

        let mut tables = self.tables()?;
        let stored = tables
            .events
            .get_mut(&event_id)
            .ok_or_else(|| IngestError::storage(format!("unknown event {}", event_id)))?;
        if stored.external_id != event.external_id {
            return Err(IngestError::storage("external_id of a stored event cannot change"));
        }
        *stored = event.clone();

        debug!("Updated event: {} with id {}", event.title, event_id);
        Ok(())
    }

    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let mut tables = self.tables()?;
        Self::require_event(&tables, schedule.event_id)?;
        tables
            .schedules
            .insert((schedule.event_id, schedule.date), schedule.clone());
        Ok(())
    }

    async fn upsert_price(&self, price: &Price) -> Result<()> {
        let mut tables = self.tables()?;
        Self::require_event(&tables, price.event_id)?;
        tables
            .prices
            .insert((price.event_id, price.price_tier.clone()), price.clone());
        Ok(())
    }

    async fn upsert_image(&self, image: &Image) -> Result<()> {
        let mut tables = self.tables()?;
        Self::require_event(&tables, image.event_id)?;
        tables
            .images
            .insert((image.event_id, image.image_url.clone()), image.clone());
        Ok(())
    }

    async fn upsert_event_link(&self, link: &EventLink) -> Result<()> {
        let mut tables = self.tables()?;
        Self::require_event(&tables, link.event_id)?;
        tables
            .links
            .insert((link.event_id, link.url.clone()), link.clone());
        Ok(())
    }

    async fn attach_category(&self, event_id: Uuid, category_id: Uuid) -> Result<()> {
        let mut tables = self.tables()?;
        Self::require_event(&tables, event_id)?;
        tables.event_categories.insert((event_id, category_id));
        Ok(())
    }

    async fn attach_tag(&self, event_id: Uuid, tag_id: Uuid) -> Result<()> {
        let mut tables = self.tables()?;
        Self::require_event(&tables, event_id)?;
        tables.event_tags.insert((event_id, tag_id));
        Ok(())
    }

    async fn count_events(&self) -> Result<usize> {
        Ok(self.tables()?.events.len())
    }

    async fn get_all_venues(&self) -> Result<Vec<Venue>> {
        let tables = self.tables()?;
        let venues = tables.venues.values().cloned().collect();
        Ok(sorted_by(venues, |v: &Venue| v.name.clone()))
    }

    async fn get_schedules(&self, event_id: Uuid) -> Result<Vec<Schedule>> {
        let tables = self.tables()?;
        let rows = tables
            .schedules
            .values()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect();
        Ok(sorted_by(rows, |s: &Schedule| s.date))
    }

    async fn get_prices(&self, event_id: Uuid) -> Result<Vec<Price>> {
        let tables = self.tables()?;
        let rows = tables
            .prices
            .values()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect();
        Ok(sorted_by(rows, |p: &Price| p.price_tier.clone()))
    }

    async fn get_images(&self, event_id: Uuid) -> Result<Vec<Image>> {
        let tables = self.tables()?;
        let rows = tables
            .images
            .values()
            .filter(|i| i.event_id == event_id)
            .cloned()
            .collect();
        Ok(sorted_by(rows, |i: &Image| i.image_url.clone()))
    }

    async fn get_event_links(&self, event_id: Uuid) -> Result<Vec<EventLink>> {
        let tables = self.tables()?;
        let rows = tables
            .links
            .values()
            .filter(|l| l.event_id == event_id)
            .cloned()
            .collect();
        Ok(sorted_by(rows, |l: &EventLink| l.url.clone()))
    }

    async fn get_categories(&self, event_id: Uuid) -> Result<Vec<Category>> {
        let tables = self.tables()?;
        let rows = tables
            .categories
            .values()
            .filter(|c| tables.event_categories.contains(&(event_id, c.id)))
            .cloned()
            .collect();
        Ok(sorted_by(rows, |c: &Category| c.name.clone()))
    }

    async fn get_tags(&self, event_id: Uuid) -> Result<Vec<Tag>> {
        let tables = self.tables()?;
        let rows = tables
            .tags
            .values()
            .filter(|t| tables.event_tags.contains(&(event_id, t.id)))
            .cloned()
            .collect();
        Ok(sorted_by(rows, |t: &Tag| t.name.clone()))
    }
}
