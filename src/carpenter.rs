use crate::constants::DEFAULT_SCHEDULE_STATUS;
use crate::domain::{Event, EventLink, Image, Price, Schedule};
use crate::error::{IngestError, Result};
use crate::storage::Storage;
use crate::types::{CanonicalEvent, ChangeType};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Reference to the persisted event produced by one upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub event_id: Uuid,
    pub external_id: String,
    pub venue_id: Option<Uuid>,
    pub change_type: ChangeType,
}

/// Scalar fields of a canonical event after validation
struct ValidatedEvent<'a> {
    canonical: &'a CanonicalEvent,
    date_start: NaiveDate,
    date_end: NaiveDate,
}

/// Upsert engine: turns canonical events into persisted rows, keyed by external_id
pub struct Carpenter {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for Carpenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Carpenter")
            .field("storage", &"<Arc<dyn Storage>>")
            .finish()
    }
}

impl Carpenter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Check required fields without touching the store
    pub fn validate(event: &CanonicalEvent) -> Result<()> {
        Self::validated(event).map(|_| ())
    }

    fn validated(event: &CanonicalEvent) -> Result<ValidatedEvent<'_>> {
        if event.external_id.trim().is_empty() {
            return Err(IngestError::validation("external_id", "must not be empty"));
        }
        if event.title.trim().is_empty() {
            return Err(IngestError::validation("title", "must not be empty"));
        }
        let date_start = event
            .date_start
            .ok_or_else(|| IngestError::validation("date_start", "missing or unparseable"))?;
        let date_end = event
            .date_end
            .ok_or_else(|| IngestError::validation("date_end", "missing or unparseable"))?;
        if date_start > date_end {
            return Err(IngestError::validation(
                "date_end",
                format!("{} is before date_start {}", date_end, date_start),
            ));
        }
        Ok(ValidatedEvent {
            canonical: event,
            date_start,
            date_end,
        })
    }

    /// Persist one canonical event: venue, event row, then child collections.
    ///
    /// Children are reconciled additively; rows from earlier ingests are never
    /// removed.
    #[instrument(skip(self, event), fields(external_id = %event.external_id, site = %event.site_key))]
    pub async fn upsert(&self, event: &CanonicalEvent) -> Result<UpsertOutcome> {
        let validated = Self::validated(event)?;

        let venue_id = self.process_venue(event.venue.as_deref()).await?;
        let (event_id, change_type) = self.process_event(&validated, venue_id).await?;

        self.reconcile_children(event_id, event).await.map_err(|e| {
            error!(
                event_id = %event_id,
                schedules = ?event.schedule,
                prices = ?event.prices,
                images = ?event.images,
                categories = ?event.categories,
                tags = ?event.tags,
                link = ?event.event_link,
                "Failed to reconcile child rows: {}",
                e
            );
            e
        })?;

        metrics::counter!("ingest_upserts_total", "change" => change_type.as_str()).increment(1);

        Ok(UpsertOutcome {
            event_id,
            external_id: event.external_id.clone(),
            venue_id,
            change_type,
        })
    }

    async fn process_venue(&self, venue: Option<&str>) -> Result<Option<Uuid>> {
        let name = match venue.map(str::trim).filter(|v| !v.is_empty()) {
            Some(name) => name,
            None => {
                debug!("No venue name, continuing without venue");
                return Ok(None);
            }
        };
        let venue = self.storage.find_or_create_venue(name).await.map_err(|e| {
            error!(venue = name, "Failed to resolve venue: {}", e);
            e
        })?;
        Ok(Some(venue.id))
    }

    async fn process_event(
        &self,
        validated: &ValidatedEvent<'_>,
        venue_id: Option<Uuid>,
    ) -> Result<(Uuid, ChangeType)> {
        let external_id = &validated.canonical.external_id;

        if let Some(existing) = self.storage.get_event_by_external_id(external_id).await? {
            return self.update_existing(existing, validated, venue_id).await;
        }

        let now = Utc::now();
        let mut new_event = Event {
            id: None,
            external_id: external_id.clone(),
            title: String::new(),
            organization: String::new(),
            description: None,
            date_start: validated.date_start,
            date_end: validated.date_end,
            venue_id,
            program: None,
            sold_out: false,
            free: false,
            created_at: now,
            updated_at: now,
        };
        apply_scalars(&mut new_event, validated, venue_id);

        match self.storage.create_event(&mut new_event).await {
            Ok(()) => {
                let event_id = new_event
                    .id
                    .ok_or_else(|| IngestError::storage("store did not assign an event id"))?;
                info!(
                    "Created new event: {} ({}) on {}",
                    new_event.title, event_id, new_event.date_start
                );
                Ok((event_id, ChangeType::Created))
            }
            Err(IngestError::DuplicateKey { .. }) => {
                // Another worker created it between lookup and insert
                warn!("Event {} created concurrently, updating instead", external_id);
                let existing = self
                    .storage
                    .get_event_by_external_id(external_id)
                    .await?
                    .ok_or_else(|| {
                        IngestError::storage(format!("event {} vanished after conflict", external_id))
                    })?;
                self.update_existing(existing, validated, venue_id).await
            }
            Err(e) => {
                error!(event = ?new_event, "Failed to create event: {}", e);
                Err(e)
            }
        }
    }

    async fn update_existing(
        &self,
        existing: Event,
        validated: &ValidatedEvent<'_>,
        venue_id: Option<Uuid>,
    ) -> Result<(Uuid, ChangeType)> {
        let event_id = existing
            .id
            .ok_or_else(|| IngestError::storage("stored event has no id"))?;

        if !event_has_changes(&existing, validated, venue_id) {
            debug!("No changes needed for event: {} ({})", existing.title, event_id);
            return Ok((event_id, ChangeType::NoChange));
        }

        let mut updated = existing;
        apply_scalars(&mut updated, validated, venue_id);
        updated.updated_at = Utc::now();

        self.storage.update_event(&updated).await.map_err(|e| {
            error!(event = ?updated, "Failed to update event: {}", e);
            e
        })?;
        info!("Updated existing event: {} ({})", updated.title, event_id);
        Ok((event_id, ChangeType::Updated))
    }

    async fn reconcile_children(&self, event_id: Uuid, event: &CanonicalEvent) -> Result<()> {
        for entry in &event.schedule {
            self.storage
                .upsert_schedule(&Schedule {
                    event_id,
                    date: entry.date,
                    time_start: entry.time_start.clone(),
                    time_end: entry.time_end.clone(),
                    special_notes: entry.special_notes.clone(),
                    status: DEFAULT_SCHEDULE_STATUS.to_string(),
                })
                .await?;
        }

        for name in event.categories.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            let category = self.storage.find_or_create_category(name).await?;
            self.storage.attach_category(event_id, category.id).await?;
        }

        for name in event.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            let tag = self.storage.find_or_create_tag(name).await?;
            self.storage.attach_tag(event_id, tag.id).await?;
        }

        // A new featured image replaces the old one; the old row stays, unflagged
        if let Some(featured) = event.images.iter().find(|i| i.is_featured) {
            for stale in self.storage.get_images(event_id).await? {
                if stale.is_featured && stale.image_url != featured.image_url {
                    debug!("Unfeaturing previous image: {}", stale.image_url);
                    self.storage
                        .upsert_image(&Image {
                            is_featured: false,
                            ..stale
                        })
                        .await?;
                }
            }
        }

        for image in &event.images {
            self.storage
                .upsert_image(&Image {
                    event_id,
                    image_url: image.image_url.clone(),
                    alt_text: image.alt_text.clone(),
                    is_featured: image.is_featured,
                })
                .await?;
        }

        for price in &event.prices {
            self.storage
                .upsert_price(&Price {
                    event_id,
                    price_tier: price.price_tier.clone(),
                    amount: price.amount,
                    currency: price.currency.clone(),
                    discount_info: price.discount_info.clone(),
                })
                .await?;
        }

        match event.event_link.as_deref() {
            Some(url) => {
                self.storage
                    .upsert_event_link(&EventLink {
                        event_id,
                        url: url.to_string(),
                        link_type: event.link_type.clone(),
                    })
                    .await?;
            }
            None => debug!("No event link, skipping link upsert"),
        }

        Ok(())
    }
}

fn apply_scalars(event: &mut Event, validated: &ValidatedEvent<'_>, venue_id: Option<Uuid>) {
    let canonical = validated.canonical;
    event.title = canonical.title.trim().to_string();
    event.organization = canonical.organization.clone();
    event.description = canonical.description.clone();
    event.date_start = validated.date_start;
    event.date_end = validated.date_end;
    event.venue_id = venue_id;
    event.program = canonical.program.clone();
    event.sold_out = canonical.sold_out;
    event.free = canonical.free;
}

/// True when any persisted scalar differs from the incoming values
fn event_has_changes(existing: &Event, validated: &ValidatedEvent<'_>, venue_id: Option<Uuid>) -> bool {
    let canonical = validated.canonical;
    existing.title != canonical.title.trim()
        || existing.organization != canonical.organization
        || existing.description != canonical.description
        || existing.date_start != validated.date_start
        || existing.date_end != validated.date_end
        || existing.venue_id != venue_id
        || existing.program != canonical.program
        || existing.sold_out != canonical.sold_out
        || existing.free != canonical.free
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::{ImageEntry, PriceEntry, ScheduleEntry};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn canonical() -> CanonicalEvent {
        CanonicalEvent {
            external_id: "ext-1".into(),
            site_key: "test_site".into(),
            title: "Jazz Night".into(),
            organization: "Forum".into(),
            description: None,
            date_start: Some(day(1)),
            date_end: Some(day(1)),
            venue: Some("Hall X".into()),
            program: None,
            sold_out: false,
            free: true,
            event_link: None,
            link_type: "primary".into(),
            schedule: vec![ScheduleEntry {
                date: day(1),
                time_start: Some("19:00".into()),
                time_end: None,
                special_notes: None,
            }],
            categories: vec!["Music".into()],
            tags: vec!["A".into()],
            prices: vec![PriceEntry {
                price_tier: "General".into(),
                amount: Some(0.0),
                currency: "JPY".into(),
                discount_info: None,
            }],
            images: vec![ImageEntry {
                image_url: "https://example.com/a.jpg".into(),
                alt_text: Some("Jazz Night".into()),
                is_featured: true,
            }],
        }
    }

    fn carpenter() -> (Arc<InMemoryStorage>, Carpenter) {
        let storage = Arc::new(InMemoryStorage::new());
        (storage.clone(), Carpenter::new(storage))
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        let mut e = canonical();
        e.title = "  ".into();
        assert!(matches!(
            Carpenter::validate(&e),
            Err(IngestError::Validation { ref field, .. }) if field == "title"
        ));

        let mut e = canonical();
        e.date_end = None;
        assert!(Carpenter::validate(&e).is_err());

        let mut e = canonical();
        e.date_start = Some(day(3));
        assert!(Carpenter::validate(&e).is_err());

        let mut e = canonical();
        e.external_id = String::new();
        assert!(Carpenter::validate(&e).is_err());
    }

    #[tokio::test]
    async fn test_create_then_no_change_then_update() {
        let (storage, carpenter) = carpenter();

        let first = carpenter.upsert(&canonical()).await.unwrap();
        assert_eq!(first.change_type, ChangeType::Created);

        let second = carpenter.upsert(&canonical()).await.unwrap();
        assert_eq!(second.change_type, ChangeType::NoChange);
        assert_eq!(second.event_id, first.event_id);

        let mut changed = canonical();
        changed.description = Some("Late show".into());
        let third = carpenter.upsert(&changed).await.unwrap();
        assert_eq!(third.change_type, ChangeType::Updated);

        assert_eq!(storage.count_events().await.unwrap(), 1);
        let stored = storage.get_event_by_external_id("ext-1").await.unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("Late show"));
    }

    #[tokio::test]
    async fn test_missing_venue_is_not_fatal() {
        let (storage, carpenter) = carpenter();
        let mut e = canonical();
        e.venue = Some("   ".into());
        let outcome = carpenter.upsert(&e).await.unwrap();
        assert_eq!(outcome.venue_id, None);
        assert!(storage.get_all_venues().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_children_accumulate_across_ingests() {
        let (storage, carpenter) = carpenter();
        let first = carpenter.upsert(&canonical()).await.unwrap();

        let mut again = canonical();
        again.tags = vec!["B".into()];
        again.images = vec![ImageEntry {
            image_url: "https://example.com/b.jpg".into(),
            alt_text: None,
            is_featured: false,
        }];
        again.schedule.push(ScheduleEntry {
            date: day(1),
            time_start: Some("20:00".into()),
            time_end: None,
            special_notes: None,
        });
        carpenter.upsert(&again).await.unwrap();

        let tags: Vec<String> = storage
            .get_tags(first.event_id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(tags, vec!["A", "B"]);
        assert_eq!(storage.get_images(first.event_id).await.unwrap().len(), 2);

        let schedules = storage.get_schedules(first.event_id).await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].time_start.as_deref(), Some("20:00"));
        assert_eq!(schedules[0].status, "upcoming");
    }

    #[tokio::test]
    async fn test_changed_primary_image_keeps_one_featured() {
        let (storage, carpenter) = carpenter();
        let first = carpenter.upsert(&canonical()).await.unwrap();

        let mut again = canonical();
        again.images = vec![ImageEntry {
            image_url: "https://example.com/new.jpg".into(),
            alt_text: None,
            is_featured: true,
        }];
        carpenter.upsert(&again).await.unwrap();

        let images = storage.get_images(first.event_id).await.unwrap();
        assert_eq!(images.len(), 2);
        let featured: Vec<&str> = images
            .iter()
            .filter(|i| i.is_featured)
            .map(|i| i.image_url.as_str())
            .collect();
        assert_eq!(featured, vec!["https://example.com/new.jpg"]);
    }

    #[tokio::test]
    async fn test_link_upserted_when_present() {
        let (storage, carpenter) = carpenter();
        let mut e = canonical();
        e.event_link = Some("https://example.com/jazz".into());
        e.link_type = "official".into();
        let outcome = carpenter.upsert(&e).await.unwrap();

        let links = storage.get_event_links(outcome.event_id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, "official");
    }
}
