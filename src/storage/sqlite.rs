use super::Storage;
use crate::domain::*;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = r#"
    PRAGMA foreign_keys=ON;
    CREATE TABLE IF NOT EXISTS venues (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE,
        created_at  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS categories (
        id    TEXT PRIMARY KEY,
        name  TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS tags (
        id    TEXT PRIMARY KEY,
        name  TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS events (
        id            TEXT PRIMARY KEY,
        external_id   TEXT NOT NULL UNIQUE,
        title         TEXT NOT NULL,
        organization  TEXT NOT NULL,
        description   TEXT,
        date_start    TEXT NOT NULL,
        date_end      TEXT NOT NULL,
        venue_id      TEXT REFERENCES venues(id),
        program       TEXT,
        sold_out      INTEGER NOT NULL,
        free          INTEGER NOT NULL,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS schedules (
        event_id       TEXT NOT NULL REFERENCES events(id),
        date           TEXT NOT NULL,
        time_start     TEXT,
        time_end       TEXT,
        special_notes  TEXT,
        status         TEXT NOT NULL,
        PRIMARY KEY (event_id, date)
    );
    CREATE TABLE IF NOT EXISTS prices (
        event_id       TEXT NOT NULL REFERENCES events(id),
        price_tier     TEXT NOT NULL,
        amount         REAL,
        currency       TEXT NOT NULL,
        discount_info  TEXT,
        PRIMARY KEY (event_id, price_tier)
    );
    CREATE TABLE IF NOT EXISTS images (
        event_id     TEXT NOT NULL REFERENCES events(id),
        image_url    TEXT NOT NULL,
        alt_text     TEXT,
        is_featured  INTEGER NOT NULL,
        PRIMARY KEY (event_id, image_url)
    );
    CREATE TABLE IF NOT EXISTS event_links (
        event_id   TEXT NOT NULL REFERENCES events(id),
        url        TEXT NOT NULL,
        link_type  TEXT NOT NULL,
        PRIMARY KEY (event_id, url)
    );
    CREATE TABLE IF NOT EXISTS event_categories (
        event_id     TEXT NOT NULL REFERENCES events(id),
        category_id  TEXT NOT NULL REFERENCES categories(id),
        PRIMARY KEY (event_id, category_id)
    );
    CREATE TABLE IF NOT EXISTS event_tags (
        event_id  TEXT NOT NULL REFERENCES events(id),
        tag_id    TEXT NOT NULL REFERENCES tags(id),
        PRIMARY KEY (event_id, tag_id)
    );
"#;

/// SQLite-backed store. Natural keys are enforced by UNIQUE / PRIMARY KEY
/// constraints and every write goes through `ON CONFLICT`. Statements run
/// on the blocking pool, one at a time behind the connection lock.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!("Opened SQLite store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| IngestError::storage("SQLite connection lock poisoned"))?;
            func(&guard)
        })
        .await
        .map_err(|e| IngestError::storage(format!("SQLite task failed: {}", e)))?
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, e))
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Uuid::parse_str(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn date_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: Some(uuid_col(row, 0)?),
        external_id: row.get(1)?,
        title: row.get(2)?,
        organization: row.get(3)?,
        description: row.get(4)?,
        date_start: date_col(row, 5)?,
        date_end: date_col(row, 6)?,
        venue_id: opt_uuid_col(row, 7)?,
        program: row.get(8)?,
        sold_out: row.get(9)?,
        free: row.get(10)?,
        created_at: timestamp_col(row, 11)?,
        updated_at: timestamp_col(row, 12)?,
    })
}

fn named_from_row(row: &Row<'_>) -> rusqlite::Result<(Uuid, String)> {
    Ok((uuid_col(row, 0)?, row.get(1)?))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn find_or_create_venue(&self, name: &str) -> Result<Venue> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO venues (id, name, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO NOTHING",
                params![Uuid::new_v4().to_string(), name, Utc::now().to_rfc3339()],
            )?;
            if inserted > 0 {
                debug!("Created venue: {}", name);
            }
            let venue = conn.query_row(
                "SELECT id, name, created_at FROM venues WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Venue {
                        id: uuid_col(row, 0)?,
                        name: row.get(1)?,
                        created_at: timestamp_col(row, 2)?,
                    })
                },
            )?;
            Ok(venue)
        })
        .await
    }

    async fn find_or_create_category(&self, name: &str) -> Result<Category> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO categories (id, name) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
                params![Uuid::new_v4().to_string(), name],
            )?;
            let (id, name) = conn.query_row(
                "SELECT id, name FROM categories WHERE name = ?1",
                params![name],
                named_from_row,
            )?;
            Ok(Category { id, name })
        })
        .await
    }

    async fn find_or_create_tag(&self, name: &str) -> Result<Tag> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tags (id, name) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
                params![Uuid::new_v4().to_string(), name],
            )?;
            let (id, name) = conn.query_row(
                "SELECT id, name FROM tags WHERE name = ?1",
                params![name],
                named_from_row,
            )?;
            Ok(Tag { id, name })
        })
        .await
    }

    async fn get_event_by_external_id(&self, external_id: &str) -> Result<Option<Event>> {
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            let event = conn
                .query_row(
                    "SELECT id, external_id, title, organization, description, date_start, date_end,
                            venue_id, program, sold_out, free, created_at, updated_at
                     FROM events WHERE external_id = ?1",
                    params![external_id],
                    event_from_row,
                )
                .optional()?;
            Ok(event)
        })
        .await
    }

    async fn create_event(&self, event: &mut Event) -> Result<()> {
        let id = Uuid::new_v4();
        let row = event.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO events (id, external_id, title, organization, description, date_start,
                                     date_end, venue_id, program, sold_out, free, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(external_id) DO NOTHING",
                params![
                    id.to_string(),
                    row.external_id,
                    row.title,
                    row.organization,
                    row.description,
                    date_text(row.date_start),
                    date_text(row.date_end),
                    row.venue_id.map(|v| v.to_string()),
                    row.program,
                    row.sold_out,
                    row.free,
                    row.created_at.to_rfc3339(),
                    row.updated_at.to_rfc3339(),
                ],
            )?;
            if inserted == 0 {
                return Err(IngestError::DuplicateKey {
                    entity: "event",
                    key: row.external_id,
                });
            }
            Ok(())
        })
        .await?;
        event.id = Some(id);
        debug!("Created event: {} with id {}", event.title, id);
        Ok(())
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let event_id = event
            .id
            .ok_or_else(|| IngestError::storage("Cannot update event without ID"))?;
        let row = event.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE events SET title = ?3, organization = ?4, description = ?5, date_start = ?6,
                                   date_end = ?7, venue_id = ?8, program = ?9, sold_out = ?10,
                                   free = ?11, updated_at = ?12
                 WHERE id = ?1 AND external_id = ?2",
                params![
                    event_id.to_string(),
                    row.external_id,
                    row.title,
                    row.organization,
                    row.description,
                    date_text(row.date_start),
                    date_text(row.date_end),
                    row.venue_id.map(|v| v.to_string()),
                    row.program,
                    row.sold_out,
                    row.free,
                    row.updated_at.to_rfc3339(),
                ],
            )?;
            if updated == 0 {
                return Err(IngestError::storage(format!(
                    "no event {} with external_id {}",
                    event_id, row.external_id
                )));
            }
            Ok(())
        })
        .await?;
        debug!("Updated event: {} with id {}", event.title, event_id);
        Ok(())
    }

    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let schedule = schedule.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO schedules (event_id, date, time_start, time_end, special_notes, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(event_id, date) DO UPDATE SET
                    time_start = excluded.time_start,
                    time_end = excluded.time_end,
                    special_notes = excluded.special_notes,
                    status = excluded.status",
                params![
                    schedule.event_id.to_string(),
                    date_text(schedule.date),
                    schedule.time_start,
                    schedule.time_end,
                    schedule.special_notes,
                    schedule.status,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_price(&self, price: &Price) -> Result<()> {
        let price = price.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO prices (event_id, price_tier, amount, currency, discount_info)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(event_id, price_tier) DO UPDATE SET
                    amount = excluded.amount,
                    currency = excluded.currency,
                    discount_info = excluded.discount_info",
                params![
                    price.event_id.to_string(),
                    price.price_tier,
                    price.amount,
                    price.currency,
                    price.discount_info,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_image(&self, image: &Image) -> Result<()> {
        let image = image.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO images (event_id, image_url, alt_text, is_featured)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(event_id, image_url) DO UPDATE SET
                    alt_text = excluded.alt_text,
                    is_featured = excluded.is_featured",
                params![
                    image.event_id.to_string(),
                    image.image_url,
                    image.alt_text,
                    image.is_featured,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_event_link(&self, link: &EventLink) -> Result<()> {
        let link = link.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO event_links (event_id, url, link_type) VALUES (?1, ?2, ?3)
                 ON CONFLICT(event_id, url) DO UPDATE SET link_type = excluded.link_type",
                params![link.event_id.to_string(), link.url, link.link_type],
            )?;
            Ok(())
        })
        .await
    }

    async fn attach_category(&self, event_id: Uuid, category_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO event_categories (event_id, category_id) VALUES (?1, ?2)
                 ON CONFLICT DO NOTHING",
                params![event_id.to_string(), category_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn attach_tag(&self, event_id: Uuid, tag_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO event_tags (event_id, tag_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
                params![event_id.to_string(), tag_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_events(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn get_all_venues(&self) -> Result<Vec<Venue>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, created_at FROM venues ORDER BY name")?;
            let venues = stmt
                .query_map([], |row| {
                    Ok(Venue {
                        id: uuid_col(row, 0)?,
                        name: row.get(1)?,
                        created_at: timestamp_col(row, 2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(venues)
        })
        .await
    }

    async fn get_schedules(&self, event_id: Uuid) -> Result<Vec<Schedule>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, date, time_start, time_end, special_notes, status
                 FROM schedules WHERE event_id = ?1 ORDER BY date",
            )?;
            let rows = stmt
                .query_map(params![event_id.to_string()], |row| {
                    Ok(Schedule {
                        event_id: uuid_col(row, 0)?,
                        date: date_col(row, 1)?,
                        time_start: row.get(2)?,
                        time_end: row.get(3)?,
                        special_notes: row.get(4)?,
                        status: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_prices(&self, event_id: Uuid) -> Result<Vec<Price>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, price_tier, amount, currency, discount_info
                 FROM prices WHERE event_id = ?1 ORDER BY price_tier",
            )?;
            let rows = stmt
                .query_map(params![event_id.to_string()], |row| {
                    Ok(Price {
                        event_id: uuid_col(row, 0)?,
                        price_tier: row.get(1)?,
                        amount: row.get(2)?,
                        currency: row.get(3)?,
                        discount_info: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_images(&self, event_id: Uuid) -> Result<Vec<Image>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, image_url, alt_text, is_featured
                 FROM images WHERE event_id = ?1 ORDER BY image_url",
            )?;
            let rows = stmt
                .query_map(params![event_id.to_string()], |row| {
                    Ok(Image {
                        event_id: uuid_col(row, 0)?,
                        image_url: row.get(1)?,
                        alt_text: row.get(2)?,
                        is_featured: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_event_links(&self, event_id: Uuid) -> Result<Vec<EventLink>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, url, link_type FROM event_links WHERE event_id = ?1 ORDER BY url",
            )?;
            let rows = stmt
                .query_map(params![event_id.to_string()], |row| {
                    Ok(EventLink {
                        event_id: uuid_col(row, 0)?,
                        url: row.get(1)?,
                        link_type: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_categories(&self, event_id: Uuid) -> Result<Vec<Category>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name FROM categories c
                 JOIN event_categories ec ON ec.category_id = c.id
                 WHERE ec.event_id = ?1 ORDER BY c.name",
            )?;
            let rows = stmt
                .query_map(params![event_id.to_string()], named_from_row)?
                .map(|r| r.map(|(id, name)| Category { id, name }))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_tags(&self, event_id: Uuid) -> Result<Vec<Tag>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name FROM tags t
                 JOIN event_tags et ON et.tag_id = t.id
                 WHERE et.event_id = ?1 ORDER BY t.name",
            )?;
            let rows = stmt
                .query_map(params![event_id.to_string()], named_from_row)?
                .map(|r| r.map(|(id, name)| Tag { id, name }))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(external_id: &str) -> Event {
        let now = Utc::now();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        Event {
            id: None,
            external_id: external_id.to_string(),
            title: "Jazz Night".to_string(),
            organization: "Forum".to_string(),
            description: Some("Quartet".to_string()),
            date_start: day,
            date_end: day,
            venue_id: None,
            program: None,
            sold_out: false,
            free: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_event_roundtrip_and_duplicate() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let venue = storage.find_or_create_venue("Hall X").await.unwrap();
        let mut e = event("ext-1");
        e.venue_id = Some(venue.id);
        storage.create_event(&mut e).await.unwrap();

        let loaded = storage.get_event_by_external_id("ext-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, e.id);
        assert_eq!(loaded.venue_id, Some(venue.id));
        assert_eq!(loaded.description.as_deref(), Some("Quartet"));
        assert!(loaded.free);

        let err = storage.create_event(&mut event("ext-1")).await.unwrap_err();
        assert!(matches!(err, IngestError::DuplicateKey { .. }));
        assert_eq!(storage.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let a = storage.find_or_create_venue("Hall X").await.unwrap();
        let b = storage.find_or_create_venue("Hall X").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(storage.get_all_venues().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_children_upsert_by_natural_key() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut e = event("ext-2");
        storage.create_event(&mut e).await.unwrap();
        let event_id = e.id.unwrap();

        for notes in [None, Some("Doors 18:00".to_string())] {
            storage
                .upsert_schedule(&Schedule {
                    event_id,
                    date: e.date_start,
                    time_start: Some("19:00".into()),
                    time_end: None,
                    special_notes: notes,
                    status: "upcoming".into(),
                })
                .await
                .unwrap();
        }
        let tag = storage.find_or_create_tag("A").await.unwrap();
        storage.attach_tag(event_id, tag.id).await.unwrap();
        storage.attach_tag(event_id, tag.id).await.unwrap();

        let schedules = storage.get_schedules(event_id).await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].special_notes.as_deref(), Some("Doors 18:00"));
        assert_eq!(storage.get_tags(event_id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_find_or_create_shares_one_row() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.find_or_create_venue("Hall X").await })
            })
            .collect();
        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap().id);
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(storage.get_all_venues().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db").join("events.db");
        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.create_event(&mut event("ext-3")).await.unwrap();
        }
        let storage = SqliteStorage::open(&path).unwrap();
        assert!(storage.get_event_by_external_id("ext-3").await.unwrap().is_some());
    }
}
