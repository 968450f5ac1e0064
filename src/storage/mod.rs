// Event store: trait plus in-memory and SQLite implementations

pub mod in_memory;
pub mod sqlite;

use crate::domain::*;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub use in_memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

/// Storage trait for persisting events and their child collections.
///
/// Every `find_or_create_*` and `upsert_*` must be atomic with respect to its
/// natural key: concurrent callers never produce two rows for one key.
#[async_trait]
pub trait Storage: Send + Sync {
    // Shared lookups
    async fn find_or_create_venue(&self, name: &str) -> Result<Venue>;
    async fn find_or_create_category(&self, name: &str) -> Result<Category>;
    async fn find_or_create_tag(&self, name: &str) -> Result<Tag>;

    // Event operations
    async fn get_event_by_external_id(&self, external_id: &str) -> Result<Option<Event>>;
    /// Insert a new event and assign its id. Fails with `IngestError::DuplicateKey`
    /// when the external_id is already stored.
    async fn create_event(&self, event: &mut Event) -> Result<()>;
    async fn update_event(&self, event: &Event) -> Result<()>;

    // Child collections, keyed by natural key
    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<()>;
    async fn upsert_price(&self, price: &Price) -> Result<()>;
    async fn upsert_image(&self, image: &Image) -> Result<()>;
    async fn upsert_event_link(&self, link: &EventLink) -> Result<()>;

    // Associations are only ever added
    async fn attach_category(&self, event_id: Uuid, category_id: Uuid) -> Result<()>;
    async fn attach_tag(&self, event_id: Uuid, tag_id: Uuid) -> Result<()>;

    // Queries
    async fn count_events(&self) -> Result<usize>;
    async fn get_all_venues(&self) -> Result<Vec<Venue>>;
    async fn get_schedules(&self, event_id: Uuid) -> Result<Vec<Schedule>>;
    async fn get_prices(&self, event_id: Uuid) -> Result<Vec<Price>>;
    async fn get_images(&self, event_id: Uuid) -> Result<Vec<Image>>;
    async fn get_event_links(&self, event_id: Uuid) -> Result<Vec<EventLink>>;
    async fn get_categories(&self, event_id: Uuid) -> Result<Vec<Category>>;
    async fn get_tags(&self, event_id: Uuid) -> Result<Vec<Tag>>;
}
