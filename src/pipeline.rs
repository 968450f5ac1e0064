use crate::carpenter::Carpenter;
use crate::error::IngestError;
use crate::extraction::{ExtractionError, TextExtractor};
use crate::sites::TransformerDispatcher;
use crate::tasks::{DeadLetter, DeadLetterQueue};
use crate::types::{ChangeType, RawEventData, TransformerStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Where an ingested item is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    Received,
    IdComputed,
    ExtractionRequested,
    ExtractionSucceeded,
    ExtractionFailed,
    Normalized,
    Validated,
    Rejected,
    Upserted,
    PersistFailed,
    /// No transformer registered for the site key
    Unsupported,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Received => "received",
            ItemState::IdComputed => "id_computed",
            ItemState::ExtractionRequested => "extraction_requested",
            ItemState::ExtractionSucceeded => "extraction_succeeded",
            ItemState::ExtractionFailed => "extraction_failed",
            ItemState::Normalized => "normalized",
            ItemState::Validated => "validated",
            ItemState::Rejected => "rejected",
            ItemState::Upserted => "upserted",
            ItemState::PersistFailed => "persist_failed",
            ItemState::Unsupported => "unsupported",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::ExtractionFailed
                | ItemState::Rejected
                | ItemState::Upserted
                | ItemState::PersistFailed
                | ItemState::Unsupported
        )
    }
}

/// Final result of processing one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub site_key: String,
    pub external_id: Option<String>,
    pub state: ItemState,
    pub event_id: Option<Uuid>,
    pub change_type: Option<ChangeType>,
    pub error: Option<String>,
}

impl ItemOutcome {
    fn new(site_key: &str, external_id: Option<&str>, state: ItemState) -> Self {
        Self {
            site_key: site_key.to_string(),
            external_id: external_id.map(str::to_string),
            state,
            event_id: None,
            change_type: None,
            error: None,
        }
    }

    fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.state == ItemState::Upserted
    }
}

/// Runs one raw listing through id derivation, optional extraction,
/// normalization, validation and upsert. Never returns an error: every
/// failure ends in a terminal `ItemState`.
pub struct IngestPipeline {
    dispatcher: TransformerDispatcher,
    carpenter: Carpenter,
    extractor: Option<Arc<dyn TextExtractor>>,
    dead_letters: Arc<DeadLetterQueue>,
    extraction_timeout: Duration,
}

impl IngestPipeline {
    pub fn new(dispatcher: TransformerDispatcher, carpenter: Carpenter) -> Self {
        Self {
            dispatcher,
            carpenter,
            extractor: None,
            dead_letters: Arc::new(DeadLetterQueue::new()),
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Bound on one extraction call including all of its rate-limit retries
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn with_dead_letters(mut self, dead_letters: Arc<DeadLetterQueue>) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    pub fn dispatcher(&self) -> &TransformerDispatcher {
        &self.dispatcher
    }

    #[instrument(skip(self, raw), fields(site = %site_key))]
    pub async fn process(&self, site_key: &str, raw: &RawEventData) -> ItemOutcome {
        let start = Instant::now();
        let outcome = self.run(site_key, raw).await;

        metrics::counter!("ingest_items_total", "state" => outcome.state.as_str()).increment(1);
        metrics::histogram!("ingest_item_duration_seconds").record(start.elapsed().as_secs_f64());
        outcome
    }

    async fn run(&self, site_key: &str, raw: &RawEventData) -> ItemOutcome {
        debug!(state = ItemState::Received.as_str(), "Received item");

        let transformer = match self.dispatcher.resolve(site_key) {
            Ok(t) => t,
            Err(e) => {
                warn!("Dropping item: {}", e);
                return ItemOutcome::new(site_key, None, ItemState::Unsupported).with_error(e);
            }
        };

        let external_id = transformer.external_id(raw);
        debug!(state = ItemState::IdComputed.as_str(), external_id = %external_id, "Computed external id");

        let extracted = match transformer.extraction_prompt(raw) {
            None => None,
            Some(prompt) => {
                debug!(state = ItemState::ExtractionRequested.as_str(), external_id = %external_id);
                let result = self.extract(&prompt).await.and_then(|value| {
                    transformer
                        .split_extracted(value)
                        .map_err(IngestError::from)
                });
                match result {
                    Ok((event, additional)) => {
                        debug!(state = ItemState::ExtractionSucceeded.as_str(), external_id = %external_id);
                        if !additional.is_empty() {
                            self.dead_letter_additional(transformer.as_ref(), site_key, &external_id, raw, additional);
                        }
                        Some(event)
                    }
                    Err(e) => {
                        log_extraction_failure(&external_id, &e);
                        self.dead_letter(site_key, &external_id, raw, ItemState::ExtractionFailed, &e);
                        return ItemOutcome::new(site_key, Some(&external_id), ItemState::ExtractionFailed)
                            .with_error(e);
                    }
                }
            }
        };

        let canonical = transformer.normalize(raw, &external_id, extracted.as_ref());
        debug!(state = ItemState::Normalized.as_str(), external_id = %external_id);

        if let Err(e) = Carpenter::validate(&canonical) {
            warn!(
                state = ItemState::Rejected.as_str(),
                external_id = %external_id,
                title = %canonical.title,
                "Skipping invalid event: {}",
                e
            );
            return ItemOutcome::new(site_key, Some(&external_id), ItemState::Rejected).with_error(e);
        }
        debug!(state = ItemState::Validated.as_str(), external_id = %external_id);

        match self.carpenter.upsert(&canonical).await {
            Ok(upserted) => {
                info!(
                    state = ItemState::Upserted.as_str(),
                    external_id = %external_id,
                    change = upserted.change_type.as_str(),
                    "Upserted event: {}",
                    canonical.title
                );
                let mut outcome = ItemOutcome::new(site_key, Some(&external_id), ItemState::Upserted);
                outcome.event_id = Some(upserted.event_id);
                outcome.change_type = Some(upserted.change_type);
                outcome
            }
            Err(e) => {
                error!(
                    state = ItemState::PersistFailed.as_str(),
                    external_id = %external_id,
                    event = ?canonical,
                    "Failed to persist event: {}",
                    e
                );
                self.dead_letter(site_key, &external_id, raw, ItemState::PersistFailed, &e);
                ItemOutcome::new(site_key, Some(&external_id), ItemState::PersistFailed).with_error(e)
            }
        }
    }

    async fn extract(&self, prompt: &str) -> Result<Value, IngestError> {
        let extractor = self
            .extractor
            .as_ref()
            .ok_or(IngestError::Extraction(ExtractionError::NotConfigured))?;

        match tokio::time::timeout(self.extraction_timeout, extractor.extract(prompt)).await {
            Ok(result) => result.map_err(IngestError::from),
            Err(_) => Err(IngestError::Timeout(self.extraction_timeout)),
        }
    }

    fn dead_letter(
        &self,
        site_key: &str,
        external_id: &str,
        raw: &RawEventData,
        stage: ItemState,
        error: &IngestError,
    ) {
        self.dead_letters.push(DeadLetter::new(
            site_key,
            Some(external_id),
            raw.clone(),
            stage,
            error.to_string(),
        ));
    }

    /// Extra events in one extraction result are not upserted with the
    /// listing. Each is kept as its own dead letter, merged over the raw
    /// payload and keyed by its own id, so a requeue ingests it separately.
    fn dead_letter_additional(
        &self,
        transformer: &dyn TransformerStrategy,
        site_key: &str,
        external_id: &str,
        raw: &RawEventData,
        additional: Vec<Value>,
    ) {
        warn!(
            external_id,
            count = additional.len(),
            "Extraction described more than one event, dead-lettering the rest"
        );
        for entry in additional {
            let listing = overlay(raw, &entry);
            let entry_id = transformer.external_id(&listing);
            self.dead_letters.push(DeadLetter::new(
                site_key,
                Some(&entry_id),
                listing,
                ItemState::ExtractionSucceeded,
                format!("additional event in extraction result for {}", external_id),
            ));
        }
    }
}

fn overlay(raw: &RawEventData, entry: &Value) -> RawEventData {
    match (raw.as_object(), entry.as_object()) {
        (Some(base), Some(fields)) => {
            let mut merged = base.clone();
            merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Object(merged)
        }
        _ => entry.clone(),
    }
}

fn log_extraction_failure(external_id: &str, error: &IngestError) {
    let state = ItemState::ExtractionFailed.as_str();
    match error {
        IngestError::Extraction(ExtractionError::NoJson) => {
            warn!(state, external_id, "Extraction response contained no JSON object")
        }
        IngestError::Extraction(ExtractionError::NoEvent) => {
            warn!(state, external_id, "Extraction result described no event")
        }
        IngestError::Extraction(ExtractionError::MalformedJson(e)) => {
            warn!(state, external_id, "Extraction response contained malformed JSON: {}", e)
        }
        IngestError::Extraction(ExtractionError::RateLimitExhausted { attempts, waited_ms }) => {
            error!(state, external_id, attempts, waited_ms, "Extraction gave up on rate limiting")
        }
        other => error!(state, external_id, "Extraction failed: {}", other),
    }
}
