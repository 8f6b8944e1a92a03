//! Bounded short-term memory and promotion to long-term records.
//!
//! Each scope (a room or a participant) owns a fixed number of slots. A new
//! entry is appended while there is room. A full buffer overwrites its
//! oldest already-processed slot, and a buffer whose slots are all
//! unprocessed refuses the insert with [`InsertOutcome::NeedsFlush`].
//! Promotion summarizes the unprocessed slots into durable
//! [`MemoryRecord`]s and marks them processed. They stay in place as
//! candidates for overwrite, so nothing is dropped before it has been
//! promoted.
//!
//! [`MemoryPipeline`] serializes every insert, promotion and deletion of a
//! scope behind one async lock, so a participant present in several rooms
//! can never be promoted twice for the same slots.

use crate::error::{Error, MemoryError, MemoryResult};
use crate::id::{RecordId, ScopeId};
use crate::llm::{GenerationProvider, GenerationRequest, SamplingParams};
use crate::queue::QueueRegistry;
use crate::safety::SafetyTier;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default slots per scope
pub const DEFAULT_CAPACITY: usize = 6;

/// One short-term memory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySlot {
    /// Remembered text
    pub content: String,
    /// Already promoted to long-term memory
    pub processed: bool,
    /// Owning scope
    pub scope: ScopeId,
    /// When this content was written
    pub created_at: DateTime<Utc>,
    seq: u64,
}

/// Result of inserting into a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored in a previously empty slot
    Appended {
        /// Slot index
        index: usize,
    },
    /// Replaced the oldest processed slot
    Overwrote {
        /// Slot index
        index: usize,
    },
    /// Every slot is unprocessed; promote before inserting again
    NeedsFlush,
}

/// Fixed-capacity short-term memory for one scope
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    scope: ScopeId,
    capacity: usize,
    slots: Vec<MemorySlot>,
    next_seq: u64,
}

impl MemoryBuffer {
    /// Create an empty buffer; capacity is at least one
    pub fn new(scope: ScopeId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            scope,
            capacity,
            slots: Vec::with_capacity(capacity),
            next_seq: 0,
        }
    }

    /// Owning scope
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Slot limit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current slots in index order
    pub fn slots(&self) -> &[MemorySlot] {
        &self.slots
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No slots occupied
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Full with nothing processed
    pub fn needs_flush(&self) -> bool {
        self.slots.len() >= self.capacity && self.slots.iter().all(|s| !s.processed)
    }

    /// Store an entry
    pub fn insert(&mut self, content: impl Into<String>) -> InsertOutcome {
        let seq = self.next_seq;
        let slot = MemorySlot {
            content: content.into(),
            processed: false,
            scope: self.scope.clone(),
            created_at: Utc::now(),
            seq,
        };

        if self.slots.len() < self.capacity {
            self.slots.push(slot);
            self.next_seq += 1;
            return InsertOutcome::Appended {
                index: self.slots.len() - 1,
            };
        }

        let oldest_processed = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.processed)
            .min_by_key(|(_, s)| s.seq)
            .map(|(i, _)| i);

        match oldest_processed {
            Some(index) => {
                self.slots[index] = slot;
                self.next_seq += 1;
                InsertOutcome::Overwrote { index }
            }
            None => InsertOutcome::NeedsFlush,
        }
    }

    /// Contents of unprocessed slots, oldest first
    pub fn unprocessed(&self) -> Vec<String> {
        let mut pending: Vec<&MemorySlot> = self.slots.iter().filter(|s| !s.processed).collect();
        pending.sort_by_key(|s| s.seq);
        pending.into_iter().map(|s| s.content.clone()).collect()
    }

    /// Mark every slot as promoted
    pub fn mark_all_processed(&mut self) {
        for slot in &mut self.slots {
            slot.processed = true;
        }
    }
}

/// Where a long-term record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Promotion requested by a caller
    Manual,
    /// Promotion forced by a full buffer
    Auto,
}

/// A durable fact produced by promotion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    id: RecordId,
    content: String,
    provenance: Provenance,
    scope: ScopeId,
    created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub(crate) fn new(content: String, provenance: Provenance, scope: ScopeId) -> Self {
        Self {
            id: RecordId::new(),
            content,
            provenance,
            scope,
            created_at: Utc::now(),
        }
    }

    /// Record id
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// The fact
    pub fn content(&self) -> &str {
        &self.content
    }

    /// How the record was produced
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Owning scope
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Turns short-term entries into durable facts
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize entries into zero or more facts
    async fn summarize(&self, scope: &ScopeId, entries: &[String]) -> MemoryResult<Vec<String>>;
}

/// Durable storage for long-term records
#[async_trait]
pub trait LongTermStore: Send + Sync {
    /// Append records
    async fn append(&self, records: Vec<MemoryRecord>) -> MemoryResult<()>;

    /// All records of a scope, oldest first
    async fn records(&self, scope: &ScopeId) -> MemoryResult<Vec<MemoryRecord>>;

    /// Remove a scope's records; returns how many were removed
    async fn delete_scope(&self, scope: &ScopeId) -> MemoryResult<usize>;
}

/// Long-term store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<ScopeId, Vec<MemoryRecord>>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LongTermStore for InMemoryStore {
    async fn append(&self, records: Vec<MemoryRecord>) -> MemoryResult<()> {
        let mut all = self.records.lock();
        for record in records {
            all.entry(record.scope.clone()).or_default().push(record);
        }
        Ok(())
    }

    async fn records(&self, scope: &ScopeId) -> MemoryResult<Vec<MemoryRecord>> {
        Ok(self.records.lock().get(scope).cloned().unwrap_or_default())
    }

    async fn delete_scope(&self, scope: &ScopeId) -> MemoryResult<usize> {
        Ok(self.records.lock().remove(scope).map_or(0, |r| r.len()))
    }
}

/// Summarizer backed by a generation provider
///
/// The model is asked for one fact per line; `NONE` means nothing worth
/// keeping. Calls go through the provider's strict-tier queue in `queues`,
/// so summaries share the rate budget of persona replies.
pub struct LlmSummarizer {
    provider: Arc<dyn GenerationProvider>,
    queues: Arc<QueueRegistry>,
    model: Option<String>,
    sampling: SamplingParams,
}

impl LlmSummarizer {
    /// Create a summarizer using the provider's default model
    pub fn new(provider: Arc<dyn GenerationProvider>, queues: Arc<QueueRegistry>) -> Self {
        Self {
            provider,
            queues,
            model: None,
            sampling: SamplingParams {
                temperature: 0.2,
                ..SamplingParams::default()
            },
        }
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn parse_facts(text: &str) -> Vec<String> {
        text.lines()
            .map(strip_list_marker)
            .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("none"))
            .map(str::to_string)
            .collect()
    }
}

/// Strip a leading bullet or `1.` / `1)` numbering
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim().trim_start_matches(&['-', '*', '•'][..]).trim_start();
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && line[digits..].starts_with(&['.', ')'][..]) {
        line[digits + 1..].trim()
    } else {
        line.trim()
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, scope: &ScopeId, entries: &[String]) -> MemoryResult<Vec<String>> {
        let listing = entries
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut request = GenerationRequest::new(listing)
            .with_system(
                "Extract durable facts worth remembering from these chat notes. \
                 Write one short fact per line with no numbering. \
                 Reply NONE if nothing is worth keeping.",
            )
            .with_sampling(self.sampling);
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }

        let provider = Arc::clone(&self.provider);
        let queue = self.queues.queue(provider.name(), SafetyTier::Strict);
        let response = queue
            .enqueue(
                move || async move { provider.generate(request).await.map_err(Error::from) },
                format!("summarize {scope}"),
            )
            .await
            .map_err(|e| MemoryError::Summarization {
                scope: scope.clone(),
                reason: e.to_string(),
            })?;
        if response.is_blocked() {
            return Err(MemoryError::Summarization {
                scope: scope.clone(),
                reason: format!(
                    "blocked: {}",
                    response.block_reason.unwrap_or_else(|| "safety".to_string())
                ),
            });
        }
        Ok(Self::parse_facts(&response.text))
    }
}

/// What happened to a recorded entry
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    /// Where the entry landed
    pub outcome: InsertOutcome,
    /// Records produced by a promotion this insert triggered
    pub promoted: Vec<MemoryRecord>,
}

struct ScopeState {
    buffer: MemoryBuffer,
    retired: bool,
}

type ScopeHandle = Arc<tokio::sync::Mutex<ScopeState>>;

/// Per-scope buffers plus promotion into a long-term store
pub struct MemoryPipeline {
    capacity: usize,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn LongTermStore>,
    scopes: Mutex<HashMap<ScopeId, ScopeHandle>>,
}

impl MemoryPipeline {
    /// Create a new pipeline
    pub fn new(capacity: usize, summarizer: Arc<dyn Summarizer>, store: Arc<dyn LongTermStore>) -> Self {
        Self {
            capacity,
            summarizer,
            store,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// The long-term store
    pub fn store(&self) -> &Arc<dyn LongTermStore> {
        &self.store
    }

    fn handle(&self, scope: &ScopeId) -> ScopeHandle {
        let mut scopes = self.scopes.lock();
        Arc::clone(scopes.entry(scope.clone()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(ScopeState {
                buffer: MemoryBuffer::new(scope.clone(), self.capacity),
                retired: false,
            }))
        }))
    }

    /// Store an entry, promoting first when the buffer needs a flush
    ///
    /// If promotion fails the entry is not stored and the buffer is left
    /// exactly as it was.
    pub async fn record(&self, scope: &ScopeId, content: impl Into<String>) -> MemoryResult<RecordOutcome> {
        let content = content.into();
        loop {
            let handle = self.handle(scope);
            let mut state = handle.lock().await;
            if state.retired {
                // Deleted while we waited; pick up the fresh scope
                continue;
            }

            match state.buffer.insert(content.clone()) {
                InsertOutcome::NeedsFlush => {
                    debug!(%scope, "memory buffer full, promoting");
                    let promoted = self.promote(&mut state.buffer, Provenance::Auto).await?;
                    let outcome = state.buffer.insert(content);
                    return Ok(RecordOutcome { outcome, promoted });
                }
                outcome => {
                    return Ok(RecordOutcome {
                        outcome,
                        promoted: Vec::new(),
                    });
                }
            }
        }
    }

    /// Promote a scope's unprocessed entries on demand
    pub async fn flush(&self, scope: &ScopeId) -> MemoryResult<Vec<MemoryRecord>> {
        let handle = self.handle(scope);
        let mut state = handle.lock().await;
        if state.retired {
            return Ok(Vec::new());
        }
        self.promote(&mut state.buffer, Provenance::Manual).await
    }

    /// Drop a scope's buffer and long-term records
    ///
    /// Waits for any insert or promotion in flight on the scope.
    pub async fn delete_scope(&self, scope: &ScopeId) -> MemoryResult<usize> {
        let existing = self.scopes.lock().get(scope).cloned();
        let Some(handle) = existing else {
            return self.store.delete_scope(scope).await;
        };

        let mut state = handle.lock().await;
        let removed = self.store.delete_scope(scope).await?;
        state.retired = true;
        {
            let mut scopes = self.scopes.lock();
            if scopes.get(scope).is_some_and(|h| Arc::ptr_eq(h, &handle)) {
                scopes.remove(scope);
            }
        }
        info!(%scope, removed, "memory scope deleted");
        Ok(removed)
    }

    /// Copy of a scope's current slots
    pub async fn slots(&self, scope: &ScopeId) -> Vec<MemorySlot> {
        let handle = self.handle(scope);
        let state = handle.lock().await;
        state.buffer.slots().to_vec()
    }

    /// Recent long-term facts followed by unpromoted entries
    pub async fn recall(&self, scope: &ScopeId, limit: usize) -> MemoryResult<Vec<String>> {
        let records = self.store.records(scope).await?;
        let skip = records.len().saturating_sub(limit);
        let mut lines: Vec<String> = records.into_iter().skip(skip).map(|r| r.content).collect();

        let handle = self.handle(scope);
        let state = handle.lock().await;
        lines.extend(state.buffer.unprocessed());
        Ok(lines)
    }

    async fn promote(&self, buffer: &mut MemoryBuffer, provenance: Provenance) -> MemoryResult<Vec<MemoryRecord>> {
        let entries = buffer.unprocessed();
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let facts = match self.summarizer.summarize(buffer.scope(), &entries).await {
            Ok(facts) => facts,
            Err(err) => {
                warn!(scope = %buffer.scope(), error = %err, "promotion failed, slots kept");
                return Err(err);
            }
        };
        let records: Vec<MemoryRecord> = facts
            .into_iter()
            .map(|fact| MemoryRecord::new(fact, provenance, buffer.scope().clone()))
            .collect();
        self.store.append(records.clone()).await?;
        buffer.mark_all_processed();

        info!(
            scope = %buffer.scope(),
            ?provenance,
            entries = entries.len(),
            records = records.len(),
            "memory promoted"
        );
        Ok(records)
    }
}

impl std::fmt::Debug for MemoryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPipeline")
            .field("capacity", &self.capacity)
            .field("scopes", &self.scopes.lock().len())
            .finish()
    }
}
