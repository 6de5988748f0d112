//! Action cache: persisted execution traces keyed by step fingerprint.
//!
//! The cache is advisory, never authoritative. A hit lets a run skip the
//! planner entirely; a replay failure invalidates the entry and falls back
//! to one fresh planning pass. Entries are written only after the owning
//! test passes, so a broken trace is never persisted half-built.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::CacheIoError;

/// Tool names the planner may emit and the executor can map to a driver
/// effect. The capability profile decides which subset is permitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    Navigate,
    Click,
    TypeText,
    Scroll,
    WaitFor,
    ExtractText,
    Hover,
    MouseMove,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Navigate => "navigate",
            ToolName::Click => "click",
            ToolName::TypeText => "type_text",
            ToolName::Scroll => "scroll",
            ToolName::WaitFor => "wait_for",
            ToolName::ExtractText => "extract_text",
            ToolName::Hover => "hover",
            ToolName::MouseMove => "mouse_move",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "navigate" => Some(ToolName::Navigate),
            "click" => Some(ToolName::Click),
            "type_text" => Some(ToolName::TypeText),
            "scroll" => Some(ToolName::Scroll),
            "wait_for" => Some(ToolName::WaitFor),
            "extract_text" => Some(ToolName::ExtractText),
            "hover" => Some(ToolName::Hover),
            "mouse_move" => Some(ToolName::MouseMove),
            _ => None,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned action: either a named tool invocation with structured input
/// or a terminal textual judgment. Exactly one shape, never a hybrid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheAction {
    ToolUse { tool: ToolName, input: Value },
    Text { message: String },
}

/// One recorded planner turn. `action: None` denotes a turn that required
/// no tool invocation (pure assertion check). Appended only, never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheStep {
    pub reasoning: String,
    pub action: Option<CacheAction>,
    pub timestamp: i64,
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,
}

impl CacheStep {
    pub fn new(reasoning: impl Into<String>, action: Option<CacheAction>) -> Self {
        Self {
            reasoning: reasoning.into(),
            action,
            timestamp: Utc::now().timestamp_millis(),
            result: None,
            extras: None,
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }
}

/// A fully-resolved execution trace for one fingerprint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub steps: Vec<CacheStep>,
    pub timestamp: i64,
}

impl CacheEntry {
    pub fn new(steps: Vec<CacheStep>) -> Self {
        Self {
            steps,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp)
    }
}

/// Storage backend contract. Lookups are purely local reads and never block
/// on the network, so the whole trait is synchronous.
pub trait CacheStore: Send + Sync {
    fn lookup(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheIoError>;
    fn put(&self, fingerprint: &str, entry: &CacheEntry) -> Result<(), CacheIoError>;
    fn invalidate(&self, fingerprint: &str) -> Result<(), CacheIoError>;
    fn keys(&self) -> Result<Vec<String>, CacheIoError>;
}

/// Process-local store, the default for library embedding and tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    inner: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheStore for MemoryCacheStore {
    fn lookup(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheIoError> {
        Ok(self.inner.read().get(fingerprint).cloned())
    }

    fn put(&self, fingerprint: &str, entry: &CacheEntry) -> Result<(), CacheIoError> {
        self.inner
            .write()
            .insert(fingerprint.to_string(), entry.clone());
        Ok(())
    }

    fn invalidate(&self, fingerprint: &str) -> Result<(), CacheIoError> {
        self.inner.write().remove(fingerprint);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CacheIoError> {
        Ok(self.inner.read().keys().cloned().collect())
    }
}

/// File-backed store: one JSON document per fingerprint, sharded by the
/// first two key characters, written atomically via rename.
pub struct FileCacheStore {
    root: PathBuf,
}

impl FileCacheStore {
    pub fn new(root: PathBuf) -> Result<Self, CacheIoError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Keys are normally hex, but arbitrary CLI input must not panic
        // on a char boundary.
        let shard: String = key.chars().take(2).collect();
        self.root.join(shard).join(format!("{key}.json"))
    }
}

impl CacheStore for FileCacheStore {
    fn lookup(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheIoError> {
        let path = self.entry_path(fingerprint);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                // Structurally invalid entries are skipped, not fatal.
                warn!(%err, path = %path.display(), "skipping unparseable cache entry");
                Ok(None)
            }
        }
    }

    fn put(&self, fingerprint: &str, entry: &CacheEntry) -> Result<(), CacheIoError> {
        let path = self.entry_path(fingerprint);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(entry)?;
        write_atomic(&path, &payload)?;
        Ok(())
    }

    fn invalidate(&self, fingerprint: &str) -> Result<(), CacheIoError> {
        let path = self.entry_path(fingerprint);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, CacheIoError> {
        let mut keys = Vec::new();
        for shard in std::fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(shard.path())? {
                let name = file?.file_name();
                if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(tmp, path)
}

/// Keeps a recording slot alive for one fingerprint. Dropping the guard
/// releases the slot; a run that failed to acquire one still executes
/// normally, it just skips the cache write.
pub struct RecordingGuard {
    registry: Arc<DashMap<String, ()>>,
    fingerprint: String,
}

impl Drop for RecordingGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.fingerprint);
    }
}

/// Cache facade used by the orchestrator: advisory lookups, last-writer-wins
/// puts, optional age expiry, and at-most-one-writer-per-fingerprint
/// recording rights.
pub struct ActionCache {
    store: Arc<dyn CacheStore>,
    max_age_ms: Option<i64>,
    recording: Arc<DashMap<String, ()>>,
}

impl ActionCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            max_age_ms: None,
            recording: Arc::new(DashMap::new()),
        }
    }

    /// Treat entries older than `max_age_ms` as misses (and drop them).
    /// `None` means entries never expire proactively.
    pub fn with_max_age_ms(mut self, max_age_ms: Option<i64>) -> Self {
        self.max_age_ms = max_age_ms;
        self
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<CacheEntry> {
        let entry = match self.store.lookup(fingerprint) {
            Ok(entry) => entry?,
            Err(err) => {
                warn!(%err, fingerprint, "cache lookup failed; treating as miss");
                return None;
            }
        };
        if let Some(max_age) = self.max_age_ms {
            if entry.age_ms(Utc::now().timestamp_millis()) > max_age {
                debug!(fingerprint, "cache entry expired; invalidating");
                self.invalidate(fingerprint);
                return None;
            }
        }
        Some(entry)
    }

    /// Seal a trace. Storage failure is surfaced to the caller but the run
    /// itself is unaffected by losing its cache contribution.
    pub fn put(&self, fingerprint: &str, entry: CacheEntry) -> Result<(), CacheIoError> {
        self.store.put(fingerprint, &entry)
    }

    pub fn invalidate(&self, fingerprint: &str) {
        if let Err(err) = self.store.invalidate(fingerprint) {
            warn!(%err, fingerprint, "cache invalidation failed");
        }
    }

    pub fn keys(&self) -> Result<Vec<String>, CacheIoError> {
        self.store.keys()
    }

    /// Claim the recording slot for a fingerprint. Returns `None` when a
    /// concurrent run is already recording the same key.
    pub fn begin_recording(&self, fingerprint: &str) -> Option<RecordingGuard> {
        use dashmap::mapref::entry::Entry;
        match self.recording.entry(fingerprint.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(RecordingGuard {
                    registry: Arc::clone(&self.recording),
                    fingerprint: fingerprint.to_string(),
                })
            }
        }
    }
}
