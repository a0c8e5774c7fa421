//! Append-only audit journal and timeline aggregation.
//!
//! The in-memory log is authoritative. Records are also published on a
//! broadcast hub for live subscribers and, when configured, mirrored to a
//! JSONL sink on disk.

mod timeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, instrument, warn};
use trailgate_protocol::{
    AuditEvent, AuditEventId, AuditRecord, AuditTimelineEvent, DecisionTrace, MemoryAuditLog,
    OsExecutionAuditEvent,
};

pub use timeline::{
    build_timeline, filter_by_type, slice_by_range, summarize, timeline_from_records,
};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
    async fn read_all(&self) -> Result<Vec<AuditRecord>>;
}

/// One JSON line per record under `<root>/audit/audit.jsonl`.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            path: root.into().join("audit").join("audit.jsonl"),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create audit dir {parent:?}"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    #[instrument(skip(self, record), fields(path = ?self.path))]
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        Self::ensure_parent(&self.path).await?;
        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed opening audit log {:?}", self.path))?;

        let line = serde_json::to_string(record).context("failed serializing audit record")?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        debug!("audit record appended to sink");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let file = OpenOptions::new().read(true).open(&self.path).await?;
        let mut reader = BufReader::new(file).lines();
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_str(&line)
                .with_context(|| format!("failed parsing audit line in {:?}", self.path))?;
            out.push(record);
        }
        Ok(out)
    }
}

#[derive(Clone, Debug)]
pub struct AuditStreamHub {
    sender: broadcast::Sender<AuditRecord>,
}

impl AuditStreamHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    pub fn publish(&self, record: AuditRecord) {
        let _ = self.sender.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<AuditRecord> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl Default for AuditStreamHub {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared, append-only record of everything the gateway decided or did.
///
/// Cloning shares the same log. Records are never edited or removed.
/// The in-memory log, the sink, and subscribers all see records in the
/// same order.
#[derive(Clone)]
pub struct AuditJournal {
    entries: Arc<Mutex<Vec<AuditRecord>>>,
    append_lock: Arc<tokio::sync::Mutex<()>>,
    stream: AuditStreamHub,
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditJournal {
    pub fn in_memory(stream: AuditStreamHub) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            append_lock: Arc::new(tokio::sync::Mutex::new(())),
            stream,
            sink: None,
        }
    }

    pub fn with_sink(stream: AuditStreamHub, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::in_memory(stream)
        }
    }

    /// Appends a record. A sink failure is logged; the record stays in
    /// memory and is still published.
    #[instrument(skip(self, record), fields(kind = record_kind(&record)))]
    pub async fn record(&self, record: AuditRecord) {
        let _append = self.append_lock.lock().await;
        self.entries.lock().push(record.clone());

        if let Some(sink) = &self.sink
            && let Err(error) = sink.append(&record).await
        {
            warn!(%error, "audit sink append failed; record kept in memory");
        }

        self.stream.publish(record);
        debug!("audit record published");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.entries.lock().clone()
    }

    pub fn executions(&self) -> Vec<OsExecutionAuditEvent> {
        self.entries
            .lock()
            .iter()
            .filter_map(|record| match record {
                AuditRecord::Execution(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn decisions(&self) -> Vec<DecisionTrace> {
        self.entries
            .lock()
            .iter()
            .filter_map(|record| match record {
                AuditRecord::Decision(trace) => Some(trace.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn memory_audits(&self) -> Vec<MemoryAuditLog> {
        self.entries
            .lock()
            .iter()
            .filter_map(|record| match record {
                AuditRecord::Memory(log) => Some(log.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn find_execution(&self, id: &AuditEventId) -> Option<OsExecutionAuditEvent> {
        self.entries.lock().iter().find_map(|record| match record {
            AuditRecord::Execution(event) if &event.id == id => Some(event.clone()),
            _ => None,
        })
    }

    pub fn find_context_event(&self, id: &AuditEventId) -> Option<AuditEvent> {
        self.entries.lock().iter().find_map(|record| match record {
            AuditRecord::Context(event) if &event.id == id => Some(event.clone()),
            _ => None,
        })
    }

    /// Timeline over the log as recorded; same-millisecond events keep
    /// recording order.
    pub fn timeline(&self) -> Vec<AuditTimelineEvent> {
        timeline_from_records(&self.entries.lock())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.stream.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<AuditRecord> {
        self.stream.subscribe_stream()
    }
}

fn record_kind(record: &AuditRecord) -> &'static str {
    match record {
        AuditRecord::Context(_) => "context",
        AuditRecord::Execution(_) => "execution",
        AuditRecord::Decision(_) => "decision",
        AuditRecord::Memory(_) => "memory",
    }
}
