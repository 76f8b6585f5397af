//! Write-ahead journal for template mutations
//!
//! A template save touches the template file, `index.json`, the search index
//! and the version file. Each mutation is recorded here as a `begin` line
//! before any of those writes and a `commit` line after the last one. On
//! startup, every `begin` without a matching `commit` is handed back to the
//! caller for replay, unless a later operation on the same template was
//! committed after it.

use crate::error::Result;
use crate::templates::types::{MessageTemplate, TemplateMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Records kept before the journal is truncated at the next quiet point
const CHECKPOINT_THRESHOLD: usize = 256;

/// A template mutation that must be applied to every store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    TemplateSaved {
        template: MessageTemplate,
        metadata: TemplateMetadata,
        author: String,
        message: String,
    },
    TemplateDeleted {
        template_id: String,
    },
}

impl JournalEvent {
    pub fn template_id(&self) -> &str {
        match self {
            JournalEvent::TemplateSaved { template, .. } => &template.id,
            JournalEvent::TemplateDeleted { template_id } => template_id,
        }
    }
}

/// One line of `journal.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum JournalRecord {
    Begin {
        op: u64,
        recorded_at: DateTime<Utc>,
        event: JournalEvent,
    },
    Commit {
        op: u64,
    },
}

/// Mutation that was started but never committed
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub op: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: JournalEvent,
}

/// Append-only JSON-lines journal
pub struct Journal {
    path: PathBuf,
    next_op: u64,
    open_ops: usize,
    records_written: usize,
}

impl Journal {
    /// Open the journal and return the operations still awaiting a commit
    pub async fn open(path: &Path) -> Result<(Self, Vec<PendingOperation>)> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut begun: BTreeMap<u64, PendingOperation> = BTreeMap::new();
        let mut op_templates: HashMap<u64, String> = HashMap::new();
        let mut last_committed: HashMap<String, u64> = HashMap::new();
        let mut max_op = 0u64;
        let mut records = 0usize;

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            records += 1;

            match serde_json::from_str::<JournalRecord>(line) {
                Ok(JournalRecord::Begin {
                    op,
                    recorded_at,
                    event,
                }) => {
                    max_op = max_op.max(op);
                    op_templates.insert(op, event.template_id().to_string());
                    begun.insert(
                        op,
                        PendingOperation {
                            op,
                            recorded_at,
                            event,
                        },
                    );
                }
                Ok(JournalRecord::Commit { op }) => {
                    max_op = max_op.max(op);
                    begun.remove(&op);
                    if let Some(template_id) = op_templates.get(&op) {
                        let latest = last_committed.entry(template_id.clone()).or_insert(op);
                        *latest = (*latest).max(op);
                    }
                }
                Err(e) => {
                    // A torn final line is expected after a crash mid-append
                    warn!("Ignoring unreadable journal line {}: {}", line_no + 1, e);
                }
            }
        }

        let (pending, superseded): (Vec<PendingOperation>, Vec<PendingOperation>) =
            begun.into_values().partition(|pending| {
                !matches!(
                    last_committed.get(pending.event.template_id()),
                    Some(&committed) if committed > pending.op
                )
            });
        for stale in &superseded {
            debug!(
                "Skipping journal operation {} for template {}, superseded by a later commit",
                stale.op,
                stale.event.template_id()
            );
        }
        if !pending.is_empty() {
            info!("Journal has {} uncommitted operation(s)", pending.len());
        }

        Ok((
            Self {
                path: path.to_path_buf(),
                next_op: max_op + 1,
                open_ops: 0,
                records_written: records,
            },
            pending,
        ))
    }

    /// Record the start of a mutation, returning its operation number
    pub async fn begin(&mut self, event: JournalEvent) -> Result<u64> {
        let op = self.next_op;
        self.next_op += 1;

        self.append(&JournalRecord::Begin {
            op,
            recorded_at: Utc::now(),
            event,
        })
        .await?;
        self.open_ops += 1;

        Ok(op)
    }

    /// Mark a mutation as fully applied
    pub async fn commit(&mut self, op: u64) -> Result<()> {
        self.append(&JournalRecord::Commit { op }).await?;
        self.open_ops = self.open_ops.saturating_sub(1);

        if self.open_ops == 0 && self.records_written >= CHECKPOINT_THRESHOLD {
            self.checkpoint().await?;
        }

        Ok(())
    }

    /// Truncate the journal; only valid when nothing is outstanding
    pub async fn checkpoint(&mut self) -> Result<()> {
        fs::write(&self.path, b"").await?;
        self.records_written = 0;
        debug!("Journal checkpointed at op {}", self.next_op);
        Ok(())
    }

    async fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;

        self.records_written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(id: &str) -> JournalEvent {
        JournalEvent::TemplateSaved {
            template: MessageTemplate::email(id, "Name", "Subject", "Body"),
            metadata: TemplateMetadata::default(),
            author: "tester".to_string(),
            message: "save".to_string(),
        }
    }

    #[tokio::test]
    async fn test_committed_operations_are_not_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let (mut journal, pending) = Journal::open(&path).await.unwrap();
        assert!(pending.is_empty());

        let op = journal.begin(saved("t1")).await.unwrap();
        journal.commit(op).await.unwrap();
        let op2 = journal.begin(saved("t2")).await.unwrap();
        assert_eq!(op2, op + 1);

        let (journal, pending) = Journal::open(&path).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op, op2);
        assert_eq!(pending[0].event.template_id(), "t2");
        assert_eq!(journal.next_op, op2 + 1);
    }

    #[tokio::test]
    async fn test_torn_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let (mut journal, _) = Journal::open(&path).await.unwrap();
        journal
            .begin(JournalEvent::TemplateDeleted {
                template_id: "t1".to_string(),
            })
            .await
            .unwrap();

        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{\"record\":\"commit\",\"op\"");
        std::fs::write(&path, raw).unwrap();

        let (_, pending) = Journal::open(&path).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_operation_superseded_by_later_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let (mut journal, _) = Journal::open(&path).await.unwrap();
        // Begun but never committed, as when applying the save fails
        let stale = journal.begin(saved("t1")).await.unwrap();
        let other = journal.begin(saved("t2")).await.unwrap();
        let later = journal
            .begin(JournalEvent::TemplateDeleted {
                template_id: "t1".to_string(),
            })
            .await
            .unwrap();
        journal.commit(later).await.unwrap();

        let (_, pending) = Journal::open(&path).await.unwrap();
        let ops: Vec<u64> = pending.iter().map(|p| p.op).collect();
        assert_eq!(ops, vec![other]);
        assert!(stale < later);
    }

    #[tokio::test]
    async fn test_checkpoint_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let (mut journal, _) = Journal::open(&path).await.unwrap();
        let op = journal.begin(saved("t1")).await.unwrap();
        journal.commit(op).await.unwrap();
        journal.checkpoint().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        let (journal, pending) = Journal::open(&path).await.unwrap();
        assert!(pending.is_empty());
        // Op numbers restart after truncation, which is fine once nothing is pending
        assert_eq!(journal.next_op, 1);
    }
}
