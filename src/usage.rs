//! Usage ledger: who ran what, and what it cost
//!
//! Every completed job leaves one [`UsageEntry`] attributing its service
//! calls and tokens to the submitting user and the source document.

use crate::analysis::StageKind;
use crate::job::JobId;
use crate::service::TokenUsage;
use crate::storage::{JobStore, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Name recorded when a job has no submitting user.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Cost record for one completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub job_id: JobId,
    /// Display name of the source document
    pub document: String,
    /// Service invocations, retries included
    pub calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Stages that produced no result
    #[serde(default)]
    pub failed_stages: Vec<StageKind>,
}

impl UsageEntry {
    pub fn new(
        user: Option<&str>,
        job_id: JobId,
        document: impl Into<String>,
        calls: u32,
        usage: TokenUsage,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user: user.unwrap_or(ANONYMOUS_USER).to_string(),
            job_id,
            document: document.into(),
            calls,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            failed_stages: Vec::new(),
        }
    }

    pub fn with_failed_stages(mut self, stages: Vec<StageKind>) -> Self {
        self.failed_stages = stages;
        self
    }
}

/// Aggregate usage for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub jobs: u32,
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTotals {
    fn add(&mut self, entry: &UsageEntry) {
        self.jobs = self.jobs.saturating_add(1);
        self.calls = self.calls.saturating_add(u64::from(entry.calls));
        self.input_tokens = self.input_tokens.saturating_add(entry.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(entry.output_tokens);
    }
}

/// Append-only usage ledger, optionally mirrored to a store.
#[derive(Default)]
pub struct UsageLedger {
    entries: Mutex<Vec<UsageEntry>>,
    store: Option<Arc<dyn JobStore>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger backed by a store; existing entries are loaded.
    pub fn with_store(store: Arc<dyn JobStore>) -> StorageResult<Self> {
        let entries = store.load_usage()?;
        Ok(Self {
            entries: Mutex::new(entries),
            store: Some(store),
        })
    }

    /// Append an entry. A store failure is returned after the in-memory
    /// append, so the ledger itself never loses the entry.
    pub fn record(&self, entry: UsageEntry) -> StorageResult<()> {
        let persisted = match &self.store {
            Some(store) => store.record_usage(&entry),
            None => Ok(()),
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
        persisted
    }

    pub fn entries(&self) -> Vec<UsageEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn for_job(&self, job_id: &JobId) -> Option<UsageEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| &e.job_id == job_id)
            .cloned()
    }

    pub fn totals_for(&self, user: &str) -> UsageTotals {
        self.totals_by_user().remove(user).unwrap_or_default()
    }

    pub fn totals_by_user(&self) -> BTreeMap<String, UsageTotals> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut totals: BTreeMap<String, UsageTotals> = BTreeMap::new();
        for entry in entries.iter() {
            totals.entry(entry.user.clone()).or_default().add(entry);
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};

    fn entry(user: Option<&str>, calls: u32) -> UsageEntry {
        UsageEntry::new(user, JobId::new(), "book.txt", calls, TokenUsage::new(100, 20))
    }

    #[test]
    fn totals_group_by_user() {
        let ledger = UsageLedger::new();
        ledger.record(entry(Some("ana"), 8)).unwrap();
        ledger.record(entry(Some("ana"), 10)).unwrap();
        ledger.record(entry(None, 6)).unwrap();

        let ana = ledger.totals_for("ana");
        assert_eq!(ana.jobs, 2);
        assert_eq!(ana.calls, 18);
        assert_eq!(ana.input_tokens, 200);
        assert_eq!(ledger.totals_for(ANONYMOUS_USER).jobs, 1);
        assert_eq!(ledger.totals_for("nobody"), UsageTotals::default());
    }

    #[test]
    fn totals_saturate_on_huge_token_counts() {
        let ledger = UsageLedger::new();
        let huge = TokenUsage::new(u64::MAX, 1);
        ledger
            .record(UsageEntry::new(Some("cy"), JobId::new(), "a.txt", 2, huge))
            .unwrap();
        ledger
            .record(UsageEntry::new(Some("cy"), JobId::new(), "b.txt", 2, huge))
            .unwrap();

        let totals = ledger.totals_for("cy");
        assert_eq!(totals.jobs, 2);
        assert_eq!(totals.input_tokens, u64::MAX);
        assert_eq!(totals.output_tokens, 2);
    }

    #[test]
    fn store_backed_ledger_reloads() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let first = UsageLedger::with_store(Arc::clone(&store)).unwrap();
        let recorded = entry(Some("ben"), 3).with_failed_stages(vec![StageKind::Scoring]);
        first.record(recorded.clone()).unwrap();

        let second = UsageLedger::with_store(store).unwrap();
        assert_eq!(second.for_job(&recorded.job_id), Some(recorded));
    }
}
