//! Scripted in-memory `KillStore` for unit tests

use crate::config::BackendKind;
use crate::ports::KillStore;
use crate::{Result, TallyError};
use async_trait::async_trait;
use killtally_types::{placeholder_name, ActorId, ActorRecord, KillRecord, PairKey, PairTally};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct FakeStore {
    records: Mutex<BTreeMap<PairKey, u64>>,
    actors: Mutex<BTreeMap<ActorId, String>>,
    /// Queries and commits fail with StorageUnavailable while set
    down: AtomicBool,
    fail_schema: AtomicBool,
    /// Number of upcoming commits that fail midway
    failing_commits: AtomicUsize,
    /// Entries written to the staging copy before a scripted failure
    partial_writes: AtomicUsize,
    commit_calls: AtomicUsize,
    schema_calls: AtomicUsize,
    closed: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_schema(&self) {
        self.fail_schema.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` commits write `partial` entries and then fail
    pub fn fail_next_commits(&self, count: usize, partial: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
        self.partial_writes.store(partial, Ordering::SeqCst);
    }

    pub fn persisted(&self, actor: ActorId, target: ActorId) -> u64 {
        self.records
            .lock()
            .unwrap()
            .get(&PairKey::new(actor, target))
            .copied()
            .unwrap_or(0)
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TallyError::StorageUnavailable(
                "fake backend is down".to_string(),
            ));
        }
        Ok(())
    }

    fn take_scripted_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl KillStore for FakeStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_schema.load(Ordering::SeqCst) {
            return Err(TallyError::SchemaInitializationFailed(
                "permission denied".to_string(),
            ));
        }
        self.check_up()
    }

    async fn commit_increments(&self, entries: &[PairTally]) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;

        let mut records = self.records.lock().unwrap();
        let mut staging = records.clone();
        let fail = self.take_scripted_failure();
        let partial = self.partial_writes.load(Ordering::SeqCst);

        for (written, entry) in entries.iter().enumerate() {
            if fail && written == partial {
                // Staging copy is dropped: the transaction rolls back
                return Err(TallyError::CommitFailed(format!(
                    "connection lost after {} of {} entries",
                    written,
                    entries.len()
                )));
            }
            *staging.entry(entry.key()).or_insert(0) += entry.count;
        }
        if fail {
            return Err(TallyError::CommitFailed(
                "connection lost before commit".to_string(),
            ));
        }

        let mut actors = self.actors.lock().unwrap();
        for entry in entries {
            for id in [entry.actor, entry.target] {
                actors.entry(id).or_insert_with(|| placeholder_name(&id));
            }
        }
        *records = staging;
        Ok(())
    }

    async fn sum_by_actor(&self, actor: ActorId) -> Result<u64> {
        self.check_up()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.actor == actor)
            .map(|(_, count)| *count)
            .sum())
    }

    async fn actor_exists(&self, actor: ActorId) -> Result<bool> {
        self.check_up()?;
        let registered = self.actors.lock().unwrap().contains_key(&actor);
        Ok(registered
            || self
                .records
                .lock()
                .unwrap()
                .keys()
                .any(|key| key.involves(&actor)))
    }

    async fn register_actor(&self, actor: ActorId, name: &str) -> Result<()> {
        self.check_up()?;
        self.actors.lock().unwrap().insert(actor, name.to_string());
        Ok(())
    }

    async fn find_actor_by_name(&self, name: &str) -> Result<Option<ActorRecord>> {
        self.check_up()?;
        Ok(self
            .actors
            .lock()
            .unwrap()
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, n)| ActorRecord {
                id: *id,
                name: n.clone(),
                created_at: chrono::Utc::now(),
            }))
    }

    async fn kill_records(&self, actor: ActorId) -> Result<Vec<KillRecord>> {
        self.check_up()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.actor == actor)
            .map(|(key, count)| KillRecord {
                actor: key.actor,
                target: key.target,
                count: *count,
                updated_at: chrono::Utc::now(),
            })
            .collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
