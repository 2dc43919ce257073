use crate::{
    audit::{AuditRecord, CorrelationType},
    derive::{Fingerprint, Pseudonym},
    error::{Error, Result},
    storage::{ActivityStore, AuditStore, MappingStore},
    util::Timestamp,
    vault::IdentityMappingRecord,
};
use std::collections::HashMap;
use std::sync::RwLock;

fn poisoned<T>(_: T) -> Error {
    Error::Storage(String::from("lock poisoned"))
}

#[derive(Debug, Default)]
struct Mappings {
    records: HashMap<Pseudonym, IdentityMappingRecord>,
    by_fingerprint: HashMap<Fingerprint, Vec<Pseudonym>>,
}

/// Keeps mapping records in memory. Both indexes sit behind one lock so an
/// insert is all-or-nothing.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    inner: RwLock<Mappings>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MappingStore for MemoryMappingStore {
    fn insert(&self, record: IdentityMappingRecord) -> Result<()> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        if guard.records.contains_key(record.pseudonym_id()) {
            Err(Error::Storage(String::from("pseudonym already has a mapping")))?;
        }
        guard
            .by_fingerprint
            .entry(record.fingerprint().clone())
            .or_default()
            .push(record.pseudonym_id().clone());
        guard.records.insert(record.pseudonym_id().clone(), record);
        Ok(())
    }

    fn get(&self, pseudonym: &Pseudonym) -> Result<Option<IdentityMappingRecord>> {
        let guard = self.inner.read().map_err(poisoned)?;
        Ok(guard.records.get(pseudonym).cloned())
    }

    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Vec<IdentityMappingRecord>> {
        let guard = self.inner.read().map_err(poisoned)?;
        let records: Vec<IdentityMappingRecord> = guard
            .by_fingerprint
            .get(fingerprint)
            .map(|pseudonyms| pseudonyms.iter().filter_map(|p| guard.records.get(p).cloned()).collect())
            .unwrap_or_default();
        Ok(records)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivityKind {
    Post,
    Comment,
}

#[derive(Debug, Clone)]
struct Activity {
    pseudonym: Pseudonym,
    subforum: String,
    kind: ActivityKind,
    at: Timestamp,
}

/// Activity counts held in memory. Mostly useful for tests and demos; a real
/// deployment reads these from the forum's own tables.
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    activity: RwLock<Vec<Activity>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, pseudonym: &Pseudonym, subforum: &str, kind: ActivityKind, at: Timestamp) -> Result<()> {
        self.activity.write().map_err(poisoned)?.push(Activity {
            pseudonym: pseudonym.clone(),
            subforum: subforum.to_string(),
            kind,
            at,
        });
        Ok(())
    }

    pub fn record_post(&self, pseudonym: &Pseudonym, subforum: &str, at: Timestamp) -> Result<()> {
        self.record(pseudonym, subforum, ActivityKind::Post, at)
    }

    pub fn record_comment(&self, pseudonym: &Pseudonym, subforum: &str, at: Timestamp) -> Result<()> {
        self.record(pseudonym, subforum, ActivityKind::Comment, at)
    }

    fn count<F>(&self, filter: F) -> Result<u64>
    where
        F: Fn(&Activity) -> bool,
    {
        let guard = self.activity.read().map_err(poisoned)?;
        Ok(guard.iter().filter(|a| filter(a)).count() as u64)
    }

    fn count_in_subforum(&self, pseudonym: &Pseudonym, subforum: &str, kind: ActivityKind, since: Option<Timestamp>) -> Result<u64> {
        self.count(|a| {
            a.kind == kind && &a.pseudonym == pseudonym && a.subforum == subforum && since.map(|s| a.at >= s).unwrap_or(true)
        })
    }
}

impl ActivityStore for MemoryActivityStore {
    fn posts_in_subforum(&self, pseudonym: &Pseudonym, subforum: &str, since: Option<Timestamp>) -> Result<u64> {
        self.count_in_subforum(pseudonym, subforum, ActivityKind::Post, since)
    }

    fn comments_in_subforum(&self, pseudonym: &Pseudonym, subforum: &str, since: Option<Timestamp>) -> Result<u64> {
        self.count_in_subforum(pseudonym, subforum, ActivityKind::Comment, since)
    }

    fn total_posts(&self, pseudonym: &Pseudonym) -> Result<u64> {
        self.count(|a| a.kind == ActivityKind::Post && &a.pseudonym == pseudonym)
    }

    fn total_comments(&self, pseudonym: &Pseudonym) -> Result<u64> {
        self.count(|a| a.kind == ActivityKind::Comment && &a.pseudonym == pseudonym)
    }

    fn subforums_active(&self, pseudonym: &Pseudonym) -> Result<Vec<String>> {
        let guard = self.activity.read().map_err(poisoned)?;
        let mut subforums: Vec<String> = Vec::new();
        for activity in guard.iter().filter(|a| &a.pseudonym == pseudonym) {
            if !subforums.contains(&activity.subforum) {
                subforums.push(activity.subforum.clone());
            }
        }
        Ok(subforums)
    }
}

/// An in-memory audit log, oldest record first.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest-first paging over an oldest-first list. Shared with the file store.
pub(crate) fn page_newest_first(records: &[AuditRecord], filter: Option<CorrelationType>, offset: usize, limit: usize) -> Vec<AuditRecord> {
    records
        .iter()
        .rev()
        .filter(|r| filter.map(|f| r.correlation_type() == f).unwrap_or(true))
        .skip(offset)
        .take(limit)
        .cloned()
        .collect()
}

pub(crate) fn count_matching(records: &[AuditRecord], filter: Option<CorrelationType>) -> u64 {
    records
        .iter()
        .filter(|r| filter.map(|f| r.correlation_type() == f).unwrap_or(true))
        .count() as u64
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.write().map_err(poisoned)?.push(record.clone());
        Ok(())
    }

    fn count(&self, filter: Option<CorrelationType>) -> Result<u64> {
        Ok(count_matching(&self.records.read().map_err(poisoned)?, filter))
    }

    fn page(&self, filter: Option<CorrelationType>, offset: usize, limit: usize) -> Result<Vec<AuditRecord>> {
        Ok(page_newest_first(&self.records.read().map_err(poisoned)?, filter, offset, limit))
    }
}
