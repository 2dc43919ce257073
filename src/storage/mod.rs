//! Storage seams. The correlation engine only ever talks to these traits; the
//! in-memory and file-backed implementations here are enough for tests and
//! small deployments, and anything else (a SQL database, say) plugs in by
//! implementing them.

use crate::{
    audit::{AuditRecord, CorrelationType},
    derive::{Fingerprint, Pseudonym},
    error::Result,
    util::Timestamp,
    vault::IdentityMappingRecord,
};

pub mod file;
pub mod memory;

pub use file::FileAuditStore;
pub use memory::{MemoryActivityStore, MemoryAuditStore, MemoryMappingStore};

/// Identity mapping records, indexed by pseudonym and by fingerprint.
pub trait MappingStore: Send + Sync {
    /// Store a new record. The record and its fingerprint index entry land
    /// together or not at all. Inserting a pseudonym that already exists is a
    /// storage error.
    fn insert(&self, record: IdentityMappingRecord) -> Result<()>;

    /// Fetch a record by pseudonym.
    fn get(&self, pseudonym: &Pseudonym) -> Result<Option<IdentityMappingRecord>>;

    /// All records sharing a fingerprint, in insertion order.
    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Vec<IdentityMappingRecord>>;
}

/// Read-only activity counts per pseudonym.
pub trait ActivityStore: Send + Sync {
    /// Posts in a subforum, optionally only those at or after `since`.
    fn posts_in_subforum(&self, pseudonym: &Pseudonym, subforum: &str, since: Option<Timestamp>) -> Result<u64>;

    /// Comments in a subforum, optionally only those at or after `since`.
    fn comments_in_subforum(&self, pseudonym: &Pseudonym, subforum: &str, since: Option<Timestamp>) -> Result<u64>;

    fn total_posts(&self, pseudonym: &Pseudonym) -> Result<u64>;

    fn total_comments(&self, pseudonym: &Pseudonym) -> Result<u64>;

    /// Every subforum the pseudonym has posted or commented in.
    fn subforums_active(&self, pseudonym: &Pseudonym) -> Result<Vec<String>>;
}

/// An append-only audit log.
pub trait AuditStore: Send + Sync {
    /// Durably append a record. Returning `Ok` means the record is stored.
    fn append(&self, record: &AuditRecord) -> Result<()>;

    /// Count records, optionally of one correlation type.
    fn count(&self, filter: Option<CorrelationType>) -> Result<u64>;

    /// Records newest first, skipping `offset` and returning at most `limit`.
    fn page(&self, filter: Option<CorrelationType>, offset: usize, limit: usize) -> Result<Vec<AuditRecord>>;
}
