//! The audit ledger. Every correlation that returns a result leaves exactly one
//! record here first, and records are never changed or removed.

use crate::{
    derive::Pseudonym,
    error::{Error, Result},
    storage::AuditStore,
    util::Timestamp,
};
use serde_derive::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

object_id! {
    /// Identifies one audit record.
    AuditID
}

/// Which kind of correlation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationType {
    Fingerprint,
    Identity,
}

impl std::fmt::Display for CorrelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fingerprint => write!(f, "fingerprint"),
            Self::Identity => write!(f, "identity"),
        }
    }
}

/// What a correlation handed back, minus anything sensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::CopyGetters)]
pub struct ResultSummary {
    #[getset(get_copy = "pub")]
    pub(crate) results_count: usize,
    #[getset(get = "pub")]
    pub(crate) pseudonyms: Vec<Pseudonym>,
}

/// One audited correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::CopyGetters)]
pub struct AuditRecord {
    #[getset(get_copy = "pub")]
    pub(crate) audit_id: AuditID,
    #[getset(get = "pub")]
    pub(crate) requester_id: String,
    #[getset(get = "pub")]
    pub(crate) role_used: String,
    #[getset(get = "pub")]
    pub(crate) scope: String,
    #[getset(get = "pub")]
    pub(crate) target_pseudonym: Pseudonym,
    #[getset(get = "pub")]
    pub(crate) justification: String,
    #[getset(get_copy = "pub")]
    pub(crate) correlation_type: CorrelationType,
    #[getset(get = "pub")]
    pub(crate) result_summary: ResultSummary,
    #[getset(get_copy = "pub")]
    pub(crate) timestamp: Timestamp,
    #[getset(get = "pub")]
    pub(crate) subforum: Option<String>,
    #[getset(get = "pub")]
    pub(crate) legal_basis: Option<String>,
    #[getset(get = "pub")]
    pub(crate) incident_id: Option<String>,
}

/// A page of audit records, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, getset::Getters, getset::CopyGetters)]
pub struct AuditPage {
    #[getset(get = "pub")]
    records: Vec<AuditRecord>,
    #[getset(get_copy = "pub")]
    total: u64,
    #[getset(get_copy = "pub")]
    page: usize,
    #[getset(get_copy = "pub")]
    limit: usize,
    #[getset(get_copy = "pub")]
    pages: u64,
}

/// Appends and pages through audit records on top of an [`AuditStore`].
pub struct AuditLedger {
    store: Arc<dyn AuditStore>,
    default_limit: usize,
    max_limit: usize,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn AuditStore>, default_limit: usize, max_limit: usize) -> Self {
        Self {
            store,
            default_limit,
            max_limit,
        }
    }

    /// Append a record. Any store failure comes back as
    /// [`Error::AuditWriteFailure`].
    pub fn append(&self, record: AuditRecord) -> Result<AuditID> {
        let audit_id = record.audit_id;
        self.store.append(&record).map_err(|e| {
            error!(audit_id = %audit_id, correlation_type = %record.correlation_type, "audit append failed: {}", e);
            Error::AuditWriteFailure(e.to_string())
        })?;
        debug!(audit_id = %audit_id, "audit record appended");
        Ok(audit_id)
    }

    /// Page through records. Pages start at 1. The limit falls back to the
    /// default when not given, and is clamped to the maximum.
    pub fn query(&self, filter: Option<CorrelationType>, page: Option<usize>, limit: Option<usize>) -> Result<AuditPage> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(self.default_limit);
        if page == 0 || limit == 0 {
            Err(Error::Validation(String::from("page and limit must be positive")))?;
        }
        let limit = limit.min(self.max_limit);
        let offset = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| Error::Validation(String::from("page out of range")))?;
        let total = self.store.count(filter)?;
        let records = self.store.page(filter, offset, limit)?;
        let pages = (total + limit as u64 - 1) / limit as u64;
        Ok(AuditPage {
            records,
            total,
            page,
            limit,
            pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{storage::MemoryAuditStore, util::test};

    fn ledger(store: Arc<dyn AuditStore>) -> AuditLedger {
        AuditLedger::new(store, 25, 100)
    }

    #[test]
    fn append_and_query() {
        let ledger = ledger(Arc::new(MemoryAuditStore::new()));
        let mut ids = Vec::new();
        for i in 0..7 {
            let ty = if i % 2 == 0 { CorrelationType::Fingerprint } else { CorrelationType::Identity };
            ids.push(ledger.append(test::audit_record(ty)).unwrap());
        }

        let page = ledger.query(None, None, None).unwrap();
        assert_eq!(page.total(), 7);
        assert_eq!(page.pages(), 1);
        assert_eq!(page.limit(), 25);
        // newest first
        assert_eq!(page.records()[0].audit_id(), ids[6]);
        assert_eq!(page.records()[6].audit_id(), ids[0]);

        let page = ledger.query(Some(CorrelationType::Identity), Some(1), Some(2)).unwrap();
        assert_eq!(page.total(), 3);
        assert_eq!(page.pages(), 2);
        assert_eq!(page.records().iter().map(|r| r.audit_id()).collect::<Vec<_>>(), vec![ids[5], ids[3]]);
        let page = ledger.query(Some(CorrelationType::Identity), Some(2), Some(2)).unwrap();
        assert_eq!(page.records().iter().map(|r| r.audit_id()).collect::<Vec<_>>(), vec![ids[1]]);
        let page = ledger.query(Some(CorrelationType::Identity), Some(3), Some(2)).unwrap();
        assert!(page.records().is_empty());
        assert_eq!(page.total(), 3);
    }

    #[test]
    fn query_limits() {
        let ledger = ledger(Arc::new(MemoryAuditStore::new()));
        ledger.append(test::audit_record(CorrelationType::Fingerprint)).unwrap();
        assert_eq!(ledger.query(None, Some(1), Some(1000)).unwrap().limit(), 100);
        assert!(matches!(ledger.query(None, Some(0), None), Err(Error::Validation(_))));
        assert!(matches!(ledger.query(None, None, Some(0)), Err(Error::Validation(_))));
        assert!(matches!(ledger.query(None, Some(usize::MAX), Some(100)), Err(Error::Validation(_))));

        let empty = AuditLedger::new(Arc::new(MemoryAuditStore::new()), 25, 100).query(None, None, None).unwrap();
        assert_eq!(empty.total(), 0);
        assert_eq!(empty.pages(), 0);
    }

    #[test]
    fn append_failure() {
        let ledger = ledger(Arc::new(test::FailingAuditStore));
        let res = ledger.append(test::audit_record(CorrelationType::Fingerprint));
        assert!(matches!(res, Err(Error::AuditWriteFailure(_))));
    }
}
