//! Correlation: given one pseudonym, find every other pseudonym owned by the
//! same identity, for someone allowed to ask.
//!
//! Both kinds of correlation run the same pipeline:
//!
//! 1. check the requester's role against the policy
//! 2. load the target's mapping and pick the envelope sealed for the
//!    requester's role and scope
//! 3. re-derive (or accept) the role key for that envelope's grant and check it
//! 4. open the envelope and make sure it really names the target
//! 5. pull every mapping sharing the target's fingerprint
//! 6. annotate with activity counts
//! 7. write the audit record
//!
//! Nothing is returned unless step 7 succeeds. The whole thing runs in the
//! calling thread, so a caller can't walk away between the audit write and the
//! result.

use crate::{
    audit::{AuditID, AuditLedger, AuditRecord, CorrelationType, ResultSummary},
    config::CorrelationConfig,
    derive::{Fingerprint, KeyRejection, Pseudonym, RoleKey, RoleKeyDeriver},
    error::{Error, Result},
    keystore::{Domain, MasterKeyStore},
    storage::{ActivityStore, MappingStore},
    util::{ser::BinaryVec, Timestamp},
    vault::{IdentityMappingRecord, IdentityVault},
};
use chrono::Duration;
use serde_derive::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// A request to correlate pseudonyms through their shared fingerprint.
#[derive(Debug, Clone)]
pub struct FingerprintCorrelationRequest {
    pub requester_id: String,
    pub target_pseudonym: Pseudonym,
    pub role: String,
    pub scope: String,
    pub justification: String,
    /// Required for moderator-tier roles. When set, results carry activity
    /// counts for this subforum.
    pub subforum: Option<String>,
    pub incident_id: Option<String>,
    /// A role key the requester already holds. Without one, the key is
    /// re-derived from the domain master.
    pub credential: Option<RoleKey>,
}

impl FingerprintCorrelationRequest {
    pub fn new(requester_id: &str, target_pseudonym: &Pseudonym, role: &str, scope: &str, justification: &str) -> Self {
        Self {
            requester_id: requester_id.to_string(),
            target_pseudonym: target_pseudonym.clone(),
            role: role.to_string(),
            scope: scope.to_string(),
            justification: justification.to_string(),
            subforum: None,
            incident_id: None,
            credential: None,
        }
    }

    pub fn with_subforum(mut self, subforum: &str) -> Self {
        self.subforum = Some(subforum.to_string());
        self
    }

    pub fn with_incident_id(mut self, incident_id: &str) -> Self {
        self.incident_id = Some(incident_id.to_string());
        self
    }

    pub fn with_credential(mut self, credential: RoleKey) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// A request to correlate pseudonyms back to an identity, for legal and
/// platform-level investigations.
#[derive(Debug, Clone)]
pub struct IdentityCorrelationRequest {
    pub requester_id: String,
    pub target_pseudonym: Pseudonym,
    pub role: String,
    pub scope: String,
    pub justification: String,
    pub legal_basis: String,
    pub incident_id: String,
    pub credential: Option<RoleKey>,
}

impl IdentityCorrelationRequest {
    pub fn new(
        requester_id: &str,
        target_pseudonym: &Pseudonym,
        role: &str,
        scope: &str,
        justification: &str,
        legal_basis: &str,
        incident_id: &str,
    ) -> Self {
        Self {
            requester_id: requester_id.to_string(),
            target_pseudonym: target_pseudonym.clone(),
            role: role.to_string(),
            scope: scope.to_string(),
            justification: justification.to_string(),
            legal_basis: legal_basis.to_string(),
            incident_id: incident_id.to_string(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: RoleKey) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// One pseudonym found by a correlation.
#[derive(Debug, Clone, PartialEq, Serialize, getset::Getters, getset::CopyGetters)]
pub struct CorrelationResult {
    #[getset(get = "pub")]
    pseudonym: Pseudonym,
    #[getset(get_copy = "pub")]
    created_at: Timestamp,
    #[getset(get_copy = "pub")]
    posts_in_subforum: Option<u64>,
    #[getset(get_copy = "pub")]
    comments_in_subforum: Option<u64>,
    #[getset(get_copy = "pub")]
    total_posts: Option<u64>,
    #[getset(get_copy = "pub")]
    total_comments: Option<u64>,
    #[getset(get = "pub")]
    subforums_active: Option<Vec<String>>,
    /// The sealed mapping for the requester's own grant, for export
    #[getset(get = "pub")]
    encrypted_identity: Option<BinaryVec>,
}

impl CorrelationResult {
    fn bare(record: &IdentityMappingRecord) -> Self {
        Self {
            pseudonym: record.pseudonym_id().clone(),
            created_at: record.created_at(),
            posts_in_subforum: None,
            comments_in_subforum: None,
            total_posts: None,
            total_comments: None,
            subforums_active: None,
            encrypted_identity: None,
        }
    }
}

/// The outcome of a correlation, and the audit record that accounts for it.
#[derive(Debug, Clone, PartialEq, getset::Getters, getset::CopyGetters)]
pub struct Correlation {
    #[getset(get = "pub")]
    results: Vec<CorrelationResult>,
    #[getset(get_copy = "pub")]
    audit_id: AuditID,
}

impl Correlation {
    pub fn pseudonyms(&self) -> Vec<&Pseudonym> {
        self.results.iter().map(|r| &r.pseudonym).collect()
    }
}

/// Who may run which correlation.
#[derive(Debug, Clone)]
pub struct CorrelationPolicy {
    fingerprint_roles: BTreeSet<String>,
    identity_roles: BTreeSet<String>,
    moderator_window: Duration,
}

impl CorrelationPolicy {
    pub fn from_config(config: &CorrelationConfig) -> Self {
        Self {
            fingerprint_roles: config.fingerprint_roles.iter().cloned().collect(),
            identity_roles: config.identity_roles.iter().cloned().collect(),
            moderator_window: config.moderator_window(),
        }
    }
}

impl Default for CorrelationPolicy {
    fn default() -> Self {
        Self::from_config(&CorrelationConfig::default())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Validation(format!("{} is required", field)))?;
    }
    Ok(())
}

/// A target mapping that has been opened and checked.
struct Opened {
    record: IdentityMappingRecord,
    fingerprint: Fingerprint,
}

/// Runs correlations.
pub struct CorrelationEngine {
    keystore: Arc<MasterKeyStore>,
    mappings: Arc<dyn MappingStore>,
    activity: Arc<dyn ActivityStore>,
    ledger: Arc<AuditLedger>,
    policy: CorrelationPolicy,
}

impl CorrelationEngine {
    pub fn new(
        keystore: Arc<MasterKeyStore>,
        mappings: Arc<dyn MappingStore>,
        activity: Arc<dyn ActivityStore>,
        ledger: Arc<AuditLedger>,
        policy: CorrelationPolicy,
    ) -> Self {
        Self {
            keystore,
            mappings,
            activity,
            ledger,
            policy,
        }
    }

    /// Find every pseudonym sharing the target's fingerprint.
    pub fn correlate_by_fingerprint(&self, req: &FingerprintCorrelationRequest) -> Result<Correlation> {
        self.correlate_by_fingerprint_at(req, Timestamp::now())
    }

    /// [`CorrelationEngine::correlate_by_fingerprint`] as of a given time.
    pub fn correlate_by_fingerprint_at(&self, req: &FingerprintCorrelationRequest, now: Timestamp) -> Result<Correlation> {
        require("requester_id", &req.requester_id)?;
        require("justification", &req.justification)?;
        if !self.policy.fingerprint_roles.contains(&req.role) {
            warn!(requester_id = %req.requester_id, role = %req.role, "role may not run fingerprint correlation");
            Err(Error::AuthorizationDenied {
                role: req.role.clone(),
                operation: String::from("fingerprint correlation"),
            })?;
        }
        let domain = self.keystore.roles().domain_for(&req.role)?;
        let subforum = req.subforum.as_deref().filter(|s| !s.trim().is_empty());
        if domain == Domain::ModeratorCorrelation && subforum.is_none() {
            warn!(requester_id = %req.requester_id, role = %req.role, "moderator correlation without a subforum");
            Err(Error::AuthorizationDenied {
                role: req.role.clone(),
                operation: String::from("fingerprint correlation outside a subforum"),
            })?;
        }

        let opened = self.open_target(&req.target_pseudonym, &req.role, &req.scope, req.credential.as_ref(), now)?;
        let since = now.offset(-self.policy.moderator_window)?;
        let results = self
            .related(&opened)?
            .iter()
            .map(|record| -> Result<CorrelationResult> {
                let mut result = CorrelationResult::bare(record);
                if let Some(subforum) = subforum {
                    result.posts_in_subforum = Some(self.activity.posts_in_subforum(record.pseudonym_id(), subforum, Some(since))?);
                    result.comments_in_subforum = Some(self.activity.comments_in_subforum(record.pseudonym_id(), subforum, Some(since))?);
                }
                Ok(result)
            })
            .collect::<Result<Vec<_>>>()?;

        let audit = AuditRecord {
            audit_id: AuditID::random(),
            requester_id: req.requester_id.clone(),
            role_used: req.role.clone(),
            scope: req.scope.clone(),
            target_pseudonym: req.target_pseudonym.clone(),
            justification: req.justification.clone(),
            correlation_type: CorrelationType::Fingerprint,
            result_summary: summarize(&results),
            timestamp: now,
            subforum: subforum.map(String::from),
            legal_basis: None,
            incident_id: req.incident_id.clone(),
        };
        self.finish(audit, results)
    }

    /// Find every pseudonym sharing the target's identity, with full activity
    /// totals and the sealed identity for each.
    pub fn correlate_by_identity(&self, req: &IdentityCorrelationRequest) -> Result<Correlation> {
        self.correlate_by_identity_at(req, Timestamp::now())
    }

    /// [`CorrelationEngine::correlate_by_identity`] as of a given time.
    pub fn correlate_by_identity_at(&self, req: &IdentityCorrelationRequest, now: Timestamp) -> Result<Correlation> {
        if !self.policy.identity_roles.contains(&req.role) {
            warn!(requester_id = %req.requester_id, role = %req.role, "role may not run identity correlation");
            Err(Error::AuthorizationDenied {
                role: req.role.clone(),
                operation: String::from("identity correlation"),
            })?;
        }
        require("requester_id", &req.requester_id)?;
        require("justification", &req.justification)?;
        require("legal_basis", &req.legal_basis)?;
        require("incident_id", &req.incident_id)?;

        let opened = self.open_target(&req.target_pseudonym, &req.role, &req.scope, req.credential.as_ref(), now)?;
        let results = self
            .related(&opened)?
            .iter()
            .map(|record| -> Result<CorrelationResult> {
                let pseudonym = record.pseudonym_id();
                let mut result = CorrelationResult::bare(record);
                result.total_posts = Some(self.activity.total_posts(pseudonym)?);
                result.total_comments = Some(self.activity.total_comments(pseudonym)?);
                result.subforums_active = Some(self.activity.subforums_active(pseudonym)?);
                result.encrypted_identity = record.envelope_for(&req.role, &req.scope).map(|e| e.ciphertext().clone());
                Ok(result)
            })
            .collect::<Result<Vec<_>>>()?;

        let audit = AuditRecord {
            audit_id: AuditID::random(),
            requester_id: req.requester_id.clone(),
            role_used: req.role.clone(),
            scope: req.scope.clone(),
            target_pseudonym: req.target_pseudonym.clone(),
            justification: req.justification.clone(),
            correlation_type: CorrelationType::Identity,
            result_summary: summarize(&results),
            timestamp: now,
            subforum: None,
            legal_basis: Some(req.legal_basis.clone()),
            incident_id: Some(req.incident_id.clone()),
        };
        self.finish(audit, results)
    }

    /// Load the target's mapping, get a valid key for the envelope matching the
    /// requester's grant, and open it. Every credential problem comes out as
    /// the same [`Error::AuthenticationFailure`]; the logs say which it was.
    fn open_target(&self, target: &Pseudonym, role: &str, scope: &str, credential: Option<&RoleKey>, now: Timestamp) -> Result<Opened> {
        let record = self.mappings.get(target)?.ok_or(Error::NotFound)?;
        let envelope = match record.envelope_for(role, scope) {
            Some(envelope) => envelope,
            None => {
                warn!(role, scope, "target mapping was never sealed for this role and scope");
                Err(Error::AuthorizationDenied {
                    role: role.to_string(),
                    operation: format!("correlation under scope {}", scope),
                })?
            }
        };

        let keys = self.keystore.keyset_at(record.key_version(), now).map_err(|e| {
            if e.is_credential_failure() {
                warn!(key_version = record.key_version(), "mapping key version is not usable: {}", e);
                Error::AuthenticationFailure
            } else {
                e
            }
        })?;
        let deriver = RoleKeyDeriver::new(&keys, self.keystore.roles());
        let derived;
        let key = match credential {
            Some(key) => key,
            None => {
                derived = deriver.derive_for_grant(envelope.grant())?;
                &derived
            }
        };
        match deriver.check_role_key_at(key, envelope.grant(), now) {
            Ok(()) => {}
            Err(KeyRejection::Expired) => {
                warn!(role, scope, key_version = keys.version(), "role key expired");
                Err(Error::AuthenticationFailure)?;
            }
            Err(KeyRejection::Mismatch) => {
                warn!(role, scope, key_version = keys.version(), "role key does not match its grant");
                Err(Error::AuthenticationFailure)?;
            }
        }

        let (fingerprint, pseudonym) = IdentityVault::decrypt_mapping(envelope.ciphertext(), key).map_err(|e| {
            warn!(role, scope, "could not open mapping envelope: {}", e);
            Error::AuthenticationFailure
        })?;
        if &pseudonym != target || &fingerprint != record.fingerprint() {
            warn!(role, scope, "sealed mapping does not match its record");
            Err(Error::AuthenticationFailure)?;
        }
        Ok(Opened { record, fingerprint })
    }

    /// Every mapping sharing the opened fingerprint, first-seen order, no
    /// duplicates, target always present.
    fn related(&self, opened: &Opened) -> Result<Vec<IdentityMappingRecord>> {
        let mut seen = HashSet::new();
        let mut related = Vec::new();
        for record in self.mappings.find_by_fingerprint(&opened.fingerprint)? {
            if record.fingerprint() == &opened.fingerprint && seen.insert(record.pseudonym_id().clone()) {
                related.push(record);
            }
        }
        if !seen.contains(opened.record.pseudonym_id()) {
            related.insert(0, opened.record.clone());
        }
        Ok(related)
    }

    fn finish(&self, audit: AuditRecord, results: Vec<CorrelationResult>) -> Result<Correlation> {
        let requester_id = audit.requester_id.clone();
        let role = audit.role_used.clone();
        let scope = audit.scope.clone();
        let correlation_type = audit.correlation_type;
        let audit_id = self.ledger.append(audit)?;
        info!(
            audit_id = %audit_id,
            requester_id = %requester_id,
            role = %role,
            scope = %scope,
            correlation_type = %correlation_type,
            results_count = results.len(),
            "correlation completed"
        );
        Ok(Correlation { results, audit_id })
    }
}

fn summarize(results: &[CorrelationResult]) -> ResultSummary {
    ResultSummary {
        results_count: results.len(),
        pseudonyms: results.iter().map(|r| r.pseudonym.clone()).collect(),
    }
}
