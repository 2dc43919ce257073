//! The programmatic boundary of the crate. An outer layer (a web API, a
//! moderation tool) holds one of these and never touches master secrets,
//! fingerprints, or identities directly.

use crate::{
    audit::{AuditLedger, AuditPage, CorrelationType},
    config::{Config, RotationConfig, SignupGrant},
    correlation::{Correlation, CorrelationEngine, CorrelationPolicy, FingerprintCorrelationRequest, IdentityCorrelationRequest},
    crypto::base::rng_chacha20,
    derive::{Expiry, Fingerprint, FingerprintDeriver, Pseudonym, PseudonymDeriver, PseudonymInput, RoleKey, RoleKeyDeriver},
    error::{Error, Result},
    keystore::{KeySet, MasterKeyStore},
    storage::{ActivityStore, AuditStore, MappingStore},
    util::Timestamp,
    vault::IdentityVault,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The storage a service runs on top of.
#[derive(Clone)]
pub struct Stores {
    pub mappings: Arc<dyn MappingStore>,
    pub activity: Arc<dyn ActivityStore>,
    pub audits: Arc<dyn AuditStore>,
}

/// Pseudonyms, mappings, role keys, correlation and audit, all in one place.
pub struct IdentityService {
    keystore: Arc<MasterKeyStore>,
    mappings: Arc<dyn MappingStore>,
    ledger: Arc<AuditLedger>,
    engine: CorrelationEngine,
    signup_grants: Vec<SignupGrant>,
    rotation: RotationConfig,
}

impl IdentityService {
    /// Create a service around an existing key store.
    pub fn new(config: &Config, keystore: Arc<MasterKeyStore>, stores: Stores) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(AuditLedger::new(
            stores.audits,
            config.correlation.default_page_limit,
            config.correlation.max_page_limit,
        ));
        let engine = CorrelationEngine::new(
            keystore.clone(),
            stores.mappings.clone(),
            stores.activity,
            ledger.clone(),
            CorrelationPolicy::from_config(&config.correlation),
        );
        Ok(Self {
            keystore,
            mappings: stores.mappings,
            ledger,
            engine,
            signup_grants: config.correlation.signup_grants.clone(),
            rotation: config.keys.rotation.clone(),
        })
    }

    /// Create a service, loading (or generating) keys as the config says.
    pub fn from_config(config: &Config, stores: Stores) -> Result<Self> {
        let keystore = Arc::new(MasterKeyStore::from_config(config)?);
        Self::new(config, keystore, stores)
    }

    pub fn keystore(&self) -> &Arc<MasterKeyStore> {
        &self.keystore
    }

    /// Derive a pseudonym from a persona secret under the current keys.
    pub fn derive_pseudonym(&self, secret: &[u8]) -> Result<Pseudonym> {
        let keys = self.keystore.current()?;
        let pseudonym = PseudonymDeriver::new(&keys).derive_pseudonym(secret)?;
        debug!(key_version = keys.version(), "derived pseudonym");
        Ok(pseudonym)
    }

    /// Derive a pseudonym from a user id under the current keys.
    pub fn derive_enhanced_pseudonym(&self, user_id: i64, context: &str, version: u32) -> Result<Pseudonym> {
        let keys = self.keystore.current()?;
        PseudonymDeriver::new(&keys).derive_enhanced_pseudonym(user_id, context, version)
    }

    pub fn derive_fingerprint(&self, identity: &str) -> Result<Fingerprint> {
        let keys = self.keystore.current()?;
        FingerprintDeriver::new(&keys).derive_fingerprint(identity)
    }

    /// Issue a role key from the current keys. Keys that would already be
    /// expired are refused.
    pub fn issue_role_key(&self, role: &str, scope: &str, expiry: Expiry) -> Result<RoleKey> {
        let now = Timestamp::now();
        let expires_at = expiry.resolve(now)?;
        if expires_at <= now {
            Err(Error::Validation(String::from("role key expiry must be in the future")))?;
        }
        let keys = self.keystore.current()?;
        let key = RoleKeyDeriver::new(&keys, self.keystore.roles()).derive_role_key(role, scope, expires_at)?;
        info!(role, scope, key_version = keys.version(), expires_at = %expires_at, "issued role key");
        Ok(key)
    }

    /// Check a role key against its own grant, using whichever key set it came
    /// from. Keys from retired or unknown key versions are not valid.
    pub fn validate_role_key(&self, candidate: &RoleKey) -> bool {
        let now = Timestamp::now();
        match self.keystore.keyset_at(candidate.key_version(), now) {
            Ok(keys) => RoleKeyDeriver::new(&keys, self.keystore.roles()).validate_role_key_at(candidate, candidate.grant(), now),
            Err(_) => false,
        }
    }

    pub fn encrypt_mapping(&self, identity: &str, pseudonym: &Pseudonym, role_key: &RoleKey) -> Result<Vec<u8>> {
        let keys = self.keystore.current()?;
        IdentityVault::new(&keys).encrypt_mapping(&mut rng_chacha20(), identity, pseudonym, role_key)
    }

    pub fn decrypt_mapping(&self, blob: &[u8], role_key: &RoleKey) -> Result<(Fingerprint, Pseudonym)> {
        IdentityVault::decrypt_mapping(blob, role_key)
    }

    /// Signup: derive the pseudonym, seal its mapping once per signup grant,
    /// and store the record. Registering the same persona twice is a storage
    /// error.
    pub fn register_persona(&self, identity: &str, input: PseudonymInput) -> Result<Pseudonym> {
        let keys = self.keystore.current()?;
        let now = Timestamp::now();
        let pseudonym = PseudonymDeriver::new(&keys).derive(&input)?;
        let deriver = RoleKeyDeriver::new(&keys, self.keystore.roles());
        let role_keys = self
            .signup_grants
            .iter()
            .map(|grant| deriver.derive_role_key(&grant.role, &grant.scope, now.offset(grant.valid_for())?))
            .collect::<Result<Vec<_>>>()?;
        let record = IdentityVault::new(&keys).seal_record(&mut rng_chacha20(), identity, &pseudonym, input.scheme(), &role_keys, now)?;
        self.mappings.insert(record)?;
        info!(key_version = keys.version(), scheme = ?input.scheme(), envelopes = role_keys.len(), "registered persona");
        Ok(pseudonym)
    }

    /// Check that `input` is what `pseudonym` was derived from, under the
    /// scheme and key version its mapping was created with. Unknown
    /// pseudonyms and retired key versions verify as false.
    pub fn verify_persona(&self, pseudonym: &Pseudonym, input: PseudonymInput) -> Result<bool> {
        let record = match self.mappings.get(pseudonym)? {
            Some(record) => record,
            None => return Ok(false),
        };
        if record.scheme() != input.scheme() {
            return Ok(false);
        }
        let keys = match self.keystore.keyset_at(record.key_version(), Timestamp::now()) {
            Ok(keys) => keys,
            Err(e) if e.is_credential_failure() => {
                warn!(key_version = record.key_version(), "cannot verify persona: {}", e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let derived = PseudonymDeriver::new(&keys).derive_for(record.scheme(), &input)?;
        Ok(&derived == pseudonym)
    }

    pub fn correlate_by_fingerprint(&self, req: &FingerprintCorrelationRequest) -> Result<Correlation> {
        self.engine.correlate_by_fingerprint(req)
    }

    pub fn correlate_by_identity(&self, req: &IdentityCorrelationRequest) -> Result<Correlation> {
        self.engine.correlate_by_identity(req)
    }

    /// Page through audit records, newest first. See [`AuditLedger::query`].
    pub fn list_audits(&self, filter: Option<CorrelationType>, page: Option<usize>, limit: Option<usize>) -> Result<AuditPage> {
        self.ledger.query(filter, page, limit)
    }

    /// Rotate to a freshly generated key set if rotation is enabled and the
    /// current set is old enough. Returns the new version if a rotation
    /// happened. New key sets only live in memory; persist them with
    /// [`KeySet::save_dir`].
    pub fn rotate_if_due(&self) -> Result<Option<u32>> {
        self.rotate_if_due_at(Timestamp::now())
    }

    pub fn rotate_if_due_at(&self, now: Timestamp) -> Result<Option<u32>> {
        if !self.rotation.enabled || !self.keystore.rotation_due(self.rotation.interval(), now)? {
            return Ok(None);
        }
        let current = self.keystore.current()?;
        let version = current.version() + 1;
        let next = KeySet::generate(&mut rng_chacha20(), version, current.salt())?;
        self.keystore.rotate_at(next, self.rotation.grace_period(), now)?;
        Ok(Some(version))
    }
}
