use crate::{
    config::Config,
    crypto::base::rng_chacha20,
    error::{Error, Result},
    keystore::{domain::RoleDomains, master::KeySet},
    util::Timestamp,
};
use chrono::Duration;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// A key set that has been rotated out but still opens old mappings until its
/// grace period runs out.
#[derive(Debug, Clone, getset::Getters, getset::CopyGetters)]
pub struct RetiredKeySet {
    #[getset(get = "pub")]
    keys: Arc<KeySet>,
    #[getset(get_copy = "pub")]
    valid_until: Timestamp,
}

/// An immutable view of every key set we know about. Readers hold one of these
/// for the length of an operation, so a concurrent rotation never hands them a
/// half-updated state.
#[derive(Debug, Clone)]
pub struct KeyRing {
    current: Arc<KeySet>,
    retired: Vec<RetiredKeySet>,
}

impl KeyRing {
    fn new(current: KeySet) -> Self {
        Self {
            current: Arc::new(current),
            retired: Vec::new(),
        }
    }

    /// The key set new material is derived under.
    pub fn current(&self) -> &Arc<KeySet> {
        &self.current
    }

    pub fn retired(&self) -> &[RetiredKeySet] {
        &self.retired
    }

    /// Find the key set for a version, as of `now`.
    pub fn keyset_at(&self, version: u32, now: Timestamp) -> Result<Arc<KeySet>> {
        if self.current.version() == version {
            return Ok(self.current.clone());
        }
        let retired = self
            .retired
            .iter()
            .find(|r| r.keys.version() == version)
            .ok_or(Error::KeyVersionUnknown(version))?;
        if now < retired.valid_until {
            Ok(retired.keys.clone())
        } else {
            Err(Error::KeyVersionRetired(version))
        }
    }

    /// Every version in the ring, newest first.
    pub fn versions(&self) -> Vec<u32> {
        let mut versions = vec![self.current.version()];
        versions.extend(self.retired.iter().map(|r| r.keys.version()));
        versions
    }
}

/// Holds the current key ring and swaps it out on rotation. Cloning the inner
/// `Arc` is the only thing readers do under the lock.
#[derive(Debug)]
pub struct MasterKeyStore {
    ring: RwLock<Arc<KeyRing>>,
    roles: RoleDomains,
}

impl MasterKeyStore {
    /// Create a store around a key set, using the default role table.
    pub fn new(keys: KeySet) -> Self {
        Self::with_roles(keys, RoleDomains::default())
    }

    pub fn with_roles(keys: KeySet, roles: RoleDomains) -> Self {
        Self {
            ring: RwLock::new(Arc::new(KeyRing::new(keys))),
            roles,
        }
    }

    /// Build a store from config: load the key set from `keys.dir` if one is
    /// set, otherwise generate a throwaway set in memory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let keys = match config.keys.dir.as_ref() {
            Some(dir) => {
                let keys = KeySet::load_dir(dir)?;
                if keys.version() != config.keys.key_version {
                    warn!(configured = config.keys.key_version, loaded = keys.version(), "key directory holds a different key version than configured");
                }
                if keys.salt() != &config.keys.salt {
                    Err(Error::Validation(String::from("key directory salt does not match the configured salt")))?;
                }
                keys
            }
            None => {
                warn!(key_version = config.keys.key_version, "no key directory configured, generating ephemeral master secrets");
                KeySet::generate(&mut rng_chacha20(), config.keys.key_version, &config.keys.salt)?
            }
        };
        Ok(Self::with_roles(keys, RoleDomains::with_overrides(&config.roles)))
    }

    /// The role -> domain table this store derives role keys with.
    pub fn roles(&self) -> &RoleDomains {
        &self.roles
    }

    /// Grab a consistent view of all key sets.
    pub fn snapshot(&self) -> Result<Arc<KeyRing>> {
        let guard = self.ring.read().map_err(|_| Error::KeystoreLockPoisoned)?;
        Ok(guard.clone())
    }

    /// The current key set.
    pub fn current(&self) -> Result<Arc<KeySet>> {
        Ok(self.snapshot()?.current().clone())
    }

    /// See [`KeyRing::keyset_at`].
    pub fn keyset_at(&self, version: u32, now: Timestamp) -> Result<Arc<KeySet>> {
        self.snapshot()?.keyset_at(version, now)
    }

    /// Rotate to a new key set. The old current set is retired with `grace` to
    /// live, measured from now.
    pub fn rotate(&self, keys: KeySet, grace: Duration) -> Result<()> {
        self.rotate_at(keys, grace, Timestamp::now())
    }

    /// Rotate as of a given time. The new set must be strictly newer than the
    /// current one and must keep the same fingerprint salt, otherwise every
    /// existing fingerprint would stop matching.
    ///
    /// Sets whose grace period has already ended are dropped from the ring here.
    pub fn rotate_at(&self, keys: KeySet, grace: Duration, now: Timestamp) -> Result<()> {
        let valid_until = now.offset(grace)?;
        let mut guard = self.ring.write().map_err(|_| Error::KeystoreLockPoisoned)?;
        let previous = guard.current.clone();
        if keys.version() <= previous.version() {
            Err(Error::KeystoreRotationOutOfOrder {
                current: previous.version(),
                requested: keys.version(),
            })?;
        }
        if keys.salt() != previous.salt() {
            Err(Error::Validation(String::from("rotation cannot change the fingerprint salt")))?;
        }

        let mut retired = Vec::with_capacity(guard.retired.len() + 1);
        retired.push(RetiredKeySet {
            keys: previous.clone(),
            valid_until,
        });
        for old in guard.retired.iter() {
            if now < old.valid_until {
                retired.push(old.clone());
            } else {
                warn!(key_version = old.keys.version(), "dropping key set past its grace period");
            }
        }
        let new_version = keys.version();
        *guard = Arc::new(KeyRing {
            current: Arc::new(keys),
            retired,
        });
        info!(from = previous.version(), to = new_version, grace_days = grace.num_days(), "rotated key set");
        Ok(())
    }

    /// True if the current set is at least `interval` old.
    pub fn rotation_due(&self, interval: Duration, now: Timestamp) -> Result<bool> {
        let current = self.current()?;
        Ok(current.generated_at().offset(interval)? <= now)
    }
}
