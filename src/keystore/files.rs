//! On-disk layout for key sets.
//!
//! ```text
//! <dir>/manifest.json
//! <dir>/domains/<domain name>.key           hex, mode 0600
//! <dir>/roles/<role>/<scope>/<window>.key   hex, mode 0600 (inspection only)
//! ```
//!
//! Role key artifacts are never read back. Role keys are always re-derived from
//! the domain masters, so the files only exist for operators to look at.

use crate::{
    derive::role_key::RoleKeyDeriver,
    error::{Error, Result},
    keystore::{
        domain::{Domain, RoleDomains},
        master::{KeyEncoding, KeySet, Manifest, MasterSecret},
    },
    util::{ser, Timestamp},
};
use chrono::Duration;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "manifest.json";
const DOMAINS_DIR: &str = "domains";
const ROLES_DIR: &str = "roles";

/// Write a file that only its owner may read.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    // an existing file keeps its old mode through open(), so set it explicitly
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_data()?;
    Ok(())
}

fn create_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Path segments come from role and scope names, so keep them boring.
fn path_segment(name: &str) -> Result<&str> {
    let ok = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(name)
    } else {
        Err(Error::Validation(format!("{:?} is not usable as a path segment", name)))
    }
}

impl KeySet {
    /// Write the manifest and one hex file per domain master into `dir`.
    pub fn save_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let domains_dir = dir.join(DOMAINS_DIR);
        create_private_dir(&domains_dir)?;
        for master in self.masters() {
            let path = domains_dir.join(format!("{}.key", master.domain().name()));
            master.save_file(&path, KeyEncoding::Hex)?;
        }
        let manifest = ser::to_json(&self.manifest())?;
        write_private(&dir.join(MANIFEST_FILE), manifest.as_bytes())?;
        info!(key_version = self.version(), dir = %dir.display(), "key set saved");
        Ok(())
    }

    /// Load a key set saved with [`KeySet::save_dir`]. Files in the domains
    /// directory that don't name a known domain are skipped.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest: Manifest = ser::from_json(&fs::read(dir.join(MANIFEST_FILE))?)?;
        let pattern = dir.join(DOMAINS_DIR).join("*.key");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| Error::Validation(String::from("key directory path is not utf8")))?;
        let paths = glob::glob(pattern).map_err(|e| Error::Validation(format!("bad key directory pattern: {}", e)))?;

        let mut masters = Vec::with_capacity(Domain::ALL.len());
        for entry in paths {
            let path = entry.map_err(|e| Error::IoError(e.into_error()))?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            match Domain::from_name(stem) {
                Some(domain) => {
                    masters.push(MasterSecret::load_file(&path, domain, manifest.key_version, KeyEncoding::Hex)?);
                    debug!(domain = %domain, "loaded domain master");
                }
                None => warn!(file = %path.display(), "skipping unrecognized key file"),
            }
        }
        let keys = KeySet::from_masters(manifest.key_version, &manifest.salt, manifest.generated_at, masters)?;
        info!(key_version = keys.version(), "key set loaded");
        Ok(keys)
    }
}

/// Turn a window into a short file-friendly label: whole days as `7d`, whole
/// hours as `24h`, anything else in minutes as `90m`.
pub fn format_window(window: Duration) -> String {
    let minutes = window.num_minutes();
    if minutes > 0 && minutes % (60 * 24) == 0 {
        format!("{}d", minutes / (60 * 24))
    } else if minutes > 0 && minutes % 60 == 0 {
        format!("{}h", minutes / 60)
    } else {
        format!("{}m", minutes)
    }
}

/// The inverse of [`format_window`]. Also accepts weeks (`2w`).
pub fn parse_window(label: &str) -> Result<Duration> {
    let bad = || Error::Validation(format!("bad time window {:?}", label));
    let split = label.len().checked_sub(1).ok_or_else(bad)?;
    if !label.is_char_boundary(split) {
        Err(bad())?;
    }
    let (num, unit) = label.split_at(split);
    let num: i64 = num.parse().map_err(|_| bad())?;
    if num <= 0 {
        Err(bad())?;
    }
    let window = match unit {
        "m" => Duration::try_minutes(num),
        "h" => Duration::try_hours(num),
        "d" => Duration::try_days(num),
        "w" => Duration::try_weeks(num),
        _ => None,
    };
    window.ok_or_else(bad)
}

/// Derive and write role keys for every role/scope/window combination given,
/// each expiring `window` after `now`. Returns the paths written.
pub fn write_role_key_artifacts<P: AsRef<Path>>(
    keys: &KeySet,
    roles: &RoleDomains,
    dir: P,
    grants: &[(&str, &str)],
    windows: &[Duration],
    now: Timestamp,
) -> Result<Vec<PathBuf>> {
    let deriver = RoleKeyDeriver::new(keys, roles);
    let mut written = Vec::new();
    for (role, scope) in grants {
        let scope_dir = dir.as_ref().join(ROLES_DIR).join(path_segment(role)?).join(path_segment(scope)?);
        create_private_dir(&scope_dir)?;
        for window in windows {
            let key = deriver.derive_role_key(role, scope, now.offset(*window)?)?;
            let path = scope_dir.join(format!("{}.key", format_window(*window)));
            let mut contents = key.to_hex().into_bytes();
            contents.push(b'\n');
            write_private(&path, &contents)?;
            written.push(path);
        }
    }
    info!(count = written.len(), key_version = keys.version(), "wrote role key artifacts");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test;

    #[test]
    fn keyset_dir_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let keys = test::keyset(2);
        keys.save_dir(dir.path()).unwrap();

        assert!(dir.path().join("manifest.json").exists());
        for domain in Domain::ALL {
            assert!(dir.path().join("domains").join(format!("{}.key", domain.name())).exists());
        }
        // stray files don't bother the loader
        fs::write(dir.path().join("domains").join("old_junk_v0.key"), "abcd").unwrap();

        let loaded = KeySet::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.version(), 2);
        assert_eq!(loaded.salt(), keys.salt());
        assert_eq!(loaded.generated_at(), keys.generated_at());
        for domain in Domain::ALL {
            assert_eq!(
                loaded.master(domain).unwrap().secret().expose_secret(),
                keys.master(domain).unwrap().secret().expose_secret(),
            );
        }
    }

    #[test]
    fn keyset_dir_missing_domain() {
        let dir = tempfile::tempdir().unwrap();
        let keys = test::keyset(1);
        keys.save_dir(dir.path()).unwrap();
        fs::remove_file(dir.path().join("domains").join("legal_correlation_v1.key")).unwrap();
        let res = KeySet::load_dir(dir.path());
        assert_eq!(res.err(), Some(Error::KeystoreDomainMissing(String::from("legal_correlation_v1"))));
    }

    #[test]
    fn windows_format_and_parse() {
        assert_eq!(format_window(Duration::hours(1)), "1h");
        assert_eq!(format_window(Duration::hours(24)), "1d");
        assert_eq!(format_window(Duration::days(30)), "30d");
        assert_eq!(format_window(Duration::minutes(90)), "90m");
        assert_eq!(parse_window("90m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_window("2w").unwrap(), Duration::days(14));
        assert_eq!(parse_window("365d").unwrap(), Duration::days(365));
        for bad in ["", "d", "0d", "-3h", "12y", "1.5h", "999999999999999d", "99999999999999999w"] {
            assert!(parse_window(bad).is_err(), "{:?}", bad);
        }
        for window in [Duration::hours(1), Duration::days(7), Duration::minutes(45)] {
            assert_eq!(parse_window(&format_window(window)).unwrap(), window);
        }
    }

    #[test]
    fn role_key_artifacts_written() {
        let dir = tempfile::tempdir().unwrap();
        let keys = test::keyset(1);
        let roles = RoleDomains::default();
        let now = Timestamp::from_unix(1_700_000_000);
        let written = write_role_key_artifacts(
            &keys,
            &roles,
            dir.path(),
            &[("moderator", "subforum_correlation"), ("legal_team", "legal_correlation")],
            &[Duration::hours(1), Duration::days(30)],
            now,
        )
        .unwrap();
        assert_eq!(written.len(), 4);
        let path = dir.path().join("roles/moderator/subforum_correlation/30d.key");
        assert!(written.contains(&path));

        let expected = RoleKeyDeriver::new(&keys, &roles)
            .derive_role_key("moderator", "subforum_correlation", now.offset(Duration::days(30)).unwrap())
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), expected.to_hex());

        let res = write_role_key_artifacts(&keys, &roles, dir.path(), &[("../moderator", "x")], &[Duration::hours(1)], now);
        assert!(matches!(res, Err(Error::Validation(_))));
        let res = write_role_key_artifacts(&keys, &roles, dir.path(), &[("janitor", "x")], &[Duration::hours(1)], now);
        assert!(matches!(res, Err(Error::AuthorizationDenied { .. })));
    }
}
