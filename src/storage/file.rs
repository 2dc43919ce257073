use crate::{
    audit::{AuditRecord, CorrelationType},
    error::{Error, Result},
    storage::{
        memory::{count_matching, page_newest_first},
        AuditStore,
    },
    util::ser,
};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Log {
    file: File,
    records: Vec<AuditRecord>,
}

/// An audit log kept as json lines in a single file, one record per line.
/// Every append is flushed to disk before it returns.
#[derive(Debug)]
pub struct FileAuditStore {
    path: PathBuf,
    log: Mutex<Log>,
}

impl FileAuditStore {
    /// Open (or create) the log at `path`, loading whatever is already in it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        let complete = contents.iter().rposition(|b| *b == b'\n').map(|pos| pos + 1).unwrap_or(0);

        let mut records = Vec::new();
        for (idx, line) in contents[..complete].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record: AuditRecord =
                ser::from_json(line).map_err(|e| Error::Storage(format!("audit log line {} is corrupt: {}", idx + 1, e)))?;
            records.push(record);
        }

        // an unterminated last line is an append that never finished
        let tail = &contents[complete..];
        if !tail.iter().all(u8::is_ascii_whitespace) {
            match ser::from_json::<AuditRecord>(tail) {
                Ok(record) => {
                    file.write_all(b"\n")?;
                    file.sync_data()?;
                    records.push(record);
                }
                Err(e) => {
                    warn!(path = %path.display(), bytes = tail.len(), error = %e, "dropping partial trailing audit line");
                    file.set_len(complete as u64)?;
                    file.sync_data()?;
                }
            }
        }
        info!(path = %path.display(), records = records.len(), "opened audit log");
        Ok(Self {
            path,
            log: Mutex::new(Log { file, records }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditStore for FileAuditStore {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = ser::to_json_line(record)?;
        line.push('\n');
        let mut log = self.log.lock().map_err(|_| Error::Storage(String::from("lock poisoned")))?;
        let len = log.file.metadata()?.len();
        if let Err(e) = write_synced(&mut log.file, line.as_bytes()) {
            warn!(audit_id = %record.audit_id(), error = %e, "audit append failed, rolling back");
            log.file.set_len(len)?;
            Err(e)?;
        }
        log.records.push(record.clone());
        debug!(audit_id = %record.audit_id(), "audit record flushed");
        Ok(())
    }

    fn count(&self, filter: Option<CorrelationType>) -> Result<u64> {
        let log = self.log.lock().map_err(|_| Error::Storage(String::from("lock poisoned")))?;
        Ok(count_matching(&log.records, filter))
    }

    fn page(&self, filter: Option<CorrelationType>, offset: usize, limit: usize) -> Result<Vec<AuditRecord>> {
        let log = self.log.lock().map_err(|_| Error::Storage(String::from("lock poisoned")))?;
        Ok(page_newest_first(&log.records, filter, offset, limit))
    }
}

fn write_synced(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes)?;
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test;

    #[test]
    fn file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("correlations.jsonl");
        let rec1 = test::audit_record(CorrelationType::Fingerprint);
        let rec2 = test::audit_record(CorrelationType::Identity);
        {
            let store = FileAuditStore::open(&path).unwrap();
            store.append(&rec1).unwrap();
            store.append(&rec2).unwrap();
            assert_eq!(store.count(None).unwrap(), 2);
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);

        let store = FileAuditStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.count(None).unwrap(), 2);
        assert_eq!(store.page(None, 0, 10).unwrap(), vec![rec2.clone(), rec1.clone()]);
        assert_eq!(store.page(Some(CorrelationType::Fingerprint), 0, 10).unwrap(), vec![rec1]);

        let rec3 = test::audit_record(CorrelationType::Identity);
        store.append(&rec3).unwrap();
        assert_eq!(store.count(Some(CorrelationType::Identity)).unwrap(), 2);
    }

    #[test]
    fn file_store_corrupt_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "{\"not\": \"an audit record\"}\n").unwrap();
        assert!(matches!(FileAuditStore::open(&path), Err(Error::Storage(_))));
    }

    #[test]
    fn file_store_partial_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let rec1 = test::audit_record(CorrelationType::Fingerprint);
        let rec2 = test::audit_record(CorrelationType::Identity);
        let line1 = ser::to_json_line(&rec1).unwrap();
        let line2 = ser::to_json_line(&rec2).unwrap();
        std::fs::write(&path, format!("{}\n{}", line1, &line2[..line2.len() / 2])).unwrap();

        let store = FileAuditStore::open(&path).unwrap();
        assert_eq!(store.page(None, 0, 10).unwrap(), vec![rec1.clone()]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{}\n", line1));
        let rec3 = test::audit_record(CorrelationType::Identity);
        store.append(&rec3).unwrap();
        drop(store);

        let store = FileAuditStore::open(&path).unwrap();
        assert_eq!(store.page(None, 0, 10).unwrap(), vec![rec3, rec1]);
    }

    #[test]
    fn file_store_unterminated_record_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let rec1 = test::audit_record(CorrelationType::Fingerprint);
        std::fs::write(&path, ser::to_json_line(&rec1).unwrap()).unwrap();

        let store = FileAuditStore::open(&path).unwrap();
        let rec2 = test::audit_record(CorrelationType::Identity);
        store.append(&rec2).unwrap();
        drop(store);

        let store = FileAuditStore::open(&path).unwrap();
        assert_eq!(store.page(None, 0, 10).unwrap(), vec![rec2, rec1]);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
