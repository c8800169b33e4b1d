//! The journal records every first mutation before it reaches the partitions, and
//! then whether it was applied. A store that only ever sees a log line for a revision
//! lost the outcome of that operation.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::be::locks::mutex_lock;
use crate::ldif::{parse_ldif, LdifRecord};
use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalState {
    Pending,
    Acked,
    Nacked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub revision: u64,
    pub principal: String,
    pub record: LdifRecord,
    pub state: JournalState,
}

pub trait JournalStore: Send + Sync {
    fn log(&self, revision: u64, principal: &str, record: &LdifRecord) -> Result<(), OperationError>;

    fn ack(&self, revision: u64) -> Result<(), OperationError>;

    fn nack(&self, revision: u64) -> Result<(), OperationError>;

    fn records(&self) -> Result<Vec<JournalRecord>, OperationError>;

    fn sync(&self) -> Result<(), OperationError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryJournalStore {
    records: Mutex<Vec<JournalRecord>>,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, revision: u64, state: JournalState) -> Result<(), OperationError> {
        let mut records = mutex_lock(&self.records);
        match records.iter_mut().rev().find(|r| r.revision == revision) {
            Some(r) => {
                r.state = state;
                Ok(())
            }
            None => {
                admin_error!(revision, "journal has no record for revision");
                Err(OperationError::InvalidState)
            }
        }
    }
}

impl JournalStore for MemoryJournalStore {
    fn log(&self, revision: u64, principal: &str, record: &LdifRecord) -> Result<(), OperationError> {
        mutex_lock(&self.records).push(JournalRecord {
            revision,
            principal: principal.to_string(),
            record: record.clone(),
            state: JournalState::Pending,
        });
        Ok(())
    }

    fn ack(&self, revision: u64) -> Result<(), OperationError> {
        self.resolve(revision, JournalState::Acked)
    }

    fn nack(&self, revision: u64) -> Result<(), OperationError> {
        self.resolve(revision, JournalState::Nacked)
    }

    fn records(&self) -> Result<Vec<JournalRecord>, OperationError> {
        Ok(mutex_lock(&self.records).clone())
    }
}

const REVISION_PREFIX: &str = "# revision: ";
const PRINCIPAL_PREFIX: &str = "# principal: ";
const ACK_PREFIX: &str = "# ack: ";
const NACK_PREFIX: &str = "# nack: ";

struct FileJournalInner {
    writer: BufWriter<File>,
    logged: u64,
    rotated: u64,
    // Logged revisions whose outcome is not yet written. The file is not rotated
    // while any remain, so an outcome always lands next to its record.
    unresolved: BTreeSet<u64>,
}

/// Appends LDIF to a file. Each record is preceded by its revision and principal and
/// its outcome is appended as a later comment line, so the file stays valid LDIF.
pub struct FileJournalStore {
    path: PathBuf,
    rotation: u64,
    inner: Mutex<FileJournalInner>,
}

fn fs_err(path: &Path, e: std::io::Error) -> OperationError {
    admin_error!(path = %path.display(), ?e, "journal file error");
    OperationError::FsError
}

impl FileJournalStore {
    /// `rotation` is the number of revisions after which the file is moved aside to
    /// `<path>.<n>`, once none of them is waiting for its outcome. Zero never rotates.
    pub fn open(path: &Path, rotation: u64) -> Result<Self, OperationError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| fs_err(path, e))?;
        admin_info!(path = %path.display(), rotation, "opened journal");
        Ok(FileJournalStore {
            path: path.to_path_buf(),
            rotation,
            inner: Mutex::new(FileJournalInner {
                writer: BufWriter::new(file),
                logged: 0,
                rotated: 0,
                unresolved: BTreeSet::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, inner: &mut FileJournalInner, text: &str) -> Result<(), OperationError> {
        inner
            .writer
            .write_all(text.as_bytes())
            .and_then(|_| inner.writer.flush())
            .map_err(|e| fs_err(&self.path, e))
    }

    fn rotate(&self, inner: &mut FileJournalInner) -> Result<(), OperationError> {
        inner.writer.flush().map_err(|e| fs_err(&self.path, e))?;
        inner.rotated += 1;
        let mut target = self.path.clone().into_os_string();
        target.push(format!(".{}", inner.rotated));
        fs::rename(&self.path, &target).map_err(|e| fs_err(&self.path, e))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| fs_err(&self.path, e))?;
        inner.writer = BufWriter::new(file);
        inner.logged = 0;
        admin_info!(path = %self.path.display(), generation = inner.rotated, "rotated journal");
        Ok(())
    }

    /// Read back a journal file written by this store.
    pub fn read(path: &Path) -> Result<Vec<JournalRecord>, OperationError> {
        let text = fs::read_to_string(path).map_err(|e| fs_err(path, e))?;
        parse_journal(&text)
    }
}

impl JournalStore for FileJournalStore {
    fn log(&self, revision: u64, principal: &str, record: &LdifRecord) -> Result<(), OperationError> {
        let mut inner = mutex_lock(&self.inner);
        if self.rotation > 0 && inner.logged >= self.rotation && inner.unresolved.is_empty() {
            self.rotate(&mut inner)?;
        }
        let text = format!(
            "{}{}\n{}{}\n{}\n",
            REVISION_PREFIX, revision, PRINCIPAL_PREFIX, principal, record
        );
        self.append(&mut inner, &text)?;
        inner.logged += 1;
        inner.unresolved.insert(revision);
        Ok(())
    }

    fn ack(&self, revision: u64) -> Result<(), OperationError> {
        let mut inner = mutex_lock(&self.inner);
        self.append(&mut inner, &format!("{}{}\n\n", ACK_PREFIX, revision))?;
        inner.unresolved.remove(&revision);
        Ok(())
    }

    fn nack(&self, revision: u64) -> Result<(), OperationError> {
        let mut inner = mutex_lock(&self.inner);
        self.append(&mut inner, &format!("{}{}\n\n", NACK_PREFIX, revision))?;
        inner.unresolved.remove(&revision);
        Ok(())
    }

    fn records(&self) -> Result<Vec<JournalRecord>, OperationError> {
        self.sync()?;
        Self::read(&self.path)
    }

    fn sync(&self) -> Result<(), OperationError> {
        let mut inner = mutex_lock(&self.inner);
        inner.writer.flush().map_err(|e| fs_err(&self.path, e))?;
        inner
            .writer
            .get_ref()
            .sync_data()
            .map_err(|e| fs_err(&self.path, e))
    }
}

fn parse_marker(line: &str, prefix: &str) -> Result<Option<u64>, OperationError> {
    match line.strip_prefix(prefix) {
        Some(rest) => rest
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| OperationError::LdifParseError(format!("invalid journal marker: {}", line))),
        None => Ok(None),
    }
}

fn flush_record(
    revision: &mut Option<u64>,
    principal: &mut String,
    body: &mut String,
    out: &mut Vec<JournalRecord>,
) -> Result<(), OperationError> {
    if let Some(rev) = revision.take() {
        let mut records = parse_ldif(body)?;
        if records.len() != 1 {
            return Err(OperationError::LdifParseError(format!(
                "journal revision {} holds {} records",
                rev,
                records.len()
            )));
        }
        out.push(JournalRecord {
            revision: rev,
            principal: std::mem::take(principal),
            record: records.remove(0),
            state: JournalState::Pending,
        });
    }
    body.clear();
    Ok(())
}

fn parse_journal(text: &str) -> Result<Vec<JournalRecord>, OperationError> {
    let mut out: Vec<JournalRecord> = Vec::new();
    let mut revision: Option<u64> = None;
    let mut principal = String::new();
    let mut body = String::new();

    for line in text.lines() {
        if let Some(rev) = parse_marker(line, REVISION_PREFIX)? {
            flush_record(&mut revision, &mut principal, &mut body, &mut out)?;
            revision = Some(rev);
        } else if let Some(p) = line.strip_prefix(PRINCIPAL_PREFIX) {
            principal = p.to_string();
        } else if let Some(rev) = parse_marker(line, ACK_PREFIX)? {
            flush_record(&mut revision, &mut principal, &mut body, &mut out)?;
            set_state(&mut out, rev, JournalState::Acked);
        } else if let Some(rev) = parse_marker(line, NACK_PREFIX)? {
            flush_record(&mut revision, &mut principal, &mut body, &mut out)?;
            set_state(&mut out, rev, JournalState::Nacked);
        } else if revision.is_some() {
            body.push_str(line);
            body.push('\n');
        }
    }
    flush_record(&mut revision, &mut principal, &mut body, &mut out)?;
    Ok(out)
}

fn set_state(records: &mut [JournalRecord], revision: u64, state: JournalState) {
    if let Some(r) = records.iter_mut().rev().find(|r| r.revision == revision) {
        r.state = state;
    }
}

pub struct Journal {
    enabled: bool,
    revision: AtomicU64,
    store: Arc<dyn JournalStore>,
}

impl Journal {
    pub fn new(enabled: bool, store: Arc<dyn JournalStore>) -> Self {
        Journal {
            enabled,
            revision: AtomicU64::new(0),
            store,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, Arc::new(MemoryJournalStore::new()))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn current_revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &Arc<dyn JournalStore> {
        &self.store
    }

    /// Write `record` under a new revision. The returned guard nacks the revision if
    /// it is dropped unresolved.
    pub fn log(&self, principal: &str, record: &LdifRecord) -> Result<PendingRevision<'_>, OperationError> {
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        self.store.log(revision, principal, record)?;
        journal_info!(revision, dn = %record.dn(), changetype = record.changetype(), "journal logged");
        Ok(PendingRevision {
            journal: self,
            revision,
            resolved: false,
        })
    }
}

#[must_use]
pub struct PendingRevision<'a> {
    journal: &'a Journal,
    revision: u64,
    resolved: bool,
}

impl PendingRevision<'_> {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn ack(mut self) -> Result<(), OperationError> {
        self.resolved = true;
        journal_info!(revision = self.revision, "journal ack");
        self.journal.store.ack(self.revision)
    }

    pub fn nack(mut self) -> Result<(), OperationError> {
        self.resolved = true;
        journal_info!(revision = self.revision, "journal nack");
        self.journal.store.nack(self.revision)
    }
}

impl Drop for PendingRevision<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            if let Err(e) = self.journal.store.nack(self.revision) {
                journal_error!(revision = self.revision, ?e, "unable to nack abandoned revision");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{FileJournalStore, Journal, JournalState, JournalStore, MemoryJournalStore};
    use crate::ldif::LdifRecord;
    use crate::prelude::*;

    fn delete(dn: &str) -> LdifRecord {
        LdifRecord::Delete { dn: dn.to_string() }
    }

    #[test]
    fn test_journal_memory_ack_nack() {
        let store = Arc::new(MemoryJournalStore::new());
        let journal = Journal::new(true, store.clone());
        journal.log("admin", &delete("cn=a")).unwrap().ack().unwrap();
        journal.log("admin", &delete("cn=b")).unwrap().nack().unwrap();
        {
            let _abandoned = journal.log("admin", &delete("cn=c")).unwrap();
        }
        let states: Vec<_> = store
            .records()
            .unwrap()
            .into_iter()
            .map(|r| (r.revision, r.state))
            .collect();
        assert_eq!(
            states,
            vec![
                (1, JournalState::Acked),
                (2, JournalState::Nacked),
                (3, JournalState::Nacked)
            ]
        );
        assert_eq!(journal.current_revision(), 3);
    }

    #[test]
    fn test_journal_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.ldif");
        let store = Arc::new(FileJournalStore::open(&path, 0).unwrap());
        let journal = Journal::new(true, store.clone());

        let add = LdifRecord::Add(entry_init!(
            "cn=test,ou=system",
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_CN, "test"),
            (ATTR_SN, "TEST")
        ));
        journal.log("uid=admin,ou=system", &add).unwrap().ack().unwrap();
        let pending = journal.log("uid=admin,ou=system", &delete("cn=test,ou=system")).unwrap();

        let records = store.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record, add);
        assert_eq!(records[0].principal, "uid=admin,ou=system");
        assert_eq!(records[0].state, JournalState::Acked);
        assert_eq!(records[1].state, JournalState::Pending);

        pending.nack().unwrap();
        let records = FileJournalStore::read(&path).unwrap();
        assert_eq!(records[1].state, JournalState::Nacked);
    }

    #[test]
    fn test_journal_file_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.ldif");
        let store = Arc::new(FileJournalStore::open(&path, 2).unwrap());
        let journal = Journal::new(true, store.clone());
        for dn in ["cn=a", "cn=b", "cn=c"] {
            journal.log("admin", &delete(dn)).unwrap().ack().unwrap();
        }
        let rotated = FileJournalStore::read(&dir.path().join("journal.ldif.1")).unwrap();
        assert_eq!(rotated.len(), 2);
        let current = store.records().unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].revision, 3);
        assert_eq!(current[0].state, JournalState::Acked);
    }

    #[test]
    fn test_journal_rotation_waits_for_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.ldif");
        let store = Arc::new(FileJournalStore::open(&path, 1).unwrap());
        let journal = Journal::new(true, store.clone());

        let first = journal.log("admin", &delete("cn=a")).unwrap();
        // The first revision is still open, so the second joins it in the same file.
        let second = journal.log("admin", &delete("cn=b")).unwrap();
        first.ack().unwrap();
        second.nack().unwrap();
        journal.log("admin", &delete("cn=c")).unwrap().ack().unwrap();

        let rotated: Vec<_> = FileJournalStore::read(&dir.path().join("journal.ldif.1"))
            .unwrap()
            .into_iter()
            .map(|r| (r.revision, r.state))
            .collect();
        assert_eq!(
            rotated,
            vec![(1, JournalState::Acked), (2, JournalState::Nacked)]
        );
        let current = store.records().unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].revision, 3);
        assert_eq!(current[0].state, JournalState::Acked);
    }
}
