//! Append-only persisted duty ledgers.
//!
//! Each ledger is a flat JSON array rewritten atomically: the new document is
//! written to a temporary file in the same directory and renamed over the
//! target, so a concurrent reader observes either the old or the new ledger,
//! never a partial one. This is the only synchronization between the monitor
//! (sole writer) and the query server (readers).

use crate::types::{DutyKey, DutyRecord};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const VALIDATOR_SNAPSHOT_FILE: &str = "validators.json";
pub const PROPOSER_DUTIES_FILE: &str = "proposer_duties.json";
pub const SYNC_DUTIES_FILE: &str = "sync_duties.json";

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Json(serde_json::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Atomically replaces `path` with the JSON serialization of `value`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a JSON document, returning the default value when the file has not
/// been written yet.
pub fn read_json_or_default<T>(path: &Path) -> Result<T, Error>
where
    T: DeserializeOwned + Default,
{
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// The persisted duty ledgers. Named ledgers live under a single data
/// directory; appends are deduplicated by duty identity key.
pub struct DutyLedger {
    data_dir: PathBuf,
}

impl DutyLedger {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn path(&self, ledger: &str) -> PathBuf {
        self.data_dir.join(ledger)
    }

    /// All records in `ledger`, in append order. Empty if never written.
    pub fn read_all(&self, ledger: &str) -> Result<Vec<DutyRecord>, Error> {
        read_json_or_default(&self.path(ledger))
    }

    /// Appends the candidates whose identity key is not already present,
    /// preserving input order, and atomically rewrites the ledger. Returns
    /// the number of records actually appended.
    ///
    /// Must not race with itself on the same ledger; the monitor is the only
    /// writer and is strictly sequential, which guarantees this.
    pub fn append(&self, ledger: &str, candidates: Vec<DutyRecord>) -> Result<usize, Error> {
        let mut records = self.read_all(ledger)?;
        let mut seen: HashSet<DutyKey> = records.iter().map(DutyRecord::identity).collect();

        let fresh: Vec<DutyRecord> = candidates
            .into_iter()
            .filter(|record| seen.insert(record.identity()))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let appended = fresh.len();
        records.extend(fresh);
        write_json_atomic(&self.path(ledger), &records)?;
        Ok(appended)
    }
}
