//! The watched public-key set and the most recent validator lookup.
//!
//! The watched set is loaded once at startup and immutable for the process
//! lifetime. The validator snapshot is replaced wholesale on each refresh and
//! persisted so the query server can serve it without touching the node.

use crate::client::{self, BeaconNodeHttpClient};
use crate::ledger::{self, write_json_atomic};
use crate::types::{PublicKeyHex, ValidatorData};
use log::{debug, info};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum Error {
    KeyFile(std::io::Error),
    InvalidPublicKey { line: usize, reason: String },
    EmptyKeySet,
    Beacon(client::Error),
    Persist(ledger::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Loads the watched public keys, one hex key per line. Blank lines are
/// skipped and duplicates dropped; any other malformed line is an error, as
/// is a file that yields no keys at all.
pub fn load_watched_keys(path: &Path) -> Result<Vec<PublicKeyHex>, Error> {
    let file = File::open(path).map_err(Error::KeyFile)?;
    let reader = BufReader::new(file);

    let mut keys = Vec::new();
    let mut seen = HashSet::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(Error::KeyFile)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key: PublicKeyHex = trimmed.parse().map_err(|reason| Error::InvalidPublicKey {
            line: index + 1,
            reason,
        })?;
        if seen.insert(key.clone()) {
            keys.push(key);
        } else {
            debug!("Ignoring duplicate watched key {}", key);
        }
    }

    if keys.is_empty() {
        return Err(Error::EmptyKeySet);
    }
    Ok(keys)
}

pub struct ValidatorRegistry {
    watched: Vec<PublicKeyHex>,
    validators: Vec<ValidatorData>,
    snapshot_path: PathBuf,
}

impl ValidatorRegistry {
    pub fn new(watched: Vec<PublicKeyHex>, snapshot_path: PathBuf) -> Self {
        Self {
            watched,
            validators: Vec::new(),
            snapshot_path,
        }
    }

    pub fn watched(&self) -> &[PublicKeyHex] {
        &self.watched
    }

    pub fn validators(&self) -> &[ValidatorData] {
        &self.validators
    }

    /// The registry is stale until every watched key has resolved to a
    /// validator record. Records that resolve and later change on chain are
    /// not re-polled; this keeps request volume proportional to the number
    /// of still-unknown keys.
    pub fn is_stale(&self) -> bool {
        self.validators.len() != self.watched.len()
    }

    pub fn indices(&self) -> Vec<u64> {
        self.validators.iter().map(|v| v.index).collect()
    }

    pub fn index_set(&self) -> HashSet<u64> {
        self.validators.iter().map(|v| v.index).collect()
    }

    /// Fetches the full watched set in one batched request, replaces the
    /// snapshot wholesale and persists it atomically.
    pub async fn refresh(&mut self, beacon: &BeaconNodeHttpClient) -> Result<(), Error> {
        info!(
            "Fetching validator records for {} watched keys",
            self.watched.len()
        );
        let response = beacon
            .post_beacon_states_validators(&self.watched)
            .await
            .map_err(Error::Beacon)?;

        // Only watched keys belong in the snapshot, whatever the node returned.
        let watched: HashSet<&PublicKeyHex> = self.watched.iter().collect();
        let mut snapshot = response.data;
        snapshot.retain(|v| watched.contains(&v.validator.pubkey));

        write_json_atomic(&self.snapshot_path, &snapshot).map_err(Error::Persist)?;

        if snapshot.len() == self.watched.len() {
            info!("All {} watched validators resolved", snapshot.len());
        } else {
            info!(
                "Resolved {} of {} watched validators",
                snapshot.len(),
                self.watched.len()
            );
        }
        self.validators = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const PK1: &str = "800012708dc03f611751aad7a43a082142832b5c1aceed07ff9b543cf836381861352aa923c70eeb02018b638aa306aa";
    const PK2: &str = "80001866ce324de7d80ec73be15e2d064dcf121adf1b34a0d679f2b9ecbab40ce021e03bb877e1a2fe72eaaf475e6e21";

    fn write_key_file(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("pubkeys");
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn validator(index: u64, pubkey: &str) -> ValidatorData {
        serde_json::from_value(serde_json::json!({
            "index": index.to_string(),
            "balance": "32000000000",
            "status": "active_ongoing",
            "validator": {
                "pubkey": format!("0x{}", pubkey),
                "withdrawal_credentials": "0x00f50428677c60f997aadeab24aabf7fceaef491c96a52b463ae91f95611cf71",
                "effective_balance": "32000000000",
                "slashed": false,
                "activation_eligibility_epoch": "0",
                "activation_epoch": "0",
                "exit_epoch": "18446744073709551615",
                "withdrawable_epoch": "18446744073709551615"
            }
        }))
        .unwrap()
    }

    #[test]
    fn loads_and_normalizes_keys() {
        let dir = TempDir::new().unwrap();
        let path = write_key_file(
            &dir,
            &format!("0x{}\n\n  {}  \n0X{}\n", PK1, PK2, PK1.to_uppercase()),
        );

        let keys = load_watched_keys(&path).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].as_hex(), PK1);
        assert_eq!(keys[1].as_hex(), PK2);
    }

    #[test]
    fn rejects_malformed_line() {
        let dir = TempDir::new().unwrap();
        let path = write_key_file(&dir, &format!("{}\nnot-a-key\n", PK1));

        match load_watched_keys(&path) {
            Err(Error::InvalidPublicKey { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write_key_file(&dir, "\n\n");

        assert!(matches!(load_watched_keys(&path), Err(Error::EmptyKeySet)));
    }

    #[test]
    fn rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("does-not-exist");

        assert!(matches!(load_watched_keys(&path), Err(Error::KeyFile(_))));
    }

    #[test]
    fn staleness_follows_snapshot_size() {
        let dir = TempDir::new().unwrap();
        let watched = vec![PK1.parse().unwrap(), PK2.parse().unwrap()];
        let mut registry = ValidatorRegistry::new(watched, dir.path().join("validators.json"));

        assert!(registry.is_stale());
        registry.validators = vec![validator(1, PK1)];
        assert!(registry.is_stale());
        registry.validators = vec![validator(1, PK1), validator(2, PK2)];
        assert!(!registry.is_stale());
        assert_eq!(registry.index_set(), [1, 2].into_iter().collect());
    }
}
