//! Domain types and the subset of the beacon node HTTP API consumed by the
//! duty monitor.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a BLS12-381 public key.
pub const PUBLIC_KEY_BYTES_LEN: usize = 48;

/// The smallest unit of chain time in which one block may be proposed.
///
/// Serializes as a quoted decimal string, per the beacon API convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u64);

/// A fixed-size group of consecutive slots; the granularity at which duties
/// are assigned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Slot {
    pub const fn new(slot: u64) -> Self {
        Self(slot)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn epoch(&self, slots_per_epoch: u64) -> Epoch {
        Epoch(self.0 / slots_per_epoch)
    }
}

impl Epoch {
    pub const fn new(epoch: u64) -> Self {
        Self(epoch)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Slot {
    fn from(slot: u64) -> Self {
        Self(slot)
    }
}

impl From<u64> for Epoch {
    fn from(epoch: u64) -> Self {
        Self(epoch)
    }
}

impl Serialize for Slot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        eth2_serde_utils::quoted_u64::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Slot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let slot: u64 = eth2_serde_utils::quoted_u64::deserialize(deserializer)?;
        Ok(Self(slot))
    }
}

impl Serialize for Epoch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        eth2_serde_utils::quoted_u64::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Epoch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let epoch: u64 = eth2_serde_utils::quoted_u64::deserialize(deserializer)?;
        Ok(Self(epoch))
    }
}

/// A normalized BLS public key: 96 lowercase hex characters, held without the
/// `0x` prefix but serialized with it, as the beacon API expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKeyHex(String);

impl PublicKeyHex {
    /// The bare hex characters, without the `0x` prefix.
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl FromStr for PublicKeyHex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let stripped = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let lowered = stripped.to_lowercase();
        let bytes = hex::decode(&lowered).map_err(|e| format!("invalid hex: {}", e))?;
        if bytes.len() != PUBLIC_KEY_BYTES_LEN {
            return Err(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_BYTES_LEN,
                bytes.len()
            ));
        }
        Ok(Self(lowered))
    }
}

impl fmt::Display for PublicKeyHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.0)
    }
}

impl Serialize for PublicKeyHex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKeyHex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The `{data: ...}` envelope wrapping every beacon API response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Serialize + serde::de::DeserializeOwned")]
pub struct GenericResponse<T: Serialize + serde::de::DeserializeOwned> {
    pub data: T,
}

/// An API error serializable to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub stacktraces: Vec<String>,
}

/// The subset of `GET config/spec` the monitor consumes. Unknown fields are
/// ignored; `EPOCHS_PER_SYNC_COMMITTEE_PERIOD` is absent on pre-Altair nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpec {
    #[serde(rename = "SECONDS_PER_SLOT", with = "eth2_serde_utils::quoted_u64")]
    pub seconds_per_slot: u64,
    #[serde(rename = "SLOTS_PER_EPOCH", with = "eth2_serde_utils::quoted_u64")]
    pub slots_per_epoch: u64,
    #[serde(
        rename = "EPOCHS_PER_SYNC_COMMITTEE_PERIOD",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub epochs_per_sync_committee_period: Option<eth2_serde_utils::quoted_u64::Quoted<u64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisData {
    #[serde(with = "eth2_serde_utils::quoted_u64")]
    pub genesis_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncingData {
    pub is_syncing: bool,
    pub head_slot: Slot,
    pub sync_distance: Slot,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    PendingInitialized,
    PendingQueued,
    ActiveOngoing,
    ActiveExiting,
    ActiveSlashed,
    ExitedUnslashed,
    ExitedSlashed,
    WithdrawalPossible,
    WithdrawalDone,
    Active,
    Pending,
    Exited,
    Withdrawal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorData {
    #[serde(with = "eth2_serde_utils::quoted_u64")]
    pub index: u64,
    #[serde(with = "eth2_serde_utils::quoted_u64")]
    pub balance: u64,
    pub status: ValidatorStatus,
    pub validator: ValidatorInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub pubkey: PublicKeyHex,
    pub withdrawal_credentials: String,
    #[serde(with = "eth2_serde_utils::quoted_u64")]
    pub effective_balance: u64,
    pub slashed: bool,
    pub activation_eligibility_epoch: Epoch,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
    pub withdrawable_epoch: Epoch,
}

/// Request body for `POST beacon/states/head/validators`.
#[derive(Clone, Serialize)]
pub struct ValidatorsRequestBody<'a> {
    pub ids: &'a [PublicKeyHex],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposerData {
    pub pubkey: PublicKeyHex,
    #[serde(with = "eth2_serde_utils::quoted_u64")]
    pub validator_index: u64,
    pub slot: Slot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDuty {
    pub pubkey: PublicKeyHex,
    #[serde(with = "eth2_serde_utils::quoted_u64")]
    pub validator_index: u64,
    #[serde(with = "eth2_serde_utils::quoted_u64_vec")]
    pub validator_sync_committee_indices: Vec<u64>,
}

/// Borrowed wrapper serializing validator indices as quoted integers, the
/// body shape of the sync duties endpoint.
#[derive(Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct ValidatorIndexDataRef<'a>(
    #[serde(serialize_with = "eth2_serde_utils::quoted_u64_vec::serialize")] pub &'a [u64],
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DutyType {
    Proposer,
    Sync,
}

impl fmt::Display for DutyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DutyType::Proposer => write!(f, "proposer"),
            DutyType::Sync => write!(f, "sync"),
        }
    }
}

/// Identity of a recorded duty. A ledger never holds two records with the
/// same key.
pub type DutyKey = (DutyType, Epoch, u64);

/// A detected duty as persisted in a ledger. `data` carries the duty exactly
/// as the node returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyRecord {
    pub duty_type: DutyType,
    pub epoch: Epoch,
    #[serde(with = "eth2_serde_utils::quoted_u64")]
    pub validator_index: u64,
    pub data: serde_json::Value,
}

impl DutyRecord {
    pub fn proposer(epoch: Epoch, duty: &ProposerData) -> Result<Self, serde_json::Error> {
        Ok(Self {
            duty_type: DutyType::Proposer,
            epoch,
            validator_index: duty.validator_index,
            data: serde_json::to_value(duty)?,
        })
    }

    pub fn sync(epoch: Epoch, duty: &SyncDuty) -> Result<Self, serde_json::Error> {
        Ok(Self {
            duty_type: DutyType::Sync,
            epoch,
            validator_index: duty.validator_index,
            data: serde_json::to_value(duty)?,
        })
    }

    pub fn identity(&self) -> DutyKey {
        (self.duty_type, self.epoch, self.validator_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK: &str = "800012708dc03f611751aad7a43a082142832b5c1aceed07ff9b543cf836381861352aa923c70eeb02018b638aa306aa";

    #[test]
    fn pubkey_normalization() {
        let bare: PublicKeyHex = PK.parse().unwrap();
        let prefixed: PublicKeyHex = format!("0x{}", PK).parse().unwrap();
        let shouty: PublicKeyHex = format!("0X{}", PK.to_uppercase()).parse().unwrap();
        assert_eq!(bare, prefixed);
        assert_eq!(bare, shouty);
        assert_eq!(bare.as_hex(), PK);
        assert_eq!(bare.to_string(), format!("0x{}", PK));
    }

    #[test]
    fn pubkey_rejects_bad_input() {
        assert!("".parse::<PublicKeyHex>().is_err());
        assert!("0xabcd".parse::<PublicKeyHex>().is_err());
        assert!(format!("zz{}", &PK[2..]).parse::<PublicKeyHex>().is_err());
    }

    #[test]
    fn pubkey_serializes_with_prefix() {
        let key: PublicKeyHex = PK.parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"0x{}\"", PK));
        let back: PublicKeyHex = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn slot_and_epoch_accept_quoted_and_bare_integers() {
        let slot: Slot = serde_json::from_str("\"33\"").unwrap();
        assert_eq!(slot, Slot::new(33));
        let slot: Slot = serde_json::from_str("33").unwrap();
        assert_eq!(slot, Slot::new(33));
        assert_eq!(serde_json::to_string(&Epoch::new(1)).unwrap(), "\"1\"");
    }

    #[test]
    fn config_spec_from_node_json() {
        let spec: ConfigSpec = serde_json::from_str(
            r#"{
                "SECONDS_PER_SLOT": "12",
                "SLOTS_PER_EPOCH": "32",
                "EPOCHS_PER_SYNC_COMMITTEE_PERIOD": "256",
                "MIN_PER_EPOCH_CHURN_LIMIT": "4"
            }"#,
        )
        .unwrap();
        assert_eq!(spec.seconds_per_slot, 12);
        assert_eq!(spec.slots_per_epoch, 32);
        assert_eq!(spec.epochs_per_sync_committee_period.map(|q| q.value), Some(256));
    }

    #[test]
    fn config_spec_without_sync_committee_period() {
        let spec: ConfigSpec =
            serde_json::from_str(r#"{"SECONDS_PER_SLOT": "12", "SLOTS_PER_EPOCH": "32"}"#).unwrap();
        assert_eq!(spec.epochs_per_sync_committee_period, None);
    }

    #[test]
    fn validator_data_from_node_json() {
        let json = format!(
            r#"{{
                "index": "42",
                "balance": "32000000000",
                "status": "active_ongoing",
                "validator": {{
                    "pubkey": "0x{}",
                    "withdrawal_credentials": "0x00f50428677c60f997aadeab24aabf7fceaef491c96a52b463ae91f95611cf71",
                    "effective_balance": "32000000000",
                    "slashed": false,
                    "activation_eligibility_epoch": "0",
                    "activation_epoch": "0",
                    "exit_epoch": "18446744073709551615",
                    "withdrawable_epoch": "18446744073709551615"
                }}
            }}"#,
            PK
        );
        let validator: ValidatorData = serde_json::from_str(&json).unwrap();
        assert_eq!(validator.index, 42);
        assert_eq!(validator.status, ValidatorStatus::ActiveOngoing);
        assert_eq!(validator.validator.pubkey.as_hex(), PK);
        assert_eq!(validator.validator.exit_epoch, Epoch::new(u64::MAX));
    }

    #[test]
    fn sync_duty_from_node_json() {
        let json = format!(
            r#"{{
                "pubkey": "0x{}",
                "validator_index": "7",
                "validator_sync_committee_indices": ["21", "133"]
            }}"#,
            PK
        );
        let duty: SyncDuty = serde_json::from_str(&json).unwrap();
        assert_eq!(duty.validator_index, 7);
        assert_eq!(duty.validator_sync_committee_indices, vec![21, 133]);
    }

    #[test]
    fn duty_record_identity() {
        let duty = ProposerData {
            pubkey: PK.parse().unwrap(),
            validator_index: 7,
            slot: Slot::new(48),
        };
        let record = DutyRecord::proposer(Epoch::new(1), &duty).unwrap();
        assert_eq!(record.identity(), (DutyType::Proposer, Epoch::new(1), 7));
        assert_eq!(record.data["slot"], serde_json::json!("48"));
    }

    #[test]
    fn validator_index_body_is_quoted() {
        let body = ValidatorIndexDataRef(&[1, 2, 3]);
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"["1","2","3"]"#);
    }
}
