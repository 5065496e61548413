//! Converts wall-clock time into chain time.
//!
//! The chain-level constants are fetched once at startup and never refreshed:
//! a network does not change its genesis time or slot duration after launch.

use crate::types::{Epoch, Slot};
use parking_lot::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sync-committee period length used when the node's spec predates Altair and
/// omits the field.
pub const DEFAULT_EPOCHS_PER_SYNC_COMMITTEE_PERIOD: u64 = 256;

#[derive(Debug, PartialEq)]
pub enum Error {
    ZeroSecondsPerSlot,
    ZeroSlotsPerEpoch,
    ZeroEpochsPerSyncCommitteePeriod,
}

/// Chain-level timing constants.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTime {
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
    pub epochs_per_sync_committee_period: u64,
}

impl ChainTime {
    pub fn new(
        genesis_time: u64,
        seconds_per_slot: u64,
        slots_per_epoch: u64,
        epochs_per_sync_committee_period: u64,
    ) -> Result<Self, Error> {
        if seconds_per_slot == 0 {
            return Err(Error::ZeroSecondsPerSlot);
        }
        if slots_per_epoch == 0 {
            return Err(Error::ZeroSlotsPerEpoch);
        }
        if epochs_per_sync_committee_period == 0 {
            return Err(Error::ZeroEpochsPerSyncCommitteePeriod);
        }
        Ok(Self {
            genesis_time,
            seconds_per_slot,
            slots_per_epoch,
            epochs_per_sync_committee_period,
        })
    }

    /// Returns the slot at `now`, or `None` if `now` is prior to genesis.
    pub fn slot_of(&self, now: Duration) -> Option<Slot> {
        let since_genesis = now.checked_sub(Duration::from_secs(self.genesis_time))?;
        Some(Slot::new(since_genesis.as_secs() / self.seconds_per_slot))
    }

    /// The scheduler tick interval: roughly half a slot, so no slot boundary
    /// is missed by more than one tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs((self.seconds_per_slot / 2).max(1))
    }
}

/// A clock that reports the current epoch and slot.
pub trait ChainClock: Send + Sync {
    fn chain_time(&self) -> &ChainTime;

    /// The present time as a duration since the unix epoch. `None` if the
    /// system clock cannot be read.
    fn now_duration(&self) -> Option<Duration>;

    /// The current `(epoch, slot)`, or `None` prior to genesis.
    fn now(&self) -> Option<(Epoch, Slot)> {
        let chain_time = self.chain_time();
        let slot = chain_time.slot_of(self.now_duration()?)?;
        Some((slot.epoch(chain_time.slots_per_epoch), slot))
    }
}

/// Production clock backed by the system time.
pub struct SystemTimeChainClock {
    chain_time: ChainTime,
}

impl SystemTimeChainClock {
    pub fn new(chain_time: ChainTime) -> Self {
        Self { chain_time }
    }
}

impl ChainClock for SystemTimeChainClock {
    fn chain_time(&self) -> &ChainTime {
        &self.chain_time
    }

    fn now_duration(&self) -> Option<Duration> {
        SystemTime::now().duration_since(UNIX_EPOCH).ok()
    }
}

/// A clock where the current time is set manually. Used for testing.
pub struct ManualChainClock {
    chain_time: ChainTime,
    current: RwLock<Duration>,
}

impl ManualChainClock {
    pub fn new(chain_time: ChainTime, current: Duration) -> Self {
        Self {
            chain_time,
            current: RwLock::new(current),
        }
    }

    pub fn set_current_time(&self, now: Duration) {
        *self.current.write() = now;
    }

    pub fn advance(&self, duration: Duration) {
        *self.current.write() += duration;
    }
}

impl ChainClock for ManualChainClock {
    fn chain_time(&self) -> &ChainTime {
        &self.chain_time
    }

    fn now_duration(&self) -> Option<Duration> {
        Some(*self.current.read())
    }
}
