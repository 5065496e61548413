//! The duty monitor control loop.
//!
//! A single sequential task ticks at roughly half-slot cadence and decides,
//! per tick, which of {proposer check, sync check, registry refresh} are due.
//! Last-run markers make each action fire at most once per epoch within one
//! process lifetime; across restarts the ledger's identity-key dedup absorbs
//! the re-issued checks.

use crate::chain_clock::{ChainClock, ChainTime, DEFAULT_EPOCHS_PER_SYNC_COMMITTEE_PERIOD};
use crate::client::{self, BeaconNodeHttpClient};
use crate::ledger::{self, DutyLedger, PROPOSER_DUTIES_FILE, SYNC_DUTIES_FILE};
use crate::registry::{self, ValidatorRegistry};
use crate::types::{DutyRecord, Epoch, Slot};
use log::{debug, error, info, warn};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;

/// Delay between sync-status polls while waiting for the node at startup.
const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum Error {
    Beacon(client::Error),
    Ledger(ledger::Error),
    Registry(registry::Error),
    Json(serde_json::Error),
    ChainTime(crate::chain_clock::Error),
}

impl From<client::Error> for Error {
    fn from(e: client::Error) -> Self {
        Error::Beacon(e)
    }
}

impl From<ledger::Error> for Error {
    fn from(e: ledger::Error) -> Self {
        Error::Ledger(e)
    }
}

impl From<registry::Error> for Error {
    fn from(e: registry::Error) -> Self {
        Error::Registry(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<crate::chain_clock::Error> for Error {
    fn from(e: crate::chain_clock::Error) -> Self {
        Error::ChainTime(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Blocks until the node reports that it has finished syncing.
///
/// Connection failures and error responses alike retry on a fixed interval:
/// without a synced node there is no valid chain time, so giving up is never
/// useful.
pub async fn wait_until_synced(beacon: &BeaconNodeHttpClient) {
    loop {
        match beacon.get_node_syncing().await {
            Ok(response) if !response.data.is_syncing => {
                info!(
                    "Beacon node is synced (head slot {})",
                    response.data.head_slot
                );
                return;
            }
            Ok(response) => {
                info!(
                    "Beacon node still syncing (head slot {}, distance {})",
                    response.data.head_slot, response.data.sync_distance
                );
            }
            Err(e) => {
                warn!("Unable to read sync status from beacon node: {}", e);
            }
        }
        sleep(SYNC_POLL_INTERVAL).await;
    }
}

/// Fetches the constants the chain clock is derived from. Called once at
/// startup; failure is fatal since nothing can be scheduled without them.
pub async fn fetch_chain_time(beacon: &BeaconNodeHttpClient) -> Result<ChainTime, Error> {
    let spec = beacon.get_config_spec().await?.data;
    let genesis = beacon.get_beacon_genesis().await?.data;

    let chain_time = ChainTime::new(
        genesis.genesis_time,
        spec.seconds_per_slot,
        spec.slots_per_epoch,
        spec.epochs_per_sync_committee_period
            .map(|quoted| quoted.value)
            .unwrap_or(DEFAULT_EPOCHS_PER_SYNC_COMMITTEE_PERIOD),
    )?;
    info!(
        "Chain time: genesis {}, {}s slots, {} slots per epoch",
        chain_time.genesis_time, chain_time.seconds_per_slot, chain_time.slots_per_epoch
    );
    Ok(chain_time)
}

/// The last epoch each scheduled action ran for. In-memory only.
#[derive(Debug, Default, PartialEq)]
pub struct ScheduleMarkers {
    last_proposer_epoch: Option<Epoch>,
    last_sync_epoch: Option<Epoch>,
    last_refresh_epoch: Option<Epoch>,
}

/// The actions due on one tick.
#[derive(Debug, Default, PartialEq)]
pub struct TickActions {
    pub check_proposer: Option<Epoch>,
    pub check_sync: Option<Epoch>,
    pub refresh_registry: bool,
}

impl ScheduleMarkers {
    /// Decides which actions fire this tick and marks them as fired.
    ///
    /// Proposer duties can shift at the epoch boundary, so the check runs
    /// once the epoch is half over. Sync-committee membership is final one
    /// epoch into each committee period. The registry refreshes at epoch
    /// boundaries while any watched key is still unresolved.
    pub fn plan(
        &mut self,
        epoch: Epoch,
        slot: Slot,
        registry_stale: bool,
        chain_time: &ChainTime,
    ) -> TickActions {
        let mut actions = TickActions::default();
        let slots_per_epoch = chain_time.slots_per_epoch;
        let slot_in_epoch = slot.as_u64() % slots_per_epoch;

        if slot_in_epoch == slots_per_epoch / 2 && self.last_proposer_epoch != Some(epoch) {
            self.last_proposer_epoch = Some(epoch);
            actions.check_proposer = Some(epoch);
        }

        if epoch.as_u64() % chain_time.epochs_per_sync_committee_period == 1
            && self.last_sync_epoch != Some(epoch)
        {
            self.last_sync_epoch = Some(epoch);
            actions.check_sync = Some(epoch);
        }

        if slot_in_epoch == 0 && registry_stale && self.last_refresh_epoch != Some(epoch) {
            self.last_refresh_epoch = Some(epoch);
            actions.refresh_registry = true;
        }

        actions
    }
}

/// See the module-level documentation.
pub struct DutyMonitor<C: ChainClock> {
    beacon: BeaconNodeHttpClient,
    clock: C,
    registry: ValidatorRegistry,
    ledger: DutyLedger,
    markers: ScheduleMarkers,
}

impl<C: ChainClock> DutyMonitor<C> {
    pub fn new(
        beacon: BeaconNodeHttpClient,
        clock: C,
        registry: ValidatorRegistry,
        ledger: DutyLedger,
    ) -> Self {
        Self {
            beacon,
            clock,
            registry,
            ledger,
            markers: ScheduleMarkers::default(),
        }
    }

    /// Runs the tick loop until `shutdown` fires or a fatal error occurs.
    /// The in-flight tick always completes before the loop exits.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<(), Error> {
        let tick_interval = self.clock.chain_time().tick_interval();
        info!(
            "Starting duty monitor loop ({}s ticks)",
            tick_interval.as_secs()
        );

        loop {
            self.tick().await?;

            tokio::select! {
                _ = sleep(tick_interval) => {}
                _ = &mut shutdown => {
                    info!("Duty monitor shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// One pass of the scheduler. Recoverable failures are logged and the
    /// action retries at its next cadence boundary; returned errors are
    /// fatal.
    async fn tick(&mut self) -> Result<(), Error> {
        let (epoch, slot) = match self.clock.now() {
            Some(now) => now,
            None => {
                debug!("Chain has not reached genesis");
                return Ok(());
            }
        };

        let registry_stale = self.registry.is_stale();
        let actions = {
            let chain_time = self.clock.chain_time();
            self.markers.plan(epoch, slot, registry_stale, chain_time)
        };

        if let Some(epoch) = actions.check_proposer {
            if let Err(e) = self.check_proposer_duties(epoch).await {
                match e {
                    Error::Beacon(e) => {
                        error!("Proposer duty check failed for epoch {}: {}", epoch, e)
                    }
                    e => return Err(e),
                }
            }
        }

        if let Some(epoch) = actions.check_sync {
            if let Err(e) = self.check_sync_duties(epoch).await {
                match e {
                    Error::Beacon(e) => {
                        error!("Sync duty check failed for epoch {}: {}", epoch, e)
                    }
                    e => return Err(e),
                }
            }
        }

        if actions.refresh_registry {
            if let Err(e) = self.registry.refresh(&self.beacon).await {
                match e {
                    // An unreachable node is transient; the next epoch
                    // boundary retries. Anything else (bad response, failed
                    // persist) leaves the monitor without a trustworthy
                    // index mapping and is fatal.
                    registry::Error::Beacon(e) if e.is_network() => {
                        warn!("Validator refresh failed: {}", e)
                    }
                    e => return Err(Error::Registry(e)),
                }
            }
        }

        Ok(())
    }

    async fn check_proposer_duties(&self, epoch: Epoch) -> Result<(), Error> {
        info!("Checking proposer duties for epoch {}", epoch);
        let duties = self.beacon.get_validator_duties_proposer(epoch).await?.data;

        let watched_indices = self.registry.index_set();
        let matching = duties
            .iter()
            .filter(|duty| watched_indices.contains(&duty.validator_index))
            .map(|duty| DutyRecord::proposer(epoch, duty))
            .collect::<Result<Vec<_>, _>>()?;

        if matching.is_empty() {
            info!("No proposer duties for watched validators in epoch {}", epoch);
            return Ok(());
        }
        let appended = self.ledger.append(PROPOSER_DUTIES_FILE, matching)?;
        info!(
            "Recorded {} new proposer duties for epoch {}",
            appended, epoch
        );
        Ok(())
    }

    async fn check_sync_duties(&self, epoch: Epoch) -> Result<(), Error> {
        let indices = self.registry.indices();
        if indices.is_empty() {
            debug!("No resolved validators; skipping sync duty check");
            return Ok(());
        }

        info!("Checking sync committee duties for epoch {}", epoch);
        let duties = self
            .beacon
            .post_validator_duties_sync(epoch, &indices)
            .await?
            .data;

        if duties.is_empty() {
            info!(
                "No sync committee duties for watched validators in epoch {}",
                epoch
            );
            return Ok(());
        }
        let records = duties
            .iter()
            .map(|duty| DutyRecord::sync(epoch, duty))
            .collect::<Result<Vec<_>, _>>()?;
        let appended = self.ledger.append(SYNC_DUTIES_FILE, records)?;
        info!(
            "Recorded {} new sync committee duties for epoch {}",
            appended, epoch
        );
        Ok(())
    }
}
