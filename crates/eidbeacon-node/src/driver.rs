//! Beacon driver.
//!
//! Ties [`BeaconCore`] to a [`Storage`] backend and an [`Environment`]. The
//! driver executes the storage and log actions itself and hands the radio
//! and timer actions back to the runtime.

use std::time::Duration;

use eidbeacon_core::{
    BeaconAction, BeaconConfig, BeaconCore, BeaconError, BeaconEvent, Environment, LogLevel,
    Sensors, StorageKey,
};
use eidbeacon_proto::{FrameType, url::encode_url};

use crate::{error::NodeError, storage::Storage};

/// Default clock tick period.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Beacon state machine configuration
    pub beacon: BeaconConfig,
    /// How often elapsed time is fed to the beacon clock
    pub tick: Duration,
    /// Open the connectable registration window right after start
    pub registration_at_start: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { beacon: BeaconConfig::default(), tick: DEFAULT_TICK, registration_at_start: false }
    }
}

impl NodeConfig {
    /// Make `url` the factory content of slot 0.
    ///
    /// Takes effect on a first boot and after a factory reset; a stored slot
    /// record wins otherwise.
    ///
    /// # Errors
    ///
    /// - `NodeError::Protocol` if the URL cannot be compressed into a frame
    pub fn with_url(mut self, url: &str) -> Result<Self, NodeError> {
        let (scheme, encoded) = encode_url(url)?;
        let mut write = vec![FrameType::Url.to_u8(), scheme];
        write.extend(encoded);
        self.beacon.slots.default_write = write;
        Ok(self)
    }
}

/// Action executor around a [`BeaconCore`].
pub struct BeaconDriver<E, S, Sn>
where
    E: Environment,
    S: Storage,
    Sn: Sensors,
{
    core: BeaconCore<Sn>,
    storage: S,
    env: E,
    /// Instant up to which elapsed time has been fed to the core
    synced_to: E::Instant,
}

impl<E, S, Sn> BeaconDriver<E, S, Sn>
where
    E: Environment,
    S: Storage,
    Sn: Sensors,
{
    /// Restore the beacon from `storage`.
    ///
    /// Returns the driver and the radio actions produced while restoring
    /// (address changes for restored EID slots). Broadcasting starts with
    /// [`BeaconEvent::Start`].
    ///
    /// # Errors
    ///
    /// - `NodeError::Storage` if any record cannot be read. Nothing is
    ///   written in that case.
    pub fn boot(
        env: E,
        storage: S,
        config: BeaconConfig,
        sensors: Sn,
    ) -> Result<(Self, Vec<BeaconAction>), NodeError> {
        storage.wait_for_idle()?;

        let mut load_error = None;
        let (core, actions) = BeaconCore::restore(
            config,
            sensors,
            |key| match storage.load(key) {
                Ok(value) => value,
                Err(err) => {
                    load_error.get_or_insert(err);
                    None
                },
            },
            &env,
        );
        if let Some(err) = load_error {
            return Err(err.into());
        }

        let synced_to = env.now();
        let mut driver = Self { core, storage, env, synced_to };
        let remaining = driver.execute(actions);
        tracing::info!(
            configured = driver.core.slot_store().enumerate_configured().len(),
            "beacon restored"
        );
        Ok((driver, remaining))
    }

    /// Process one event and execute storage and log actions.
    ///
    /// # Errors
    ///
    /// Peer errors from the core, meant for the configuring peer. Deferred
    /// work still runs, so a rejected slot write is persisted as unconfigured.
    pub fn handle(&mut self, event: BeaconEvent) -> Result<Vec<BeaconAction>, BeaconError> {
        let result = self.core.process_event(event, &self.env);
        let drained = self.core.drain(&self.env);
        match result {
            Ok(mut actions) => {
                actions.extend(drained);
                Ok(self.execute(actions))
            },
            Err(err) => {
                // a rejected write still has persistence to run
                self.execute(drained);
                Err(err)
            },
        }
    }

    /// Feed the time elapsed since the last tick to the beacon clock.
    pub fn tick(&mut self) -> Vec<BeaconAction> {
        let now = self.env.now();
        let elapsed = now - self.synced_to;
        self.synced_to = now;

        match self.handle(BeaconEvent::ClockElapsed(elapsed)) {
            Ok(actions) => actions,
            Err(err) => {
                tracing::error!(%err, "clock update rejected");
                Vec::new()
            },
        }
    }

    /// Beacon state machine.
    pub fn core(&self) -> &BeaconCore<Sn> {
        &self.core
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Run storage and log actions; return the rest in order.
    fn execute(&mut self, actions: Vec<BeaconAction>) -> Vec<BeaconAction> {
        let mut remaining = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                BeaconAction::Persist { key, value } => self.persist(key, &value),
                BeaconAction::ClearPersisted(key) => {
                    if let Err(err) = self.storage.clear(key) {
                        tracing::warn!(%key, %err, "failed to clear record");
                    }
                },
                BeaconAction::Log { level, message } => match level {
                    LogLevel::Debug => tracing::debug!("{}", message),
                    LogLevel::Info => tracing::info!("{}", message),
                    LogLevel::Warn => tracing::warn!("{}", message),
                    LogLevel::Error => tracing::error!("{}", message),
                },
                other => remaining.push(other),
            }
        }
        remaining
    }

    fn persist(&mut self, key: StorageKey, value: &[u8]) {
        match self.storage.store(key, value) {
            Ok(()) => self.core.persistence_succeeded(key),
            Err(err) => {
                let err = self.core.persistence_failed(key, &err.to_string());
                tracing::error!(%err, "failed to persist record");
            },
        }
    }
}

impl<E, S, Sn> std::fmt::Debug for BeaconDriver<E, S, Sn>
where
    E: Environment,
    S: Storage,
    Sn: Sensors,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconDriver")
            .field("lock_state", &self.core.lock_state())
            .field("intervals", &self.core.intervals())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use eidbeacon_core::{DEFAULT_LOCK_KEY, FixedSensors, SlotIndex, SlotState};
    use eidbeacon_harness::SimEnv;
    use eidbeacon_proto::{BroadcastFrame, Characteristic};

    use super::*;
    use crate::storage::{ChaoticStorage, MemoryStorage};

    type TestDriver<S> = BeaconDriver<SimEnv, S, FixedSensors>;

    fn boot<S: Storage>(storage: S, config: BeaconConfig) -> (TestDriver<S>, Vec<BeaconAction>) {
        BeaconDriver::boot(SimEnv::with_seed(1), storage, config, FixedSensors::default())
            .expect("storage readable")
    }

    #[test]
    fn first_boot_persists_default_lock_key() {
        let storage = MemoryStorage::new();

        let (driver, remaining) = boot(storage.clone(), BeaconConfig::default());

        assert_eq!(storage.load(StorageKey::LockKey), Ok(Some(DEFAULT_LOCK_KEY.to_vec())));
        assert!(remaining.iter().all(|a| !matches!(a, BeaconAction::Persist { .. })));
        assert_eq!(driver.core().slot_store().enumerate_configured(), vec![SlotIndex::FIRST]);
    }

    #[test]
    fn unreadable_storage_refuses_to_boot() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 1.0);

        let result =
            BeaconDriver::boot(SimEnv::with_seed(1), storage.clone(), BeaconConfig::default(), FixedSensors::default());

        assert!(matches!(result, Err(NodeError::Storage(_))));
        assert!(storage.inner().is_empty());
    }

    #[test]
    fn start_returns_radio_actions_only() {
        let (mut driver, _) = boot(MemoryStorage::new(), BeaconConfig::default());

        let actions = driver.handle(BeaconEvent::Start).expect("start");

        assert!(actions.iter().any(|a| matches!(a, BeaconAction::Advertise { .. })));
        assert!(actions.iter().all(|a| !matches!(a, BeaconAction::Log { .. })));
    }

    #[test]
    fn tick_feeds_elapsed_time() {
        let (mut driver, _) = boot(MemoryStorage::new(), BeaconConfig::default());
        let before = driver.core().telemetry().uptime_deciseconds();

        driver.env().advance(Duration::from_secs(3));
        driver.tick();

        assert_eq!(driver.core().telemetry().uptime_deciseconds(), before + 30);
    }

    #[test]
    fn peer_errors_pass_through() {
        let (mut driver, _) = boot(MemoryStorage::new(), BeaconConfig::default());
        driver.handle(BeaconEvent::Connected).expect("connect");

        let result = driver.handle(BeaconEvent::Read(Characteristic::SlotData));

        assert_eq!(result, Err(BeaconError::AccessDenied(Characteristic::SlotData)));
    }

    #[test]
    fn url_config_sets_factory_slot() {
        let config = NodeConfig::default().with_url("https://example.com").expect("encodable");

        let (driver, _) = boot(MemoryStorage::new(), config.beacon);

        let frame = driver.core().slot_store().ready_frame(SlotIndex::FIRST).expect("configured");
        assert!(matches!(frame, BroadcastFrame::Url(_)));
        assert_eq!(
            driver.core().slot_store().slot(SlotIndex::FIRST).state(),
            SlotState::Configured(FrameType::Url)
        );
    }

    #[test]
    fn overlong_url_is_rejected() {
        let result = NodeConfig::default().with_url("https://example.com/a/very/long/path/indeed");

        assert!(matches!(result, Err(NodeError::Protocol(_))));
    }
}
