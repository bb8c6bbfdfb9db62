//! Simulated beacon runtime.
//!
//! Runs [`BeaconCore`] the way a driver would, but against virtual time: a
//! timer wheel replaces hardware timers, a recording radio replaces the
//! advertiser and an in-memory map replaces flash. Every run with the same
//! seed produces the same radio log.

use std::{collections::BTreeMap, time::Duration};

use eidbeacon_core::{
    BeaconAction, BeaconConfig, BeaconCore, BeaconError, BeaconEvent, DEFAULT_LOCK_KEY,
    FixedSensors, LogLevel, SlotIndex, StorageKey, Timer,
};
use eidbeacon_crypto::{AesKey, encrypt_block};
use eidbeacon_proto::{BroadcastFrame, Characteristic};

use crate::{
    invariants::{BeaconSnapshot, SlotSnapshot},
    sim_env::SimEnv,
};

/// Persisted records of a simulated beacon.
pub type SimStorage = BTreeMap<StorageKey, Vec<u8>>;

/// A radio command with the virtual time it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioRecord {
    /// Virtual time of the command
    pub at: Duration,
    /// What the radio was told to do
    pub command: RadioCommand,
}

/// Radio commands observed by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    /// Non-connectable advertising of a slot frame
    Advertise {
        /// Slot the frame belongs to
        slot: SlotIndex,
        /// Advertised frame
        frame: BroadcastFrame,
        /// Transmit power in dBm
        tx_power: i8,
    },
    /// Connectable advertising
    Connectable,
    /// Radio stopped
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    timer: Timer,
    deadline: Duration,
    period: Option<Duration>,
}

/// A beacon running in virtual time.
pub struct SimBeacon {
    core: BeaconCore<FixedSensors>,
    env: SimEnv,
    timers: Vec<ArmedTimer>,
    connectable_deadline: Option<Duration>,
    synced_to: Duration,
    radio: Vec<RadioRecord>,
    address_changes: usize,
    storage: SimStorage,
    fail_persistence: bool,
    persistence_errors: Vec<BeaconError>,
    logs: Vec<(LogLevel, String)>,
    last_read: Option<Vec<u8>>,
    connected: bool,
}

impl SimBeacon {
    /// Fresh beacon (no persisted state) with default configuration.
    pub fn new(seed: u64) -> Self {
        Self::boot(SimEnv::with_seed(seed), BeaconConfig::default(), SimStorage::new())
    }

    /// Boot a beacon from persisted records.
    pub fn boot(env: SimEnv, config: BeaconConfig, storage: SimStorage) -> Self {
        let mut beacon = Self {
            core: BeaconCore::new(
                config.clone(),
                AesKey::from_bytes(DEFAULT_LOCK_KEY),
                FixedSensors::default(),
            ),
            synced_to: env.elapsed(),
            env,
            timers: Vec::new(),
            connectable_deadline: None,
            radio: Vec::new(),
            address_changes: 0,
            storage,
            fail_persistence: false,
            persistence_errors: Vec::new(),
            logs: Vec::new(),
            last_read: None,
            connected: false,
        };
        beacon.restart(config);
        beacon
    }

    /// Power-cycle: rebuild the beacon from its storage. Pending timers and
    /// the connection are lost; virtual time keeps running. Call
    /// [`SimBeacon::start`] to resume broadcasting.
    pub fn restart(&mut self, config: BeaconConfig) {
        let storage = &self.storage;
        let (core, actions) = BeaconCore::restore(
            config,
            FixedSensors::default(),
            |key| storage.get(&key).cloned(),
            &self.env,
        );
        self.core = core;
        self.timers.clear();
        self.connectable_deadline = None;
        self.connected = false;
        self.synced_to = self.env.elapsed();
        self.execute(actions);
        let drained = self.core.drain(&self.env);
        self.execute(drained);
    }

    /// Start broadcasting.
    pub fn start(&mut self) {
        self.feed(BeaconEvent::Start);
    }

    /// Feed one event, execute its actions and drain deferred work.
    ///
    /// # Errors
    ///
    /// Whatever the beacon rejected. Deferred work is drained either way.
    pub fn dispatch(&mut self, event: BeaconEvent) -> Result<Vec<BeaconAction>, BeaconError> {
        self.sync_clock();
        let result = self.core.process_event(event, &self.env);
        if let Ok(actions) = &result {
            self.execute(actions.clone());
        }
        let drained = self.core.drain(&self.env);
        self.execute(drained);
        result
    }

    /// Run virtual time forward, firing every timer that expires.
    pub fn advance(&mut self, duration: Duration) {
        let end = self.env.elapsed() + duration;
        while let Some((deadline, due)) = self.next_due(end) {
            self.env.advance(deadline - self.env.elapsed());
            match due {
                Due::Timer(index) => {
                    let armed = self.timers[index];
                    match armed.period {
                        Some(period) => self.timers[index].deadline = deadline + period,
                        None => {
                            self.timers.remove(index);
                        },
                    }
                    self.feed(BeaconEvent::TimerFired(armed.timer));
                },
                Due::ConnectableTimeout => {
                    self.connectable_deadline = None;
                    self.feed(BeaconEvent::ConnectableTimeout);
                },
            }
        }
        self.env.advance(end - self.env.elapsed());
        self.sync_clock();
    }

    /// A peer connects.
    pub fn connect(&mut self) {
        self.connected = true;
        self.connectable_deadline = None;
        self.feed(BeaconEvent::Connected);
    }

    /// The peer disconnects.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.feed(BeaconEvent::Disconnected);
    }

    /// Press the registration button.
    pub fn trigger_registration(&mut self) {
        self.feed(BeaconEvent::RegistrationTriggered);
    }

    /// Peer read.
    ///
    /// # Errors
    ///
    /// The beacon's rejection.
    pub fn read(&mut self, characteristic: Characteristic) -> Result<Vec<u8>, BeaconError> {
        self.last_read = None;
        self.dispatch(BeaconEvent::Read(characteristic))?;
        Ok(self.last_read.take().unwrap_or_default())
    }

    /// Peer write.
    ///
    /// # Errors
    ///
    /// The beacon's rejection. Slot-data errors surface only in the log,
    /// since encoding is deferred.
    pub fn write(&mut self, characteristic: Characteristic, value: &[u8]) -> Result<(), BeaconError> {
        self.dispatch(BeaconEvent::Write { characteristic, value: value.to_vec() }).map(|_| ())
    }

    /// Run the challenge-response unlock with `lock_key`.
    ///
    /// # Errors
    ///
    /// `AccessDenied` if the key is wrong or the beacon is already unlocked.
    pub fn unlock(&mut self, lock_key: &[u8; 16]) -> Result<(), BeaconError> {
        let challenge = self.read(Characteristic::Unlock)?;
        let challenge: [u8; 16] = challenge.try_into().map_err(|_| {
            BeaconError::AccessDenied(Characteristic::Unlock)
        })?;
        self.write(Characteristic::Unlock, &encrypt_block(lock_key, &challenge))
    }

    /// Make every subsequent storage write fail.
    pub fn set_persistence_failure(&mut self, fail: bool) {
        self.fail_persistence = fail;
    }

    /// Beacon state machine.
    pub fn core(&self) -> &BeaconCore<FixedSensors> {
        &self.core
    }

    /// Shared simulation environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Every radio command so far.
    pub fn radio(&self) -> &[RadioRecord] {
        &self.radio
    }

    /// Frames advertised since `since`, with their slot.
    pub fn advertised_since(&self, since: Duration) -> Vec<(Duration, SlotIndex, BroadcastFrame)> {
        self.radio
            .iter()
            .filter(|record| record.at >= since)
            .filter_map(|record| match &record.command {
                RadioCommand::Advertise { slot, frame, .. } => {
                    Some((record.at, *slot, frame.clone()))
                },
                _ => None,
            })
            .collect()
    }

    /// Whether a peer is connected.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of random address changes.
    pub fn address_changes(&self) -> usize {
        self.address_changes
    }

    /// Persisted records.
    pub fn storage(&self) -> &SimStorage {
        &self.storage
    }

    /// Persistence failures reported to the beacon.
    pub fn persistence_errors(&self) -> &[BeaconError] {
        &self.persistence_errors
    }

    /// Log lines emitted by the beacon.
    pub fn logs(&self) -> &[(LogLevel, String)] {
        &self.logs
    }

    /// Whether `timer` is armed in the timer wheel.
    pub fn timer_armed(&self, timer: Timer) -> bool {
        self.timers.iter().any(|armed| armed.timer == timer)
    }

    /// Observable state for invariant checks.
    pub fn snapshot(&self) -> BeaconSnapshot {
        let store = self.core.slot_store();
        let security = self.core.security();
        BeaconSnapshot {
            at: self.env.elapsed(),
            slots: SlotIndex::all()
                .map(|slot| SlotSnapshot {
                    index: slot,
                    state: store.slot(slot).state(),
                    interval_ms: store.slot(slot).interval_ms(),
                    tx_power: store.slot(slot).tx_power(),
                    occupied: security.is_occupied(slot),
                    eid: security.eid(slot),
                    clock_seconds: security.clock_seconds(slot),
                })
                .collect(),
            lock_state: self.core.lock_state(),
            scheduler_state: self.core.scheduler().state(),
            armed_timers: [Timer::Interval, Timer::Slot, Timer::Etlm]
                .into_iter()
                .filter(|timer| self.core.scheduler().is_armed(*timer))
                .collect(),
            wheel_timers: self.timers.iter().map(|armed| armed.timer).collect(),
            advertisement_count: self.core.telemetry().advertisement_count(),
        }
    }

    fn sync_clock(&mut self) {
        let now = self.env.elapsed();
        let elapsed = now - self.synced_to;
        self.synced_to = now;
        if elapsed.is_zero() {
            return;
        }
        if let Ok(actions) = self.core.process_event(BeaconEvent::ClockElapsed(elapsed), &self.env)
        {
            self.execute(actions);
        }
        let drained = self.core.drain(&self.env);
        self.execute(drained);
    }

    fn next_due(&self, end: Duration) -> Option<(Duration, Due)> {
        let timer = self
            .timers
            .iter()
            .enumerate()
            .min_by_key(|(_, armed)| armed.deadline)
            .map(|(index, armed)| (armed.deadline, Due::Timer(index)));
        let connectable = self.connectable_deadline.map(|at| (at, Due::ConnectableTimeout));
        let next = match (timer, connectable) {
            (Some(t), Some(c)) => Some(if c.0 < t.0 { c } else { t }),
            (t, c) => t.or(c),
        };
        next.filter(|(deadline, _)| *deadline <= end)
    }

    fn execute(&mut self, actions: Vec<BeaconAction>) {
        let now = self.env.elapsed();
        for action in actions {
            match action {
                BeaconAction::Advertise { slot, frame, tx_power, .. } => {
                    self.radio.push(RadioRecord {
                        at: now,
                        command: RadioCommand::Advertise { slot, frame, tx_power },
                    });
                },
                BeaconAction::AdvertiseConnectable { timeout, .. } => {
                    self.radio.push(RadioRecord { at: now, command: RadioCommand::Connectable });
                    if !self.connected {
                        self.connectable_deadline = Some(now + timeout);
                    }
                },
                BeaconAction::StopAdvertising => {
                    self.radio.push(RadioRecord { at: now, command: RadioCommand::Stop });
                    self.connectable_deadline = None;
                },
                BeaconAction::StartTimer { timer, after, repeating } => {
                    self.timers.retain(|armed| armed.timer != timer);
                    self.timers.push(ArmedTimer {
                        timer,
                        deadline: now + after,
                        period: repeating.then_some(after),
                    });
                },
                BeaconAction::CancelTimer(timer) => {
                    self.timers.retain(|armed| armed.timer != timer);
                },
                BeaconAction::RandomizeAddress(_) => self.address_changes += 1,
                BeaconAction::Persist { key, value } => {
                    if self.fail_persistence {
                        let err = self.core.persistence_failed(key, "injected failure");
                        tracing::warn!("{err}");
                        self.persistence_errors.push(err);
                    } else {
                        self.storage.insert(key, value);
                        self.core.persistence_succeeded(key);
                    }
                },
                BeaconAction::ClearPersisted(key) => {
                    self.storage.remove(&key);
                },
                BeaconAction::ReadResponse { value, .. } => self.last_read = Some(value),
                BeaconAction::Log { level, message } => {
                    match level {
                        LogLevel::Debug => tracing::debug!("{message}"),
                        LogLevel::Info => tracing::info!("{message}"),
                        LogLevel::Warn => tracing::warn!("{message}"),
                        LogLevel::Error => tracing::error!("{message}"),
                    }
                    self.logs.push((level, message));
                },
            }
        }
    }

    fn feed(&mut self, event: BeaconEvent) {
        if let Err(err) = self.dispatch(event) {
            tracing::debug!("event rejected: {err}");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Due {
    Timer(usize),
    ConnectableTimeout,
}
