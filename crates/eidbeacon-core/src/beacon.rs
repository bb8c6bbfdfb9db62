//! Event dispatch for the whole beacon.
//!
//! [`BeaconCore`] composes the security engine, slot store, scheduler and
//! telemetry. Drivers feed it [`BeaconEvent`]s and execute the returned
//! [`BeaconAction`]s: radio commands, timers, storage writes, read responses
//! and log lines. Nothing here performs I/O.
//!
//! # Driver loop
//!
//! ```text
//! loop {
//!     event   = next radio / timer / clock / peer event
//!     actions = core.process_event(event, &env)?   // peer errors → error status
//!     execute(actions)
//!     execute(core.drain(&env))                    // deferred encoding and persistence
//! }
//! ```

use std::time::Duration;

use eidbeacon_crypto::AesKey;
use eidbeacon_proto::{BroadcastFrame, Characteristic, LockStateValue, TlmFrame};

use crate::{
    clock::TickAccumulator,
    config_service::ConfigSession,
    env::Environment,
    error::BeaconError,
    lock::DEFAULT_LOCK_KEY,
    persist::{self, StorageKey, StoredSlot},
    scheduler::{
        AdvertisingIntervals, Broadcast, FrameSource, Scheduler, SchedulerAction, SchedulerConfig,
        Timer,
    },
    security::{SecurityEngine, SecurityEvent},
    slot::SlotIndex,
    slot_store::{SlotStore, SlotStoreConfig},
    telemetry::{Sensors, Telemetry},
    work::{WorkItem, WorkQueue},
};

/// Log severity of a [`BeaconAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Routine detail
    Debug,
    /// State changes worth seeing in production
    Info,
    /// Rejected input or degraded operation
    Warn,
    /// Local faults
    Error,
}

/// Inputs to the beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeaconEvent {
    /// Boot finished; begin broadcasting
    Start,
    /// Wall-clock time passed
    ClockElapsed(Duration),
    /// A scheduler timer expired
    TimerFired(Timer),
    /// A configuring peer connected
    Connected,
    /// The configuring peer disconnected
    Disconnected,
    /// Connectable advertising ended without a connection
    ConnectableTimeout,
    /// The registration button was pressed
    RegistrationTriggered,
    /// Peer read of a configuration resource
    Read(Characteristic),
    /// Peer write of a configuration resource
    Write {
        /// Resource written
        characteristic: Characteristic,
        /// Written bytes
        value: Vec<u8>,
    },
    /// One fragment of a long write
    PrepareWrite {
        /// Resource written
        characteristic: Characteristic,
        /// Offset of the fragment
        offset: usize,
        /// Fragment bytes
        value: Vec<u8>,
    },
    /// Commit the accumulated long write
    ExecuteWrite,
    /// Discard the accumulated long write
    CancelWrite,
}

/// Outputs for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeaconAction {
    /// Start non-connectable advertising of a frame
    Advertise {
        /// Slot the frame belongs to
        slot: SlotIndex,
        /// Frame to advertise
        frame: BroadcastFrame,
        /// Radio advertising interval
        interval_ms: u16,
        /// Radio transmit power in dBm
        tx_power: i8,
    },
    /// Start connectable advertising
    AdvertiseConnectable {
        /// Radio advertising interval
        interval: Duration,
        /// Stop after this long without a connection
        timeout: Duration,
    },
    /// Stop the radio
    StopAdvertising,
    /// Arm a timer; expiry comes back as [`BeaconEvent::TimerFired`]
    StartTimer {
        /// Timer to arm
        timer: Timer,
        /// Expiry
        after: Duration,
        /// Re-fire every `after` until cancelled
        repeating: bool,
    },
    /// Disarm a timer
    CancelTimer(Timer),
    /// Switch to a new random device address
    RandomizeAddress([u8; 6]),
    /// Write a record
    Persist {
        /// Storage key
        key: StorageKey,
        /// Encoded record
        value: Vec<u8>,
    },
    /// Delete a record
    ClearPersisted(StorageKey),
    /// Answer a peer read
    ReadResponse {
        /// Resource read
        characteristic: Characteristic,
        /// Value returned
        value: Vec<u8>,
    },
    /// Emit a log line
    Log {
        /// Severity
        level: LogLevel,
        /// Message
        message: String,
    },
}

impl BeaconAction {
    pub(crate) fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log { level, message: message.into() }
    }
}

/// Beacon configuration.
#[derive(Debug, Clone, Default)]
pub struct BeaconConfig {
    /// Slot defaults and capabilities
    pub slots: SlotStoreConfig,
    /// Scheduler timing
    pub scheduler: SchedulerConfig,
}

/// The complete beacon state machine.
///
/// Generic over the sensor source so simulations can script readings.
#[derive(Debug)]
pub struct BeaconCore<S: Sensors> {
    pub(crate) security: SecurityEngine,
    pub(crate) store: SlotStore,
    pub(crate) scheduler: Scheduler,
    pub(crate) telemetry: Telemetry,
    pub(crate) sensors: S,
    pub(crate) work: WorkQueue,
    pub(crate) session: ConfigSession,
    clock: TickAccumulator,
}

impl<S: Sensors> BeaconCore<S> {
    /// Beacon with factory slot defaults, locked under `lock_key`.
    pub fn new(config: BeaconConfig, lock_key: AesKey, sensors: S) -> Self {
        Self {
            security: SecurityEngine::new(lock_key),
            store: SlotStore::new(config.slots),
            scheduler: Scheduler::new(config.scheduler),
            telemetry: Telemetry::new(),
            sensors,
            work: WorkQueue::new(),
            session: ConfigSession::default(),
            clock: TickAccumulator::seconds(),
        }
    }

    /// Rebuild a beacon from persisted records.
    ///
    /// `load` returns the bytes stored under a key. Without a stored lock key
    /// the beacon uses [`DEFAULT_LOCK_KEY`] and persists it. Slots without a
    /// record keep the factory defaults. Corrupt records are logged and
    /// skipped.
    pub fn restore<E: Environment>(
        config: BeaconConfig,
        sensors: S,
        mut load: impl FnMut(StorageKey) -> Option<Vec<u8>>,
        env: &E,
    ) -> (Self, Vec<BeaconAction>) {
        let mut actions = Vec::new();
        let stored_lock_key = load(StorageKey::LockKey)
            .map(|bytes| persist::decode_raw::<16>(StorageKey::LockKey, &bytes));
        let lock_key = match stored_lock_key {
            Some(Ok(key)) => key,
            missing_or_corrupt => {
                if let Some(Err(err)) = missing_or_corrupt {
                    actions.push(BeaconAction::log(LogLevel::Error, err.to_string()));
                }
                actions.push(BeaconAction::Persist {
                    key: StorageKey::LockKey,
                    value: DEFAULT_LOCK_KEY.to_vec(),
                });
                DEFAULT_LOCK_KEY
            },
        };
        let mut core = Self::new(config, AesKey::from_bytes(lock_key), sensors);

        for slot in SlotIndex::all() {
            let key = StorageKey::KeyPair(slot);
            let Some(bytes) = load(key) else { continue };
            match persist::decode_raw::<32>(key, &bytes) {
                Ok(secret) => core.restore_key_pair(slot, secret),
                Err(err) => actions.push(BeaconAction::log(LogLevel::Error, err.to_string())),
            }
        }

        for slot in SlotIndex::all() {
            let key = StorageKey::Slot(slot);
            let Some(bytes) = load(key) else { continue };
            let had_key_pair = core.security.public_key(slot).is_some();
            let restored = persist::decode::<StoredSlot>(key, &bytes)
                .and_then(|record| core.restore_slot(slot, &record, env));
            match restored {
                Ok(restored) => actions.extend(restored),
                Err(err) => {
                    actions.push(BeaconAction::log(
                        LogLevel::Error,
                        format!("slot {slot} not restored: {err}"),
                    ));
                    if had_key_pair && core.security.public_key(slot).is_none() {
                        actions.push(BeaconAction::ClearPersisted(StorageKey::KeyPair(slot)));
                    }
                },
            }
        }
        (core, actions)
    }

    /// Rebuild a slot from its persistence record (boot only).
    ///
    /// # Errors
    ///
    /// - `BeaconError::PersistenceFailure` or a slot-write error for a corrupt
    ///   record; the slot is left unconfigured
    pub fn restore_slot<E: Environment>(
        &mut self,
        slot: SlotIndex,
        record: &StoredSlot,
        env: &E,
    ) -> Result<Vec<BeaconAction>, BeaconError> {
        let events = self.store.restore_slot(slot, record, &mut self.security, env)?;
        self.prime_telemetry(slot);
        Ok(self.security_actions(&events, env))
    }

    /// Reinstall a persisted key pair (boot only, before `restore_slot`).
    pub fn restore_key_pair(&mut self, slot: SlotIndex, secret: [u8; 32]) {
        self.security.restore_key_pair(slot, secret);
    }

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Errors are peer errors (access denied, rejected values) to be answered
    /// on the configuration link. A rejected slot-data write leaves the slot
    /// unconfigured and queues its persistence, so callers still run
    /// [`BeaconCore::drain`]; any other error leaves state unchanged.
    pub fn process_event<E: Environment>(
        &mut self,
        event: BeaconEvent,
        env: &E,
    ) -> Result<Vec<BeaconAction>, BeaconError> {
        match event {
            BeaconEvent::Start => {
                let mut actions = vec![BeaconAction::log(LogLevel::Info, "beacon started")];
                actions.extend(self.schedule(env, |scheduler, src| scheduler.start(src)));
                Ok(actions)
            },
            BeaconEvent::ClockElapsed(elapsed) => Ok(self.advance_clock(elapsed, env)),
            BeaconEvent::TimerFired(timer) => {
                Ok(self.schedule(env, |scheduler, src| scheduler.on_timer(timer, src)))
            },
            BeaconEvent::Connected => Ok(self.handle_connected(env)),
            BeaconEvent::Disconnected => Ok(self.handle_disconnected(env)),
            BeaconEvent::ConnectableTimeout => {
                Ok(self.schedule(env, |scheduler, src| scheduler.connectable_timeout(src)))
            },
            BeaconEvent::RegistrationTriggered => {
                let actions = self.scheduler.registration_triggered();
                Ok(self.scheduler_actions(actions))
            },
            BeaconEvent::Read(characteristic) => self.handle_read(characteristic, env),
            BeaconEvent::Write { characteristic, value } => {
                self.handle_write(characteristic, &value, env)
            },
            BeaconEvent::PrepareWrite { characteristic, offset, value } => {
                self.handle_prepare_write(characteristic, offset, &value)
            },
            BeaconEvent::ExecuteWrite => self.handle_execute_write(env),
            BeaconEvent::CancelWrite => {
                self.session.long_write.clear();
                Ok(Vec::new())
            },
        }
    }

    /// Run all deferred work.
    ///
    /// Failures are reported as log actions; a failed slot encode leaves the
    /// slot unconfigured and persists it that way.
    pub fn drain<E: Environment>(&mut self, env: &E) -> Vec<BeaconAction> {
        let mut actions = Vec::new();
        while let Some(item) = self.work.pop() {
            match item {
                WorkItem::EncodeSlot(slot) => {
                    let had_key_pair = self.security.public_key(slot).is_some();
                    match self.store.encode_staged(slot, &mut self.security, env) {
                        Ok(events) => {
                            self.prime_telemetry(slot);
                            actions.push(BeaconAction::log(
                                LogLevel::Info,
                                format!(
                                    "slot {slot} configured: {:?}",
                                    self.store.slot(slot).state()
                                ),
                            ));
                            actions.extend(self.security_actions(&events, env));
                            self.work.push(WorkItem::PersistSlot(slot));
                        },
                        Err(err) => {
                            actions.push(BeaconAction::log(
                                LogLevel::Warn,
                                format!("slot {slot} write rejected: {err}"),
                            ));
                            self.write_rejected(slot, had_key_pair);
                        },
                    }
                },
                WorkItem::PersistSlot(slot) => actions.extend(self.persist_slot(slot)),
                WorkItem::DiscardKeyPair(slot) => {
                    actions.push(BeaconAction::ClearPersisted(StorageKey::KeyPair(slot)));
                },
            }
        }
        actions
    }

    /// Report a storage write or delete that failed.
    ///
    /// Slot records are flagged unpersisted until a later write succeeds.
    pub fn persistence_failed(&mut self, key: StorageKey, reason: &str) -> BeaconError {
        if let StorageKey::Slot(slot) = key {
            self.store.set_unpersisted(slot, true);
        }
        BeaconError::PersistenceFailure { key: key.to_string(), reason: reason.to_string() }
    }

    /// Report a storage write or delete that succeeded.
    pub fn persistence_succeeded(&mut self, key: StorageKey) {
        if let StorageKey::Slot(slot) = key {
            self.store.set_unpersisted(slot, false);
        }
    }

    /// Security engine.
    pub fn security(&self) -> &SecurityEngine {
        &self.security
    }

    /// Slot store.
    pub fn slot_store(&self) -> &SlotStore {
        &self.store
    }

    /// Scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Intervals of the current pass.
    pub fn intervals(&self) -> AdvertisingIntervals {
        self.scheduler.intervals()
    }

    /// Telemetry counters.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Lock state.
    pub fn lock_state(&self) -> LockStateValue {
        self.security.lock().state()
    }

    /// Slot addressed by per-slot configuration resources.
    pub fn active_slot(&self) -> SlotIndex {
        self.session.active_slot
    }

    /// Number of deferred work items.
    pub fn pending_work(&self) -> usize {
        self.work.len()
    }

    /// Queue the persistence a rejected slot write needs: the now-empty slot
    /// record, and removal of a key pair the rejection destroyed.
    pub(crate) fn write_rejected(&mut self, slot: SlotIndex, had_key_pair: bool) {
        self.work.push(WorkItem::PersistSlot(slot));
        if had_key_pair && self.security.public_key(slot).is_none() {
            self.work.push(WorkItem::DiscardKeyPair(slot));
        }
    }

    pub(crate) fn schedule<E: Environment>(
        &mut self,
        env: &E,
        run: impl FnOnce(&mut Scheduler, &mut BroadcastContext<'_, S, E>) -> Vec<SchedulerAction>,
    ) -> Vec<BeaconAction> {
        let mut src = BroadcastContext {
            store: &mut self.store,
            security: &self.security,
            telemetry: &mut self.telemetry,
            sensors: &self.sensors,
            env,
        };
        let actions = run(&mut self.scheduler, &mut src);
        self.scheduler_actions(actions)
    }

    pub(crate) fn scheduler_actions(&mut self, actions: Vec<SchedulerAction>) -> Vec<BeaconAction> {
        actions
            .into_iter()
            .map(|action| match action {
                SchedulerAction::Advertise { slot, frame, interval_ms, tx_power } => {
                    self.telemetry.record_advertisement();
                    BeaconAction::Advertise { slot, frame, interval_ms, tx_power }
                },
                SchedulerAction::AdvertiseConnectable { interval, timeout } => {
                    self.telemetry.record_advertisement();
                    BeaconAction::AdvertiseConnectable { interval, timeout }
                },
                SchedulerAction::StopAdvertising => BeaconAction::StopAdvertising,
                SchedulerAction::StartTimer { timer, after, repeating } => {
                    BeaconAction::StartTimer { timer, after, repeating }
                },
                SchedulerAction::CancelTimer(timer) => BeaconAction::CancelTimer(timer),
                SchedulerAction::GlobalIntervalEnlarged { from_ms, to_ms } => BeaconAction::log(
                    LogLevel::Info,
                    format!("global interval enlarged from {from_ms} ms to {to_ms} ms"),
                ),
            })
            .collect()
    }

    pub(crate) fn security_actions<E: Environment>(
        &mut self,
        events: &[SecurityEvent],
        env: &E,
    ) -> Vec<BeaconAction> {
        let mut actions = Vec::new();
        for event in events {
            match event {
                SecurityEvent::EidRotated { slot, eid } => {
                    actions.push(BeaconAction::RandomizeAddress(env.random_array()));
                    actions.push(BeaconAction::log(
                        LogLevel::Debug,
                        format!("slot {slot} EID {}", hex::encode(eid)),
                    ));
                },
                SecurityEvent::EcdhReady(slot) => actions.push(BeaconAction::log(
                    LogLevel::Info,
                    format!("slot {slot} key exchange complete"),
                )),
                SecurityEvent::IdentityKeyReady { slot, .. } => {
                    actions.push(BeaconAction::log(
                        LogLevel::Info,
                        format!("slot {slot} identity key installed"),
                    ));
                    self.work.push(WorkItem::PersistSlot(*slot));
                },
                SecurityEvent::KeyPairCreated(slot) => {
                    if let Some(secret) = self.security.key_pair_secret(*slot) {
                        actions.push(BeaconAction::Persist {
                            key: StorageKey::KeyPair(*slot),
                            value: secret.to_vec(),
                        });
                    }
                },
                SecurityEvent::KeyPairDiscarded(slot) => {
                    actions.push(BeaconAction::ClearPersisted(StorageKey::KeyPair(*slot)));
                },
                SecurityEvent::PersistTimeRequested(slot) => {
                    self.work.push(WorkItem::PersistSlot(*slot));
                },
                SecurityEvent::Unlocked => {
                    actions.push(BeaconAction::log(LogLevel::Info, "unlocked"));
                },
                SecurityEvent::LockKeyChanged => {
                    actions.push(BeaconAction::Persist {
                        key: StorageKey::LockKey,
                        value: self.security.lock().key().as_bytes().to_vec(),
                    });
                    actions.push(BeaconAction::log(LogLevel::Info, "lock key changed"));
                },
            }
        }
        actions
    }

    fn advance_clock<E: Environment>(&mut self, elapsed: Duration, env: &E) -> Vec<BeaconAction> {
        self.telemetry.advance(elapsed);
        let seconds = self.clock.accumulate(elapsed);
        if seconds == 0 {
            return Vec::new();
        }
        let events = self.security.advance_clock(u32::try_from(seconds).unwrap_or(u32::MAX));
        self.store.apply_security_events(&events);
        self.security_actions(&events, env)
    }

    fn handle_connected<E: Environment>(&mut self, env: &E) -> Vec<BeaconAction> {
        self.session.connected();
        let mut actions = vec![BeaconAction::log(LogLevel::Info, "peer connected")];
        actions.extend(self.schedule(env, |scheduler, src| scheduler.connected(src)));
        actions
    }

    fn handle_disconnected<E: Environment>(&mut self, env: &E) -> Vec<BeaconAction> {
        self.session.disconnected();
        let mut actions = vec![BeaconAction::log(LogLevel::Info, "peer disconnected")];
        if self.security.lock_mut().relock_on_disconnect() {
            actions.push(BeaconAction::log(LogLevel::Info, "relocked"));
        }
        for slot in SlotIndex::all() {
            self.work.push(WorkItem::PersistSlot(slot));
        }
        actions.extend(self.schedule(env, |scheduler, src| scheduler.disconnected(src)));
        if self.session.remain_connectable {
            let connectable = self.scheduler.registration_triggered();
            actions.extend(self.scheduler_actions(connectable));
        }
        actions
    }

    fn persist_slot(&mut self, slot: SlotIndex) -> Vec<BeaconAction> {
        let key = StorageKey::Slot(slot);
        let Some(record) = self.store.stored_slot(slot, &self.security) else {
            return Vec::new();
        };
        match persist::encode(key, &record) {
            Ok(value) => vec![BeaconAction::Persist { key, value }],
            Err(err) => {
                self.store.set_unpersisted(slot, true);
                vec![BeaconAction::log(LogLevel::Error, err.to_string())]
            },
        }
    }

    /// Give a freshly configured TLM slot a read-back before its first
    /// broadcast.
    fn prime_telemetry(&mut self, slot: SlotIndex) {
        if self.store.is_tlm(slot) && !self.store.has_broadcast(slot) {
            let frame = BroadcastFrame::Tlm(TlmFrame::new(&self.telemetry.snapshot()));
            self.store.record_broadcast(slot, frame);
        }
    }
}

/// Borrowed view the scheduler reads frames through.
pub(crate) struct BroadcastContext<'a, S, E> {
    store: &'a mut SlotStore,
    security: &'a SecurityEngine,
    telemetry: &'a mut Telemetry,
    sensors: &'a S,
    env: &'a E,
}

impl<S: Sensors, E: Environment> FrameSource for BroadcastContext<'_, S, E> {
    fn configured_slots(&self) -> Vec<SlotIndex> {
        self.store.enumerate_configured()
    }

    fn eid_slots(&self) -> Vec<SlotIndex> {
        self.store.enumerate_eid_slots()
    }

    fn global_interval_ms(&self) -> u16 {
        self.store.global_interval_ms()
    }

    fn publish_global_interval(&mut self, ms: u16) {
        self.store.publish_global_interval(ms);
    }

    fn is_telemetry(&self, slot: SlotIndex) -> bool {
        self.store.is_tlm(slot)
    }

    fn frame(&mut self, slot: SlotIndex) -> Option<Broadcast> {
        let tx_power = self.store.slot(slot).tx_power();
        if self.store.is_tlm(slot) {
            let body = self.telemetry.read(self.sensors);
            let frame = BroadcastFrame::Tlm(TlmFrame::new(&body));
            self.store.record_broadcast(slot, frame.clone());
            return Some(Broadcast { frame, tx_power });
        }
        self.store.ready_frame(slot).cloned().map(|frame| Broadcast { frame, tx_power })
    }

    fn encrypted_telemetry(
        &mut self,
        tlm_slot: SlotIndex,
        eid_slot: SlotIndex,
    ) -> Option<Broadcast> {
        let body = self.telemetry.read(self.sensors);
        let etlm = self.security.encrypt_telemetry(eid_slot, &body, self.env.random_array())?;
        let frame = BroadcastFrame::Etlm(etlm);
        self.store.record_broadcast(tlm_slot, frame.clone());
        Some(Broadcast { frame, tx_power: self.store.slot(tlm_slot).tx_power() })
    }
}
