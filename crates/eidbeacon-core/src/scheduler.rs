//! Advertising scheduler.
//!
//! Cycles the radio through the configured slots using three timers:
//!
//! - **interval** (single shot): one pass over all slots; each expiry starts
//!   a new pass with freshly computed intervals
//! - **slot** (single shot): moves to the next slot of the pass
//! - **eTLM** (repeating): inside a TLM slot, pairs encrypted telemetry with
//!   each EID slot in turn
//!
//! ```text
//!          Start                  RegistrationTriggered
//! ┌──────┐ ─────> ┌────────────────────┐ ─────> ┌──────────────────────────┐
//! │ Idle │        │ BroadcastingBeacon │        │ ConnectableWindow        │
//! └──────┘        └────────────────────┘ <───── │ (advertising/connected)  │
//!                                       timeout └──────────────────────────┘
//!                                       disconnect
//! ```
//!
//! The scheduler is pure: it reads frames through [`FrameSource`] and returns
//! [`SchedulerAction`]s for the driver to execute. A timer expiry for a timer
//! that is not armed is a stale callback and is ignored.

use std::time::Duration;

use eidbeacon_proto::BroadcastFrame;

use crate::slot::SlotIndex;

/// Smallest slot-to-slot interval.
pub const SLOT_FLOOR_MS: u16 = 500;

/// Gap reserved between two slot advertisements.
pub const SLOT_BUFFER_MS: u16 = 25;

/// Smallest eTLM-to-eTLM interval.
pub const ETLM_FLOOR_MS: u16 = 300;

/// Gap reserved between two eTLM advertisements.
pub const ETLM_BUFFER_MS: u16 = 25;

/// Advertising interval while waiting for a configuring peer.
pub const CONNECTABLE_INTERVAL: Duration = Duration::from_millis(100);

/// How long connectable advertising lasts without a connection.
pub const CONNECTABLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Scheduler timing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Smallest slot-to-slot interval
    pub slot_floor_ms: u16,
    /// Gap between slot advertisements
    pub slot_buffer_ms: u16,
    /// Smallest eTLM-to-eTLM interval
    pub etlm_floor_ms: u16,
    /// Gap between eTLM advertisements
    pub etlm_buffer_ms: u16,
    /// Global interval used when none is configured
    pub default_interval_ms: u16,
    /// Connectable advertising interval
    pub connectable_interval: Duration,
    /// Connectable advertising timeout
    pub connectable_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_floor_ms: SLOT_FLOOR_MS,
            slot_buffer_ms: SLOT_BUFFER_MS,
            etlm_floor_ms: ETLM_FLOOR_MS,
            etlm_buffer_ms: ETLM_BUFFER_MS,
            default_interval_ms: crate::slot_store::DEFAULT_INTERVAL_MS,
            connectable_interval: CONNECTABLE_INTERVAL,
            connectable_timeout: CONNECTABLE_TIMEOUT,
        }
    }
}

/// Intervals for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdvertisingIntervals {
    /// Length of a full pass over every configured slot
    pub global_ms: u16,
    /// Time between two slots of a pass
    pub slot_to_slot_ms: u16,
    /// Time between two eTLM frames of a TLM slot
    pub etlm_to_etlm_ms: u16,
}

/// Split `global_ms` across `configured` slots and `eid_slots` eTLM pairs.
///
/// When a share falls under its floor the global interval is enlarged so
/// every share fits; the caller republishes the enlarged value.
pub fn compute_intervals(
    config: &SchedulerConfig,
    global_ms: u16,
    configured: usize,
    eid_slots: usize,
) -> AdvertisingIntervals {
    let mut global = u32::from(if global_ms == 0 { config.default_interval_ms } else { global_ms });
    if configured == 0 {
        return AdvertisingIntervals { global_ms: clamp_u16(global), ..Default::default() };
    }

    let slot_floor = u32::from(config.slot_floor_ms);
    let slot_buffer = u32::from(config.slot_buffer_ms);
    let etlm_floor = u32::from(config.etlm_floor_ms);
    let etlm_buffer = u32::from(config.etlm_buffer_ms);
    let n = configured as u32;

    let mut slot = (global / n).saturating_sub(slot_buffer);
    if slot < slot_floor {
        global = (slot_floor + slot_buffer) * n;
        slot = slot_floor;
    }

    let mut etlm = 0;
    if eid_slots > 0 {
        let m = eid_slots as u32;
        etlm = (slot / m).saturating_sub(etlm_buffer);
        if etlm < etlm_floor {
            etlm = etlm_floor;
            slot = (etlm + etlm_buffer) * m - slot_buffer;
            global = (slot + slot_buffer) * n;
        }
    }

    AdvertisingIntervals {
        global_ms: clamp_u16(global),
        slot_to_slot_ms: clamp_u16(slot),
        etlm_to_etlm_ms: clamp_u16(etlm),
    }
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Scheduler timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// One pass over every slot
    Interval,
    /// Next slot of the pass
    Slot,
    /// Next eTLM pairing of a TLM slot
    Etlm,
}

impl Timer {
    const ALL: [Self; 3] = [Self::Interval, Self::Slot, Self::Etlm];

    const fn index(self) -> usize {
        match self {
            Self::Interval => 0,
            Self::Slot => 1,
            Self::Etlm => 2,
        }
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not started
    Idle,
    /// Cycling through the slots
    BroadcastingBeacon,
    /// Connectable advertising, or a peer is connected
    ConnectableWindow {
        /// A peer is connected; slot cycling runs alongside the connection
        connected: bool,
    },
}

/// A frame ready for the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    /// Frame bytes to advertise
    pub frame: BroadcastFrame,
    /// Radio transmit power in dBm
    pub tx_power: i8,
}

/// What the scheduler reads from the rest of the beacon.
pub trait FrameSource {
    /// Configured slots in index order.
    fn configured_slots(&self) -> Vec<SlotIndex>;

    /// EID slots in index order.
    fn eid_slots(&self) -> Vec<SlotIndex>;

    /// Current global interval.
    fn global_interval_ms(&self) -> u16;

    /// Store an enlarged global interval.
    fn publish_global_interval(&mut self, ms: u16);

    /// Whether `slot` broadcasts telemetry.
    fn is_telemetry(&self, slot: SlotIndex) -> bool;

    /// Frame for `slot`; plain telemetry for a TLM slot. `None` if the slot
    /// is not ready.
    fn frame(&mut self, slot: SlotIndex) -> Option<Broadcast>;

    /// Telemetry of `tlm_slot` sealed under `eid_slot`'s identity key.
    fn encrypted_telemetry(&mut self, tlm_slot: SlotIndex, eid_slot: SlotIndex)
    -> Option<Broadcast>;
}

/// Commands for the radio and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Start non-connectable advertising of a frame
    Advertise {
        /// Slot the frame belongs to
        slot: SlotIndex,
        /// Frame to advertise
        frame: BroadcastFrame,
        /// Radio advertising interval
        interval_ms: u16,
        /// Radio transmit power
        tx_power: i8,
    },
    /// Start connectable advertising for a configuring peer
    AdvertiseConnectable {
        /// Radio advertising interval
        interval: Duration,
        /// Stop after this long without a connection
        timeout: Duration,
    },
    /// Stop the radio
    StopAdvertising,
    /// Arm a timer
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
    /// The global interval was enlarged to fit every slot
    GlobalIntervalEnlarged {
        /// Configured interval
        from_ms: u16,
        /// Interval now in use
        to_ms: u16,
    },
}

/// The advertising state machine.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    state: SchedulerState,
    intervals: AdvertisingIntervals,
    pass: Vec<SlotIndex>,
    slot_cursor: usize,
    etlm_slot: Option<SlotIndex>,
    etlm_pairs: Vec<SlotIndex>,
    etlm_cursor: usize,
    armed: [bool; 3],
}

impl Scheduler {
    /// Idle scheduler.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: SchedulerState::Idle,
            intervals: AdvertisingIntervals::default(),
            pass: Vec::new(),
            slot_cursor: 0,
            etlm_slot: None,
            etlm_pairs: Vec::new(),
            etlm_cursor: 0,
            armed: [false; 3],
        }
    }

    /// Begin beacon broadcasting.
    pub fn start(&mut self, src: &mut impl FrameSource) -> Vec<SchedulerAction> {
        let mut actions = self.halt();
        self.state = SchedulerState::BroadcastingBeacon;
        self.start_pass(src, &mut actions);
        actions
    }

    /// A timer expired.
    pub fn on_timer(&mut self, timer: Timer, src: &mut impl FrameSource) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();
        if !self.armed[timer.index()] {
            return actions;
        }
        match timer {
            Timer::Interval => {
                self.armed[timer.index()] = false;
                self.start_pass(src, &mut actions);
            },
            Timer::Slot => {
                self.armed[timer.index()] = false;
                self.slot_tick(src, &mut actions);
            },
            Timer::Etlm => self.etlm_tick(src, &mut actions),
        }
        actions
    }

    /// Stop the radio and every timer.
    pub fn halt(&mut self) -> Vec<SchedulerAction> {
        self.armed = [false; 3];
        self.slot_cursor = 0;
        self.etlm_cursor = 0;
        let mut actions = vec![SchedulerAction::StopAdvertising];
        actions.extend(Timer::ALL.map(SchedulerAction::CancelTimer));
        actions
    }

    /// The registration button was pressed.
    ///
    /// Ignored while already connectable or connected.
    pub fn registration_triggered(&mut self) -> Vec<SchedulerAction> {
        if matches!(self.state, SchedulerState::ConnectableWindow { .. }) {
            return Vec::new();
        }
        let mut actions = self.halt();
        self.state = SchedulerState::ConnectableWindow { connected: false };
        actions.push(SchedulerAction::AdvertiseConnectable {
            interval: self.config.connectable_interval,
            timeout: self.config.connectable_timeout,
        });
        actions
    }

    /// A peer connected; slot cycling resumes alongside the connection.
    pub fn connected(&mut self, src: &mut impl FrameSource) -> Vec<SchedulerAction> {
        let mut actions = self.halt();
        self.state = SchedulerState::ConnectableWindow { connected: true };
        self.start_pass(src, &mut actions);
        actions
    }

    /// The peer disconnected: one interval of quiet, then a fresh pass.
    pub fn disconnected(&mut self, src: &mut impl FrameSource) -> Vec<SchedulerAction> {
        self.state = SchedulerState::BroadcastingBeacon;
        self.quiet_interval(src)
    }

    /// Connectable advertising ended without a connection.
    pub fn connectable_timeout(&mut self, src: &mut impl FrameSource) -> Vec<SchedulerAction> {
        if self.state != (SchedulerState::ConnectableWindow { connected: false }) {
            return Vec::new();
        }
        let mut actions = self.halt();
        self.state = SchedulerState::BroadcastingBeacon;
        self.start_pass(src, &mut actions);
        actions
    }

    /// A configuration write arrived: one interval of quiet, then a fresh
    /// pass that picks up the new configuration.
    pub fn write_requested(&mut self, src: &mut impl FrameSource) -> Vec<SchedulerAction> {
        self.quiet_interval(src)
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Intervals of the current pass.
    pub fn intervals(&self) -> AdvertisingIntervals {
        self.intervals
    }

    /// Whether `timer` is armed.
    pub fn is_armed(&self, timer: Timer) -> bool {
        self.armed[timer.index()]
    }

    fn quiet_interval(&mut self, src: &mut impl FrameSource) -> Vec<SchedulerAction> {
        let mut actions = self.halt();
        self.recompute(src, &mut actions);
        self.arm(Timer::Interval, self.intervals.global_ms, false, &mut actions);
        actions
    }

    fn start_pass(&mut self, src: &mut impl FrameSource, actions: &mut Vec<SchedulerAction>) {
        self.recompute(src, actions);
        self.arm(Timer::Interval, self.intervals.global_ms, false, actions);
        self.pass = src.configured_slots();
        self.slot_cursor = 0;
        self.slot_tick(src, actions);
    }

    fn recompute(&mut self, src: &mut impl FrameSource, actions: &mut Vec<SchedulerAction>) {
        let configured = src.global_interval_ms();
        self.intervals = compute_intervals(
            &self.config,
            configured,
            src.configured_slots().len(),
            src.eid_slots().len(),
        );
        if self.intervals.global_ms != configured {
            src.publish_global_interval(self.intervals.global_ms);
            actions.push(SchedulerAction::GlobalIntervalEnlarged {
                from_ms: configured,
                to_ms: self.intervals.global_ms,
            });
        }
    }

    fn slot_tick(&mut self, src: &mut impl FrameSource, actions: &mut Vec<SchedulerAction>) {
        let Some(&slot) = self.pass.get(self.slot_cursor) else {
            self.slot_cursor = 0;
            return;
        };
        if self.armed[Timer::Etlm.index()] {
            self.armed[Timer::Etlm.index()] = false;
            actions.push(SchedulerAction::CancelTimer(Timer::Etlm));
        }
        self.etlm_cursor = 0;
        actions.push(SchedulerAction::StopAdvertising);

        if !self.is_connectable_advertising() {
            let eid_slots = src.eid_slots();
            if src.is_telemetry(slot) && !eid_slots.is_empty() {
                self.etlm_slot = Some(slot);
                self.etlm_pairs = eid_slots;
                if self.intervals.etlm_to_etlm_ms != 0 {
                    self.arm(Timer::Etlm, self.intervals.etlm_to_etlm_ms, true, actions);
                }
                self.etlm_tick(src, actions);
            } else if let Some(broadcast) = src.frame(slot) {
                actions.push(self.advertise(slot, broadcast));
            }
        }

        self.slot_cursor += 1;
        if self.slot_cursor >= self.pass.len() {
            self.slot_cursor = 0;
        } else if self.intervals.slot_to_slot_ms != 0 {
            self.arm(Timer::Slot, self.intervals.slot_to_slot_ms, false, actions);
        }
    }

    fn etlm_tick(&mut self, src: &mut impl FrameSource, actions: &mut Vec<SchedulerAction>) {
        actions.push(SchedulerAction::StopAdvertising);

        let (Some(tlm_slot), Some(&eid_slot)) = (self.etlm_slot, self.etlm_pairs.get(self.etlm_cursor))
        else {
            self.etlm_cursor = 0;
            if self.armed[Timer::Etlm.index()] {
                self.armed[Timer::Etlm.index()] = false;
                actions.push(SchedulerAction::CancelTimer(Timer::Etlm));
            }
            return;
        };

        if let Some(broadcast) = src.encrypted_telemetry(tlm_slot, eid_slot) {
            actions.push(self.advertise(tlm_slot, broadcast));
        }
        self.etlm_cursor += 1;
    }

    fn advertise(&self, slot: SlotIndex, broadcast: Broadcast) -> SchedulerAction {
        SchedulerAction::Advertise {
            slot,
            frame: broadcast.frame,
            interval_ms: self.intervals.global_ms,
            tx_power: broadcast.tx_power,
        }
    }

    fn arm(&mut self, timer: Timer, ms: u16, repeating: bool, actions: &mut Vec<SchedulerAction>) {
        self.armed[timer.index()] = true;
        actions.push(SchedulerAction::StartTimer {
            timer,
            after: Duration::from_millis(u64::from(ms)),
            repeating,
        });
    }

    fn is_connectable_advertising(&self) -> bool {
        self.state == (SchedulerState::ConnectableWindow { connected: false })
    }
}
