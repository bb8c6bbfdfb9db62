//! Tokio event loop.
//!
//! One task owns the [`BeaconDriver`] and serialises every event: clock
//! ticks, timer expiries, the connectable timeout and commands from the
//! configuration link. Radio actions go to a [`Radio`].

use std::{ops::Add, time::Duration};

use eidbeacon_core::{BeaconAction, BeaconError, BeaconEvent, Environment, Sensors, Timer};
use tokio::{
    sync::{mpsc, oneshot},
    time::MissedTickBehavior,
};

use crate::{
    driver::{BeaconDriver, NodeConfig},
    error::NodeError,
    radio::Radio,
    storage::Storage,
    system_env::SystemEnv,
};

/// Upper bound on timer expiries handled per wakeup.
const MAX_FIRES_PER_WAKE: usize = 16;

/// Reply channel for a peer event: the read response, if any, or the
/// rejection.
pub type PeerReply = oneshot::Sender<Result<Option<Vec<u8>>, BeaconError>>;

/// Input to a running [`Node`].
#[derive(Debug)]
pub enum NodeCommand {
    /// Event from the configuration link
    Peer {
        /// Connection, read or write event
        event: BeaconEvent,
        /// Where the outcome goes
        reply: PeerReply,
    },
    /// The registration button was pressed
    RegistrationButton,
    /// Stop the loop
    Shutdown,
}

/// Armed scheduler timers ordered by deadline.
#[derive(Debug, Clone)]
pub struct TimerWheel<I> {
    armed: Vec<ArmedTimer<I>>,
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer<I> {
    timer: Timer,
    deadline: I,
    period: Option<Duration>,
}

impl<I> TimerWheel<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Empty wheel.
    pub fn new() -> Self {
        Self { armed: Vec::new() }
    }

    /// Arm `timer` to expire `after` from `now`, replacing any earlier arming.
    pub fn arm(&mut self, timer: Timer, now: I, after: Duration, repeating: bool) {
        self.cancel(timer);
        let period = (repeating && !after.is_zero()).then_some(after);
        self.armed.push(ArmedTimer { timer, deadline: now + after, period });
    }

    /// Disarm `timer`.
    pub fn cancel(&mut self, timer: Timer) {
        self.armed.retain(|armed| armed.timer != timer);
    }

    /// Whether `timer` is armed.
    pub fn is_armed(&self, timer: Timer) -> bool {
        self.armed.iter().any(|armed| armed.timer == timer)
    }

    /// Earliest deadline.
    pub fn next_deadline(&self) -> Option<I> {
        self.armed.iter().map(|armed| armed.deadline).min()
    }

    /// Take the earliest timer due at `now`.
    ///
    /// Ties go to the timer armed first. Repeating timers are re-armed one
    /// period after their deadline; others are removed.
    pub fn pop_due(&mut self, now: I) -> Option<Timer> {
        let (index, due) = self
            .armed
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, armed)| armed.deadline <= now)
            .min_by_key(|(_, armed)| armed.deadline)?;

        match due.period {
            Some(period) => self.armed[index].deadline = due.deadline + period,
            None => {
                self.armed.remove(index);
            },
        }
        Some(due.timer)
    }
}

impl<I> Default for TimerWheel<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Production beacon: driver, radio and timers on the system clock.
pub struct Node<S, R, Sn>
where
    S: Storage,
    R: Radio,
    Sn: Sensors,
{
    driver: BeaconDriver<SystemEnv, S, Sn>,
    radio: R,
    timers: TimerWheel<std::time::Instant>,
    connectable_deadline: Option<std::time::Instant>,
    connected: bool,
    tick: Duration,
    registration_at_start: bool,
}

impl<S, R, Sn> Node<S, R, Sn>
where
    S: Storage,
    R: Radio,
    Sn: Sensors,
{
    /// Restore the beacon from `storage`.
    ///
    /// # Errors
    ///
    /// - `NodeError::Storage` if persisted state cannot be read
    /// - `NodeError::Config` for a zero tick period
    pub fn boot(storage: S, radio: R, sensors: Sn, config: NodeConfig) -> Result<Self, NodeError> {
        if config.tick.is_zero() {
            return Err(NodeError::Config("tick period must be positive".to_string()));
        }
        let (driver, actions) = BeaconDriver::boot(SystemEnv::new(), storage, config.beacon, sensors)?;
        let mut node = Self {
            driver,
            radio,
            timers: TimerWheel::new(),
            connectable_deadline: None,
            connected: false,
            tick: config.tick,
            registration_at_start: config.registration_at_start,
        };
        node.apply(actions);
        Ok(node)
    }

    /// Start broadcasting and process events until shutdown.
    ///
    /// Returns the radio once the loop ends, either on
    /// [`NodeCommand::Shutdown`] or when every command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<NodeCommand>) -> R {
        self.dispatch(BeaconEvent::Start);
        if self.registration_at_start {
            self.dispatch(BeaconEvent::RegistrationTriggered);
        }

        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = tick.tick() => {
                    let actions = self.driver.tick();
                    self.apply(actions);
                },
                () = sleep_until(deadline) => self.fire_due(),
                command = commands.recv() => match command {
                    Some(NodeCommand::Peer { event, reply }) => self.peer_event(event, reply),
                    Some(NodeCommand::RegistrationButton) => {
                        self.dispatch(BeaconEvent::RegistrationTriggered);
                    },
                    Some(NodeCommand::Shutdown) | None => break,
                },
            }
        }

        self.radio.stop();
        tracing::info!("node stopped");
        self.radio
    }

    /// Driver, for inspection.
    pub fn driver(&self) -> &BeaconDriver<SystemEnv, S, Sn> {
        &self.driver
    }

    /// Armed timers.
    pub fn timers(&self) -> &TimerWheel<std::time::Instant> {
        &self.timers
    }

    fn peer_event(&mut self, event: BeaconEvent, reply: PeerReply) {
        match event {
            BeaconEvent::Connected => {
                self.connected = true;
                self.connectable_deadline = None;
            },
            BeaconEvent::Disconnected => self.connected = false,
            _ => {},
        }
        let result = self.driver.handle(event).map(|actions| self.apply(actions));
        if let Err(err) = &result {
            tracing::debug!(%err, "peer request rejected");
        }
        if reply.send(result).is_err() {
            tracing::debug!("peer went away before the reply");
        }
    }

    fn dispatch(&mut self, event: BeaconEvent) {
        match self.driver.handle(event) {
            Ok(actions) => {
                self.apply(actions);
            },
            Err(err) => tracing::warn!(%err, "event rejected"),
        }
    }

    fn next_deadline(&self) -> Option<std::time::Instant> {
        [self.timers.next_deadline(), self.connectable_deadline].into_iter().flatten().min()
    }

    fn fire_due(&mut self) {
        let now = self.driver.env().now();
        for _ in 0..MAX_FIRES_PER_WAKE {
            let Some(timer) = self.timers.pop_due(now) else { break };
            self.dispatch(BeaconEvent::TimerFired(timer));
        }
        if self.connectable_deadline.is_some_and(|deadline| deadline <= now) {
            self.connectable_deadline = None;
            self.dispatch(BeaconEvent::ConnectableTimeout);
        }
    }

    /// Execute radio and timer actions; return the read response, if any.
    fn apply(&mut self, actions: Vec<BeaconAction>) -> Option<Vec<u8>> {
        let now = self.driver.env().now();
        let mut read = None;
        for action in actions {
            match action {
                BeaconAction::Advertise { slot, frame, interval_ms, tx_power } => {
                    self.radio.advertise(slot, &frame, interval_ms, tx_power);
                },
                BeaconAction::AdvertiseConnectable { interval, timeout } => {
                    self.radio.advertise_connectable(interval);
                    if !self.connected {
                        self.connectable_deadline = Some(now + timeout);
                    }
                },
                BeaconAction::StopAdvertising => {
                    self.radio.stop();
                    self.connectable_deadline = None;
                },
                BeaconAction::StartTimer { timer, after, repeating } => {
                    self.timers.arm(timer, now, after, repeating);
                },
                BeaconAction::CancelTimer(timer) => self.timers.cancel(timer),
                BeaconAction::RandomizeAddress(address) => self.radio.set_address(address),
                BeaconAction::ReadResponse { value, .. } => read = Some(value),
                // Executed by the driver
                BeaconAction::Persist { .. }
                | BeaconAction::ClearPersisted(_)
                | BeaconAction::Log { .. } => {},
            }
        }
        read
    }
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use eidbeacon_core::{FixedSensors, SlotIndex};
    use eidbeacon_proto::{BroadcastFrame, Characteristic};

    use super::*;
    use crate::storage::MemoryStorage;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn earliest_timer_fires_first() {
        let mut wheel = TimerWheel::new();
        wheel.arm(Timer::Interval, ms(0), ms(1000), false);
        wheel.arm(Timer::Slot, ms(0), ms(500), false);

        assert_eq!(wheel.next_deadline(), Some(ms(500)));
        assert_eq!(wheel.pop_due(ms(400)), None);
        assert_eq!(wheel.pop_due(ms(1000)), Some(Timer::Slot));
        assert_eq!(wheel.pop_due(ms(1000)), Some(Timer::Interval));
        assert_eq!(wheel.pop_due(ms(1000)), None);
    }

    #[test]
    fn ties_go_to_first_armed() {
        let mut wheel = TimerWheel::new();
        wheel.arm(Timer::Etlm, ms(0), ms(300), false);
        wheel.arm(Timer::Slot, ms(0), ms(300), false);

        assert_eq!(wheel.pop_due(ms(300)), Some(Timer::Etlm));
    }

    #[test]
    fn repeating_timer_rearms_from_deadline() {
        let mut wheel = TimerWheel::new();
        wheel.arm(Timer::Etlm, ms(0), ms(300), true);

        assert_eq!(wheel.pop_due(ms(350)), Some(Timer::Etlm));
        assert_eq!(wheel.next_deadline(), Some(ms(600)));
        assert!(wheel.is_armed(Timer::Etlm));
    }

    #[test]
    fn rearming_replaces() {
        let mut wheel = TimerWheel::new();
        wheel.arm(Timer::Slot, ms(0), ms(100), false);
        wheel.arm(Timer::Slot, ms(50), ms(100), false);

        assert_eq!(wheel.next_deadline(), Some(ms(150)));
        wheel.cancel(Timer::Slot);
        assert_eq!(wheel.next_deadline(), None);
    }

    #[derive(Default)]
    struct RecordingRadio {
        advertised: Vec<(SlotIndex, BroadcastFrame)>,
        stops: usize,
    }

    impl Radio for RecordingRadio {
        fn advertise(&mut self, slot: SlotIndex, frame: &BroadcastFrame, _: u16, _: i8) {
            self.advertised.push((slot, frame.clone()));
        }

        fn advertise_connectable(&mut self, _: Duration) {}

        fn stop(&mut self) {
            self.stops += 1;
        }

        fn set_address(&mut self, _: [u8; 6]) {}
    }

    #[tokio::test]
    async fn node_serves_peer_and_stops() {
        let node = Node::boot(
            MemoryStorage::new(),
            RecordingRadio::default(),
            FixedSensors::default(),
            NodeConfig::default(),
        )
        .expect("boot");
        let (tx, rx) = mpsc::channel(8);

        let peer = tokio::spawn(async move {
            let (reply, response) = oneshot::channel();
            let event = BeaconEvent::Read(Characteristic::LockState);
            tx.send(NodeCommand::Peer { event, reply }).await.expect("node running");
            let lock_state = response.await.expect("reply");

            let (reply, response) = oneshot::channel();
            let event = BeaconEvent::Read(Characteristic::SlotData);
            tx.send(NodeCommand::Peer { event, reply }).await.expect("node running");
            let slot_data = response.await.expect("reply");

            tx.send(NodeCommand::Shutdown).await.expect("node running");
            (lock_state, slot_data)
        });

        let radio = node.run(rx).await;
        let (lock_state, slot_data) = peer.await.expect("peer task");

        assert_eq!(lock_state, Ok(Some(vec![0x00])));
        assert_eq!(slot_data, Err(BeaconError::AccessDenied(Characteristic::SlotData)));
        assert_eq!(radio.advertised.first().map(|(slot, _)| *slot), Some(SlotIndex::FIRST));
        assert!(radio.stops >= 1);
    }

    #[test]
    fn zero_tick_is_rejected() {
        let config = NodeConfig { tick: Duration::ZERO, ..NodeConfig::default() };

        let result =
            Node::boot(MemoryStorage::new(), RecordingRadio::default(), FixedSensors::default(), config);

        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
