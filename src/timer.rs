use std::time::Duration;

use log::{debug, info, warn};
use pool_common::{TimerReport, ValveMode};

use crate::{
    equipment::EquipmentController,
    platform::{Clock, Relay},
    session::StateSink,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Running,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerState {
    pub phase: TimerPhase,
    pub mode: ValveMode,
    /// Requested run length in seconds
    pub duration: u32,
    /// Seconds left; zero whenever idle
    pub remaining: u32,
    /// Clock reading the countdown was last advanced to
    pub last_tick: Duration,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            phase: TimerPhase::Idle,
            mode: ValveMode::Mode1,
            duration: 0,
            remaining: 0,
            last_tick: Duration::ZERO,
        }
    }
}

/// Countdown that runs the pump in a chosen valve mode and switches it off
/// when time is up.
///
/// Running snapshots go out every ten seconds of remaining time, every
/// second for the last ten, and at least once per `publish_interval`. Expiry
/// and an explicit stop share the same path, so both end in the same
/// terminal snapshot.
pub struct TimerEngine {
    state: TimerState,
    settle_delay: Duration,
    publish_interval: Duration,
    last_publish: Option<Duration>,
}

impl TimerEngine {
    pub fn new(settle_delay: Duration, publish_interval: Duration) -> Self {
        Self {
            state: TimerState::default(),
            settle_delay,
            publish_interval,
            last_publish: None,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.phase == TimerPhase::Running
    }

    pub fn report(&self) -> TimerReport {
        TimerReport {
            active: self.is_running(),
            remaining: self.state.remaining,
            mode: self.state.mode.number(),
            duration: self.state.duration,
        }
    }

    /// Positions the valve, waits for it to settle, then starts the pump.
    /// A start while running replaces the current run.
    pub fn start<R: Relay>(
        &mut self,
        mode: i64,
        duration: u32,
        equipment: &mut EquipmentController<R>,
        sink: &mut dyn StateSink,
        clock: &dyn Clock,
    ) {
        let Some(valve) = ValveMode::from_number(mode) else {
            warn!("timer: rejecting start, invalid mode {}", mode);
            return;
        };
        if duration == 0 {
            warn!("timer: rejecting start with zero duration");
            return;
        }

        info!("timer: start mode {} for {}s", valve.number(), duration);

        equipment.set_valve_mode(valve, sink);
        clock.sleep(self.settle_delay);
        equipment.set_pump(true, sink);

        let now = clock.now();
        self.state = TimerState {
            phase: TimerPhase::Running,
            mode: valve,
            duration,
            remaining: duration,
            last_tick: now,
        };
        self.emit(sink, now);
    }

    /// Pump off, back to idle. Does nothing when already idle.
    pub fn stop<R: Relay>(
        &mut self,
        equipment: &mut EquipmentController<R>,
        sink: &mut dyn StateSink,
        clock: &dyn Clock,
    ) {
        if !self.is_running() {
            debug!("timer: stop ignored, not running");
            return;
        }

        info!("timer: stopped with {}s left", self.state.remaining);

        equipment.set_pump(false, sink);
        self.state.remaining = 0;
        self.state.phase = TimerPhase::Idle;
        self.emit(sink, clock.now());
    }

    /// Advance by every whole second elapsed since the last advance; the
    /// fractional remainder carries over.
    pub fn tick<R: Relay>(
        &mut self,
        now: Duration,
        equipment: &mut EquipmentController<R>,
        sink: &mut dyn StateSink,
        clock: &dyn Clock,
    ) {
        if !self.is_running() {
            return;
        }

        let elapsed = now.saturating_sub(self.state.last_tick).as_secs();
        if elapsed == 0 {
            return;
        }
        self.state.last_tick += Duration::from_secs(elapsed);

        let before = self.state.remaining;
        let step = elapsed.min(u64::from(before)) as u32;
        let after = before - step;
        self.state.remaining = after;

        if after == 0 {
            info!("timer: expired");
            self.stop(equipment, sink, clock);
            return;
        }

        if after % 60 == 0 {
            debug!("timer: {} min left", after / 60);
        }

        // Any value passed in [after, before - 1] on a multiple of ten, or
        // the final ten seconds.
        let crossed_ten = (before - 1) / 10 > (after - 1) / 10;
        let interval_due = self
            .last_publish
            .map_or(true, |at| now.saturating_sub(at) >= self.publish_interval);

        if crossed_ten || after <= 10 || interval_due {
            self.emit(sink, now);
        }
    }

    fn emit(&mut self, sink: &mut dyn StateSink, now: Duration) {
        self.last_publish = Some(now);
        sink.timer_state(&self.report());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::sim::{SimClock, SimRelay},
        session::RecordingSink,
    };

    const SETTLE: Duration = Duration::from_millis(500);

    struct Rig {
        timer: TimerEngine,
        equipment: EquipmentController<SimRelay>,
        sink: RecordingSink,
        clock: SimClock,
        pump: SimRelay,
    }

    fn rig() -> Rig {
        let pump = SimRelay::default();
        Rig {
            timer: TimerEngine::new(SETTLE, Duration::from_secs(10)),
            equipment: EquipmentController::new(pump.clone(), SimRelay::default()),
            sink: RecordingSink::default(),
            clock: SimClock::default(),
            pump,
        }
    }

    impl Rig {
        fn start(&mut self, mode: i64, duration: u32) {
            self.timer
                .start(mode, duration, &mut self.equipment, &mut self.sink, &self.clock);
        }

        fn stop(&mut self) {
            self.timer
                .stop(&mut self.equipment, &mut self.sink, &self.clock);
        }

        fn advance(&mut self, by: Duration) {
            self.clock.advance(by);
            let now = self.clock.now();
            self.timer
                .tick(now, &mut self.equipment, &mut self.sink, &self.clock);
        }
    }

    #[test]
    fn start_settles_valve_before_pump() {
        let mut rig = rig();
        rig.start(2, 60);

        assert_eq!(rig.clock.now(), SETTLE);
        assert_eq!(rig.sink.valve, vec![ValveMode::Mode2]);
        assert_eq!(rig.sink.pump, vec![true]);
        assert_eq!(
            rig.sink.timer,
            vec![TimerReport {
                active: true,
                remaining: 60,
                mode: 2,
                duration: 60
            }]
        );
    }

    #[test]
    fn invalid_starts_change_nothing() {
        let mut rig = rig();
        rig.start(3, 60);
        rig.start(1, 0);

        assert!(!rig.timer.is_running());
        assert!(rig.sink.timer.is_empty());
        assert_eq!(rig.pump.writes(), vec![false]);
    }

    #[test]
    fn expiry_matches_explicit_stop() {
        let mut expired = rig();
        expired.start(1, 5);
        for _ in 0..5 {
            expired.advance(Duration::from_secs(1));
        }

        let mut stopped = rig();
        stopped.start(1, 5);
        stopped.stop();

        let terminal = |sink: &RecordingSink| {
            sink.timer
                .iter()
                .filter(|report| !report.active)
                .copied()
                .collect::<Vec<_>>()
        };
        assert_eq!(terminal(&expired.sink), terminal(&stopped.sink));
        assert_eq!(terminal(&expired.sink).len(), 1);
        assert_eq!(
            terminal(&expired.sink)[0],
            TimerReport {
                active: false,
                remaining: 0,
                mode: 1,
                duration: 5
            }
        );
        assert!(!expired.equipment.state().pump_on);
    }

    #[test]
    fn final_ten_seconds_publish_every_second() {
        let mut rig = rig();
        rig.start(1, 12);
        rig.sink.timer.clear();

        for _ in 0..3 {
            rig.advance(Duration::from_secs(1));
        }

        let remaining: Vec<u32> = rig.sink.timer.iter().map(|r| r.remaining).collect();
        // 11 is neither a multiple of ten nor in the last ten seconds
        assert_eq!(remaining, vec![10, 9]);
    }

    #[test]
    fn partial_seconds_carry_over() {
        let mut rig = rig();
        rig.start(1, 100);

        rig.advance(Duration::from_millis(1500));
        assert_eq!(rig.timer.state().remaining, 99);

        rig.advance(Duration::from_millis(600));
        assert_eq!(rig.timer.state().remaining, 98);
    }

    #[test]
    fn long_stall_catches_up_with_one_snapshot() {
        let mut rig = rig();
        rig.start(1, 100);
        rig.sink.timer.clear();

        rig.advance(Duration::from_secs(25));

        assert_eq!(rig.timer.state().remaining, 75);
        assert_eq!(rig.sink.timer.len(), 1);
    }

    #[test]
    fn stall_past_the_end_expires() {
        let mut rig = rig();
        rig.start(2, 3);
        rig.advance(Duration::from_secs(30));

        assert!(!rig.timer.is_running());
        assert_eq!(rig.timer.report().remaining, 0);
        assert_eq!(rig.sink.pump, vec![true, false]);
    }

    #[test]
    fn stop_when_idle_is_silent() {
        let mut rig = rig();
        rig.stop();
        assert!(rig.sink.timer.is_empty());
        assert!(rig.sink.pump.is_empty());
    }
}
