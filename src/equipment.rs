use log::info;
use pool_common::ValveMode;

use crate::{platform::Relay, session::StateSink};

/// Logical state of the outputs. Always matches what was last written to
/// the relays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EquipmentState {
    pub pump_on: bool,
    pub valve: ValveMode,
}

/// Owns the pump and valve relays. Every change is published as a retained
/// state report through the sink.
pub struct EquipmentController<R> {
    pump: R,
    valve: R,
    state: EquipmentState,
}

impl<R: Relay> EquipmentController<R> {
    /// Both relays are released on construction: pump off, valve in mode 1.
    pub fn new(mut pump: R, mut valve: R) -> Self {
        pump.set(false);
        valve.set(false);

        Self {
            pump,
            valve,
            state: EquipmentState {
                pump_on: false,
                valve: ValveMode::Mode1,
            },
        }
    }

    pub fn state(&self) -> EquipmentState {
        self.state
    }

    pub fn set_pump(&mut self, on: bool, sink: &mut dyn StateSink) {
        info!("equipment: pump {}", if on { "ON" } else { "OFF" });

        self.pump.set(on);
        self.state.pump_on = on;
        sink.pump_state(on);
    }

    /// Switching to the mode the valve is already in leaves the relay alone
    /// but still republishes.
    pub fn set_valve_mode(&mut self, mode: ValveMode, sink: &mut dyn StateSink) {
        if self.state.valve == mode {
            info!("equipment: valve already in mode {}", mode.number());
        } else {
            info!("equipment: valve -> mode {}", mode.number());
            self.valve.set(mode == ValveMode::Mode2);
            self.state.valve = mode;
        }

        sink.valve_state(mode);
    }
}
