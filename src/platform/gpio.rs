use anyhow::Error;
use log::{debug, info};

#[cfg(feature = "pi")]
use rppal::gpio::{Gpio, OutputPin};

use super::Relay;
use crate::config::Pin;

#[allow(dead_code)]
#[cfg(feature = "pi")]
pub struct GpioRelay {
    name: &'static str,
    active_low: bool,
    pin: OutputPin,
}

#[cfg(not(feature = "pi"))]
#[allow(dead_code)]
pub struct GpioRelay {
    name: &'static str,
    active_low: bool,
    pin: (),
}

impl GpioRelay {
    pub fn init(name: &'static str, pin: Pin, active_low: bool) -> Result<Self, Error> {
        let pin = pin.gpio();
        info!("equipment: {} relay on gpio {}", name, pin.0);

        // Only touch GPIO if the Pi feature is enabled
        #[cfg(feature = "pi")]
        let pin = {
            let mut out = Gpio::new()?.get(pin.0)?.into_output();
            // Released until the controller says otherwise
            if active_low {
                out.set_high();
            } else {
                out.set_low();
            }
            out
        };
        #[cfg(not(feature = "pi"))]
        let pin = {
            let _ = pin;
        };

        Ok(Self {
            name,
            active_low,
            pin,
        })
    }
}

impl Relay for GpioRelay {
    fn set(&mut self, energized: bool) {
        let high = energized != self.active_low;
        debug!(
            "equipment: {} relay {} (line {})",
            self.name,
            if energized { "energized" } else { "released" },
            if high { "high" } else { "low" }
        );

        #[cfg(feature = "pi")]
        match high {
            true => self.pin.set_high(),
            false => self.pin.set_low(),
        }
    }
}
