#[cfg_attr(not(feature = "hardware"), path = "stub.rs")]
mod backend;
mod sim;

pub use backend::{PlatformGpio, open};
pub use sim::{PinWrite, SimulatedGpio};

use anyhow::Result;
use crossbeam_channel::Sender;
use serde::Deserialize;

/// Software PWM range used for every LED channel, so duty equals brightness.
pub const PWM_RANGE: u8 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub chip: String,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            chip: "gpiochip0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    Up,
    Down,
    #[serde(alias = "none")]
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTrigger {
    Rising,
    Falling,
    Both,
}

impl EdgeTrigger {
    pub fn matches(self, edge: Edge) -> bool {
        match self {
            Self::Both => true,
            Self::Rising => edge == Edge::Rising,
            Self::Falling => edge == Edge::Falling,
        }
    }
}

/// An edge seen on an input pin. Interrupt sources never touch component
/// state directly; they send one of these to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub pin: u32,
    pub edge: Edge,
}

/// Pin access layer. Levels are `true` for high.
pub trait Gpio: Send {
    fn setup(&self) -> Result<()> {
        Ok(())
    }
    fn pin_mode(&self, pin: u32, mode: PinMode) -> Result<()>;
    fn set_pull(&self, pin: u32, pull: Pull) -> Result<()>;
    fn digital_read(&self, pin: u32) -> Result<bool>;
    fn digital_write(&self, pin: u32, high: bool) -> Result<()>;
    fn soft_pwm_create(&self, pin: u32, initial: u8, range: u8) -> Result<()>;
    fn soft_pwm_write(&self, pin: u32, value: u8) -> Result<()>;
    fn register_interrupt(
        &self,
        pin: u32,
        trigger: EdgeTrigger,
        events: Sender<PinEvent>,
    ) -> Result<()>;
}
