use anyhow::{Result, anyhow};

use super::{HardwareConfig, SimulatedGpio};

pub type PlatformGpio = SimulatedGpio;

pub fn open(_: &HardwareConfig) -> Result<PlatformGpio> {
    Err(anyhow!(
        "hardware support disabled. Enable the `hardware` feature to drive GPIO pins."
    ))
}
