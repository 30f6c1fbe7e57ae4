use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use crossbeam_channel::Sender;
use tracing::debug;

use super::{Edge, EdgeTrigger, Gpio, PinEvent, PinMode, Pull};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinWrite {
    Digital { pin: u32, high: bool },
    PwmCreate { pin: u32, initial: u8, range: u8 },
    Pwm { pin: u32, value: u8 },
}

impl PinWrite {
    pub fn pin(&self) -> u32 {
        match *self {
            Self::Digital { pin, .. } | Self::PwmCreate { pin, .. } | Self::Pwm { pin, .. } => pin,
        }
    }
}

#[derive(Default)]
struct SimState {
    setup_calls: usize,
    levels: HashMap<u32, bool>,
    modes: HashMap<u32, PinMode>,
    pulls: HashMap<u32, Pull>,
    pwm_ranges: HashMap<u32, u8>,
    writes: Vec<PinWrite>,
    failing: HashSet<u32>,
    interrupts: HashMap<u32, Vec<(EdgeTrigger, Sender<PinEvent>)>>,
}

/// In-memory GPIO. Lets callers drive input levels and fires registered
/// interrupts on level changes. As a test double it records every write;
/// as the headless backend it only logs them.
#[derive(Clone, Default)]
pub struct SimulatedGpio {
    inner: Arc<Mutex<SimState>>,
    headless: bool,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headless() -> Self {
        Self {
            inner: Arc::default(),
            headless: true,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drives an input pin. Registered interrupts fire only on an actual
    /// level change.
    pub fn set_level(&self, pin: u32, high: bool) {
        let mut state = self.state();
        let previous = state.levels.insert(pin, high);
        if previous == Some(high) {
            return;
        }
        let edge = if high { Edge::Rising } else { Edge::Falling };
        if let Some(handlers) = state.interrupts.get_mut(&pin) {
            handlers.retain(|(trigger, tx)| {
                !trigger.matches(edge) || tx.send(PinEvent { pin, edge }).is_ok()
            });
        }
    }

    pub fn level(&self, pin: u32) -> bool {
        self.state().levels.get(&pin).copied().unwrap_or(false)
    }

    pub fn writes(&self) -> Vec<PinWrite> {
        self.state().writes.clone()
    }

    pub fn writes_for(&self, pin: u32) -> Vec<PinWrite> {
        self.state()
            .writes
            .iter()
            .filter(|write| write.pin() == pin)
            .copied()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    pub fn setup_calls(&self) -> usize {
        self.state().setup_calls
    }

    pub fn mode(&self, pin: u32) -> Option<PinMode> {
        self.state().modes.get(&pin).copied()
    }

    pub fn pull(&self, pin: u32) -> Option<Pull> {
        self.state().pulls.get(&pin).copied()
    }

    pub fn is_pwm(&self, pin: u32) -> bool {
        self.state().pwm_ranges.contains_key(&pin)
    }

    /// Makes every write to `pin` fail until switched back off.
    pub fn fail_writes(&self, pin: u32, fail: bool) {
        let mut state = self.state();
        if fail {
            state.failing.insert(pin);
        } else {
            state.failing.remove(&pin);
        }
    }

    pub fn has_interrupt(&self, pin: u32) -> bool {
        self.state()
            .interrupts
            .get(&pin)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    fn record(&self, state: &mut SimState, write: PinWrite) -> Result<()> {
        if state.failing.contains(&write.pin()) {
            bail!("simulated write failure on pin {}", write.pin());
        }
        if self.headless {
            debug!(?write, "simulated gpio write");
        } else {
            state.writes.push(write);
        }
        Ok(())
    }
}

impl Gpio for SimulatedGpio {
    fn setup(&self) -> Result<()> {
        self.state().setup_calls += 1;
        Ok(())
    }

    fn pin_mode(&self, pin: u32, mode: PinMode) -> Result<()> {
        self.state().modes.insert(pin, mode);
        Ok(())
    }

    fn set_pull(&self, pin: u32, pull: Pull) -> Result<()> {
        self.state().pulls.insert(pin, pull);
        Ok(())
    }

    fn digital_read(&self, pin: u32) -> Result<bool> {
        Ok(self.level(pin))
    }

    fn digital_write(&self, pin: u32, high: bool) -> Result<()> {
        let mut state = self.state();
        self.record(&mut state, PinWrite::Digital { pin, high })?;
        state.levels.insert(pin, high);
        Ok(())
    }

    fn soft_pwm_create(&self, pin: u32, initial: u8, range: u8) -> Result<()> {
        let mut state = self.state();
        self.record(&mut state, PinWrite::PwmCreate { pin, initial, range })?;
        state.pwm_ranges.insert(pin, range);
        Ok(())
    }

    fn soft_pwm_write(&self, pin: u32, value: u8) -> Result<()> {
        let mut state = self.state();
        let Some(range) = state.pwm_ranges.get(&pin).copied() else {
            bail!("pin {pin} has no software PWM");
        };
        self.record(
            &mut state,
            PinWrite::Pwm {
                pin,
                value: value.min(range),
            },
        )
    }

    fn register_interrupt(
        &self,
        pin: u32,
        trigger: EdgeTrigger,
        events: Sender<PinEvent>,
    ) -> Result<()> {
        self.state()
            .interrupts
            .entry(pin)
            .or_default()
            .push((trigger, events));
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedGpio").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupts_fire_on_level_changes_only() {
        let gpio = SimulatedGpio::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        gpio.register_interrupt(7, EdgeTrigger::Both, tx).unwrap();

        gpio.set_level(7, true);
        gpio.set_level(7, true);
        gpio.set_level(7, false);

        let events: Vec<PinEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                PinEvent { pin: 7, edge: Edge::Rising },
                PinEvent { pin: 7, edge: Edge::Falling },
            ]
        );
    }

    #[test]
    fn rising_trigger_ignores_falling_edges() {
        let gpio = SimulatedGpio::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        gpio.register_interrupt(3, EdgeTrigger::Rising, tx).unwrap();

        gpio.set_level(3, true);
        gpio.set_level(3, false);

        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn headless_backend_does_not_retain_writes() {
        let gpio = SimulatedGpio::headless();
        gpio.soft_pwm_create(9, 0, 100).unwrap();
        for value in 0..1000u32 {
            gpio.soft_pwm_write(9, (value % 101) as u8).unwrap();
        }
        gpio.digital_write(4, true).unwrap();

        assert!(gpio.writes().is_empty());
        assert!(gpio.is_pwm(9));
        assert!(gpio.level(4));
    }

    #[test]
    fn failing_pin_rejects_writes_until_restored() {
        let gpio = SimulatedGpio::new();
        gpio.fail_writes(2, true);
        assert!(gpio.digital_write(2, true).is_err());
        assert!(gpio.soft_pwm_create(2, 0, 100).is_err());
        assert!(!gpio.is_pwm(2));
        assert!(gpio.writes().is_empty());

        gpio.fail_writes(2, false);
        gpio.digital_write(2, true).unwrap();
        assert_eq!(gpio.writes(), vec![PinWrite::Digital { pin: 2, high: true }]);
    }

    #[test]
    fn pwm_writes_require_pwm_setup() {
        let gpio = SimulatedGpio::new();
        assert!(gpio.soft_pwm_write(9, 40).is_err());

        gpio.soft_pwm_create(9, 0, 100).unwrap();
        gpio.soft_pwm_write(9, 40).unwrap();
        assert_eq!(
            gpio.writes_for(9),
            vec![
                PinWrite::PwmCreate { pin: 9, initial: 0, range: 100 },
                PinWrite::Pwm { pin: 9, value: 40 },
            ]
        );
    }
}
