use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::Sender;
use gpiod::{Bias, Chip, EdgeDetect, Input, Lines, Options, Output};
use tracing::{debug, info, warn};

use super::{Edge, EdgeTrigger, Gpio, HardwareConfig, PinEvent, PinMode, Pull};

const CONSUMER: &str = "panel_ctrl";
const PWM_STEP: Duration = Duration::from_micros(100);

pub type PlatformGpio = GpiodGpio;

pub fn open(config: &HardwareConfig) -> Result<PlatformGpio> {
    let chip = Chip::new(&config.chip)
        .with_context(|| format!("failed to open GPIO chip {}", config.chip))?;
    info!(chip = %config.chip, "opened GPIO chip");
    Ok(GpiodGpio {
        inner: Arc::new(Mutex::new(ChipState {
            chip,
            lines: HashMap::new(),
            pulls: HashMap::new(),
        })),
    })
}

enum LineHandle {
    Input(Lines<Input>),
    Output(Lines<Output>),
    Pwm(SoftPwm),
    /// Owned by an edge reader thread, which mirrors the level here.
    Watched(Arc<AtomicBool>),
}

struct SoftPwm {
    duty: Arc<AtomicU8>,
    range: u8,
    running: Arc<AtomicBool>,
}

impl Drop for SoftPwm {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

struct ChipState {
    chip: Chip,
    lines: HashMap<u32, LineHandle>,
    pulls: HashMap<u32, Pull>,
}

impl ChipState {
    fn bias(&self, pin: u32) -> Bias {
        match self.pulls.get(&pin) {
            Some(Pull::Up) => Bias::PullUp,
            Some(Pull::Down) => Bias::PullDown,
            Some(Pull::Off) | None => Bias::Disable,
        }
    }

    fn request_input(&mut self, pin: u32) -> Result<()> {
        self.lines.remove(&pin);
        let options = Options::input([pin]).bias(self.bias(pin)).consumer(CONSUMER);
        let lines = self
            .chip
            .request_lines(options)
            .with_context(|| format!("failed to request GPIO {pin} as input"))?;
        self.lines.insert(pin, LineHandle::Input(lines));
        Ok(())
    }

    fn request_output(&mut self, pin: u32, high: bool) -> Result<Lines<Output>> {
        self.lines.remove(&pin);
        self.chip
            .request_lines(Options::output([pin]).values([high]).consumer(CONSUMER))
            .with_context(|| format!("failed to request GPIO {pin} as output"))
    }
}

/// Linux GPIO character device backend.
#[derive(Clone)]
pub struct GpiodGpio {
    inner: Arc<Mutex<ChipState>>,
}

impl GpiodGpio {
    fn state(&self) -> MutexGuard<'_, ChipState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Gpio for GpiodGpio {
    fn pin_mode(&self, pin: u32, mode: PinMode) -> Result<()> {
        let mut state = self.state();
        match mode {
            PinMode::Input => state.request_input(pin),
            PinMode::Output => {
                let lines = state.request_output(pin, false)?;
                state.lines.insert(pin, LineHandle::Output(lines));
                Ok(())
            }
        }
    }

    fn set_pull(&self, pin: u32, pull: Pull) -> Result<()> {
        let mut state = self.state();
        state.pulls.insert(pin, pull);
        // Bias is fixed at request time, so an already requested input is
        // requested again.
        if matches!(state.lines.get(&pin), Some(LineHandle::Input(_))) {
            state.request_input(pin)?;
        }
        Ok(())
    }

    fn digital_read(&self, pin: u32) -> Result<bool> {
        let state = self.state();
        match state.lines.get(&pin) {
            Some(LineHandle::Input(lines)) => {
                let [value] = lines
                    .get_values([false; 1])
                    .with_context(|| format!("failed to read GPIO {pin}"))?;
                Ok(value)
            }
            Some(LineHandle::Watched(level)) => Ok(level.load(Ordering::Relaxed)),
            Some(LineHandle::Pwm(pwm)) => Ok(pwm.duty.load(Ordering::Relaxed) > 0),
            Some(LineHandle::Output(_)) => Err(anyhow!("GPIO {pin} is configured as output")),
            None => Err(anyhow!("GPIO {pin} has not been configured")),
        }
    }

    fn digital_write(&self, pin: u32, high: bool) -> Result<()> {
        let mut state = self.state();
        if !state.lines.contains_key(&pin) {
            let lines = state.request_output(pin, high)?;
            state.lines.insert(pin, LineHandle::Output(lines));
            return Ok(());
        }
        match state.lines.get(&pin) {
            Some(LineHandle::Output(lines)) => lines
                .set_values([high])
                .with_context(|| format!("failed to write GPIO {pin}")),
            Some(LineHandle::Pwm(pwm)) => {
                let value = if high { pwm.range } else { 0 };
                pwm.duty.store(value, Ordering::Relaxed);
                Ok(())
            }
            Some(LineHandle::Input(_)) | Some(LineHandle::Watched(_)) => {
                Err(anyhow!("GPIO {pin} is configured as input"))
            }
            None => Err(anyhow!("GPIO {pin} has not been configured")),
        }
    }

    fn soft_pwm_create(&self, pin: u32, initial: u8, range: u8) -> Result<()> {
        if range == 0 {
            bail!("software PWM range for GPIO {pin} must be non-zero");
        }
        let mut state = self.state();
        let lines = state.request_output(pin, false)?;
        let duty = Arc::new(AtomicU8::new(initial.min(range)));
        let running = Arc::new(AtomicBool::new(true));

        let thread_duty = Arc::clone(&duty);
        let thread_running = Arc::clone(&running);
        thread::Builder::new()
            .name(format!("soft-pwm-{pin}"))
            .spawn(move || run_soft_pwm(pin, lines, range, thread_duty, thread_running))
            .context("failed to spawn software PWM thread")?;

        debug!(pin, initial, range, "software PWM started");
        state.lines.insert(
            pin,
            LineHandle::Pwm(SoftPwm {
                duty,
                range,
                running,
            }),
        );
        Ok(())
    }

    fn soft_pwm_write(&self, pin: u32, value: u8) -> Result<()> {
        let state = self.state();
        match state.lines.get(&pin) {
            Some(LineHandle::Pwm(pwm)) => {
                pwm.duty.store(value.min(pwm.range), Ordering::Relaxed);
                Ok(())
            }
            _ => Err(anyhow!("GPIO {pin} has no software PWM")),
        }
    }

    fn register_interrupt(
        &self,
        pin: u32,
        trigger: EdgeTrigger,
        events: Sender<PinEvent>,
    ) -> Result<()> {
        let mut state = self.state();
        state.lines.remove(&pin);
        let options = Options::input([pin])
            .bias(state.bias(pin))
            .edge(EdgeDetect::Both)
            .consumer(CONSUMER);
        let mut lines = state
            .chip
            .request_lines(options)
            .with_context(|| format!("failed to request edge events on GPIO {pin}"))?;
        let [initial] = lines
            .get_values([false; 1])
            .with_context(|| format!("failed to read GPIO {pin}"))?;
        let level = Arc::new(AtomicBool::new(initial));

        let thread_level = Arc::clone(&level);
        thread::Builder::new()
            .name(format!("gpio-edge-{pin}"))
            .spawn(move || loop {
                let event = match lines.read_event() {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, pin, "edge reader stopped");
                        break;
                    }
                };
                let edge = match event.edge {
                    gpiod::Edge::Rising => Edge::Rising,
                    gpiod::Edge::Falling => Edge::Falling,
                };
                thread_level.store(edge == Edge::Rising, Ordering::Relaxed);
                if trigger.matches(edge) && events.send(PinEvent { pin, edge }).is_err() {
                    break;
                }
            })
            .context("failed to spawn GPIO edge reader")?;

        state.lines.insert(pin, LineHandle::Watched(level));
        Ok(())
    }
}

fn run_soft_pwm(
    pin: u32,
    lines: Lines<Output>,
    range: u8,
    duty: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        let on = u32::from(duty.load(Ordering::Relaxed).min(range));
        let off = u32::from(range) - on;
        if on > 0 {
            if let Err(err) = lines.set_values([true]) {
                warn!(error = %err, pin, "software PWM write failed");
                break;
            }
            thread::sleep(PWM_STEP * on);
        }
        if off > 0 {
            if let Err(err) = lines.set_values([false]) {
                warn!(error = %err, pin, "software PWM write failed");
                break;
            }
            thread::sleep(PWM_STEP * off);
        }
    }
}

impl std::fmt::Debug for GpiodGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpiodGpio").finish_non_exhaustive()
    }
}
