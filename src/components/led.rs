use std::collections::VecDeque;

use anyhow::Result;
use tracing::debug;

use crate::clock::Clock;
use crate::error::PanelError;
use crate::hardware::{Gpio, PWM_RANGE, PinMode};

use super::completion::{Completer, Completion};
use super::transition::{TransitionSpec, Tween, TweenPlan};

pub const MAX_BRIGHTNESS: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Animating,
    /// A tween is running and at least one more waits behind it.
    ChainPending,
}

/// One LED conductor driven by digital writes or software PWM, with
/// brightness as an integer percentage.
pub struct Led<G>
where
    G: Gpio,
{
    pin: u32,
    reverse: bool,
    gpio: G,
    clock: Clock,
    brightness: u8,
    pwm: bool,
    defaults: TransitionSpec,
    active: Option<Tween>,
    chained: VecDeque<(TweenPlan, Completer)>,
    destroyed: bool,
}

impl<G> Led<G>
where
    G: Gpio,
{
    /// `reverse` marks an active-low conductor, such as one leg of a
    /// common-anode RGB LED.
    pub fn new(gpio: G, pin: u32, reverse: bool, clock: Clock) -> Result<Self> {
        gpio.setup()?;
        gpio.pin_mode(pin, PinMode::Output)?;
        Ok(Self {
            pin,
            reverse,
            gpio,
            clock,
            brightness: 0,
            pwm: false,
            defaults: TransitionSpec::default(),
            active: None,
            chained: VecDeque::new(),
            destroyed: false,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn transitions(&self) -> &TransitionSpec {
        &self.defaults
    }

    /// Layers `spec` over the current defaults.
    pub fn set_transitions(&mut self, spec: &TransitionSpec) {
        self.defaults = self.defaults.merge(spec);
    }

    pub fn state(&self) -> ChannelState {
        match (&self.active, self.chained.is_empty()) {
            (None, _) => ChannelState::Idle,
            (Some(_), true) => ChannelState::Animating,
            (Some(_), false) => ChannelState::ChainPending,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn on(&mut self, spec: Option<&TransitionSpec>) -> Result<Completion> {
        self.set_brightness(MAX_BRIGHTNESS, spec)
    }

    pub fn off(&mut self, spec: Option<&TransitionSpec>) -> Result<Completion> {
        self.set_brightness(0, spec)
    }

    pub fn set_brightness(
        &mut self,
        target: u8,
        overrides: Option<&TransitionSpec>,
    ) -> Result<Completion> {
        self.apply(target, overrides, true)
    }

    /// Like `set_brightness`, but an animated request for the current value
    /// still occupies the channel for the transition's duration. Keeps a
    /// channel in step with its siblings so chained steps start together.
    pub fn set_brightness_in_step(
        &mut self,
        target: u8,
        overrides: Option<&TransitionSpec>,
    ) -> Result<Completion> {
        self.apply(target, overrides, false)
    }

    fn apply(
        &mut self,
        target: u8,
        overrides: Option<&TransitionSpec>,
        skip_animated: bool,
    ) -> Result<Completion> {
        if self.destroyed {
            return Err(PanelError::ChannelDestroyed { pin: self.pin }.into());
        }

        let target = target.min(MAX_BRIGHTNESS);
        let spec = match overrides {
            Some(overrides) => self.defaults.merge(overrides),
            None => self.defaults.clone(),
        };
        let animated = spec.animated_duration().is_some() || spec.delay.is_some();
        let idle = self.active.is_none();

        if !animated && idle && !self.pwm && (target == 0 || target == MAX_BRIGHTNESS) {
            self.write(target)?;
            return Ok(Completion::completed());
        }

        let unchanged = idle && self.pwm && target == self.brightness && !spec.is_chained();
        if unchanged && (skip_animated || !animated) {
            return Ok(Completion::completed());
        }

        if !self.pwm {
            self.gpio
                .soft_pwm_create(self.pin, self.duty(self.brightness), PWM_RANGE)?;
            self.pwm = true;
            debug!(pin = self.pin, "software PWM enabled");
        }

        let (completer, completion) = Completion::pair();
        let plan = spec.plan(target);

        if spec.is_chained() && !idle {
            self.chained.push_back((plan, completer));
            return Ok(completion);
        }

        self.stop();
        if animated {
            self.active = Some(plan.start(self.brightness, self.clock.now(), completer));
        } else {
            self.write(target)?;
            completer.complete();
        }
        Ok(completion)
    }

    /// Advances the running tween against the clock. Called once per
    /// animation frame.
    pub fn on_tick(&mut self) -> Result<()> {
        let now = self.clock.now();
        let Some(tween) = self.active.as_mut() else {
            return Ok(());
        };

        let step = tween.advance(now);
        if step.finished {
            let from = tween.target();
            if let Some(completer) = tween.take_completer() {
                completer.complete();
            }
            self.active = self
                .chained
                .pop_front()
                .map(|(plan, completer)| plan.start(from, now, completer));
        }

        if step.value != self.brightness {
            self.write(step.value)?;
        }
        Ok(())
    }

    /// Drives the channel to 0 through the configured transition and
    /// rejects any further brightness changes.
    pub fn destroy(&mut self) -> Result<Completion> {
        let completion = self.set_brightness(0, None)?;
        self.destroyed = true;
        Ok(completion)
    }

    fn stop(&mut self) {
        if let Some(mut tween) = self.active.take() {
            if let Some(completer) = tween.take_completer() {
                completer.interrupt();
            }
        }
        for (_, completer) in self.chained.drain(..) {
            completer.interrupt();
        }
    }

    fn duty(&self, value: u8) -> u8 {
        if self.reverse {
            PWM_RANGE - value
        } else {
            value
        }
    }

    fn write(&mut self, value: u8) -> Result<()> {
        self.brightness = value;
        if self.pwm {
            self.gpio.soft_pwm_write(self.pin, self.duty(value))
        } else {
            self.gpio.digital_write(self.pin, (value > 0) != self.reverse)
        }
    }
}

impl<G> Drop for Led<G>
where
    G: Gpio,
{
    fn drop(&mut self) {
        self.stop();
    }
}
