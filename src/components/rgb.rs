use anyhow::Result;

use crate::clock::Clock;
use crate::hardware::Gpio;
use crate::util::{percentage_to_rgb, rgb_to_percentage};

use super::completion::Completion;
use super::led::{ChannelState, Led};
use super::transition::TransitionSpec;

pub type Colour = [u8; 3];

pub const BLACK: Colour = [0, 0, 0];
pub const WHITE: Colour = [255, 255, 255];

/// Three LED channels addressed as one colour.
pub struct RgbLed<G>
where
    G: Gpio + Clone,
{
    channels: [Led<G>; 3],
    last_colour: Option<Colour>,
}

impl<G> RgbLed<G>
where
    G: Gpio + Clone,
{
    /// Sets up the red, green and blue pins and switches the LED off.
    pub fn new(gpio: G, pins: [u32; 3], reverse: bool, clock: Clock) -> Result<Self> {
        let [red, green, blue] = pins;
        let mut led = Self {
            channels: [
                Led::new(gpio.clone(), red, reverse, clock.clone())?,
                Led::new(gpio.clone(), green, reverse, clock.clone())?,
                Led::new(gpio, blue, reverse, clock)?,
            ],
            last_colour: None,
        };
        led.off(None)?;
        Ok(led)
    }

    pub fn pins(&self) -> [u32; 3] {
        [
            self.channels[0].pin(),
            self.channels[1].pin(),
            self.channels[2].pin(),
        ]
    }

    /// Identical colours are skipped unless `spec` asks for a chain.
    pub fn set_colour(
        &mut self,
        colour: Colour,
        spec: Option<&TransitionSpec>,
    ) -> Result<Completion> {
        let chain = spec.is_some_and(TransitionSpec::is_chained);
        if !chain && self.last_colour == Some(colour) {
            return Ok(Completion::completed());
        }
        // recorded only once every channel accepted the change
        self.last_colour = None;

        let mut parts = Vec::with_capacity(3);
        for (channel, value) in self.channels.iter_mut().zip(colour) {
            parts.push(channel.set_brightness_in_step(rgb_to_percentage(value), spec)?);
        }
        self.last_colour = Some(colour);
        Ok(Completion::all(parts))
    }

    /// Colour currently on the pins, which differs from the last requested
    /// colour while a transition runs.
    pub fn colour(&self) -> Colour {
        self.channels
            .each_ref()
            .map(|channel| percentage_to_rgb(channel.brightness()))
    }

    pub fn transitions(&self) -> &TransitionSpec {
        self.channels[0].transitions()
    }

    pub fn set_transitions(&mut self, spec: &TransitionSpec) {
        for channel in &mut self.channels {
            channel.set_transitions(spec);
        }
    }

    pub fn on(&mut self, spec: Option<&TransitionSpec>) -> Result<Completion> {
        self.set_colour(WHITE, spec)
    }

    pub fn off(&mut self, spec: Option<&TransitionSpec>) -> Result<Completion> {
        self.set_colour(BLACK, spec)
    }

    pub fn is_animating(&self) -> bool {
        self.channels
            .iter()
            .any(|channel| channel.state() != ChannelState::Idle)
    }

    pub fn is_destroyed(&self) -> bool {
        self.channels.iter().all(Led::is_destroyed)
    }

    pub fn destroy(&mut self) -> Result<Completion> {
        self.last_colour = Some(BLACK);
        let mut parts = Vec::with_capacity(3);
        for channel in &mut self.channels {
            parts.push(channel.destroy()?);
        }
        Ok(Completion::all(parts))
    }

    /// Ticks every channel, returning the first write error after all
    /// channels have been advanced.
    pub fn on_tick(&mut self) -> Result<()> {
        let mut outcome = Ok(());
        for channel in &mut self.channels {
            if let Err(err) = channel.on_tick() {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::components::completion::TransitionOutcome;
    use crate::hardware::{PinWrite, SimulatedGpio};

    const PINS: [u32; 3] = [4, 5, 6];

    fn rgb() -> (RgbLed<SimulatedGpio>, SimulatedGpio, crate::clock::ManualClock) {
        let gpio = SimulatedGpio::new();
        let (clock, manual) = Clock::manual();
        let led = RgbLed::new(gpio.clone(), PINS, true, clock).expect("init");
        (led, gpio, manual)
    }

    #[test]
    fn starts_switched_off() {
        let (led, gpio, _) = rgb();
        // common anode: off is high
        assert_eq!(
            gpio.writes(),
            PINS.iter()
                .map(|&pin| PinWrite::Digital { pin, high: true })
                .collect::<Vec<_>>()
        );
        assert_eq!(led.colour(), BLACK);
    }

    #[test]
    fn converts_colour_to_percentages() {
        let (mut led, gpio, _) = rgb();
        gpio.clear_writes();

        led.set_colour([255, 128, 0], None).unwrap();
        assert_eq!(
            gpio.writes(),
            vec![
                PinWrite::Digital { pin: 4, high: false },
                PinWrite::PwmCreate { pin: 5, initial: 100, range: 100 },
                PinWrite::Pwm { pin: 5, value: 50 },
                PinWrite::Digital { pin: 6, high: true },
            ]
        );
        assert_eq!(led.colour(), [255, 128, 0]);
    }

    #[test]
    fn repeated_colour_is_a_no_op() {
        let (mut led, gpio, _) = rgb();

        led.set_colour([255, 128, 0], None).unwrap();
        gpio.clear_writes();

        let mut done = led.set_colour([255, 128, 0], None).unwrap();
        assert_eq!(done.poll(), Some(TransitionOutcome::Completed));
        assert!(gpio.writes().is_empty());
    }

    #[test]
    fn composite_completion_waits_for_all_channels() {
        let (mut led, _gpio, manual) = rgb();

        let spec = TransitionSpec::with_duration(Duration::from_millis(100));
        let mut done = led.set_colour([0, 0, 255], Some(&spec)).unwrap();
        assert!(led.is_animating());
        assert_eq!(done.poll(), None);

        manual.advance(Duration::from_millis(100));
        led.on_tick().unwrap();
        assert_eq!(done.poll(), Some(TransitionOutcome::Completed));
        assert_eq!(led.colour(), [0, 0, 255]);
        assert!(!led.is_animating());
    }

    #[test]
    fn superseded_colour_rejects_composite() {
        let (mut led, _gpio, _) = rgb();

        let spec = TransitionSpec::with_duration(Duration::from_millis(100));
        let mut first = led.set_colour([255, 0, 0], Some(&spec)).unwrap();
        let _second = led.set_colour([0, 255, 0], Some(&spec)).unwrap();
        assert_eq!(first.poll(), Some(TransitionOutcome::Interrupted));
    }

    #[test]
    fn chained_repeat_of_same_colour_is_queued() {
        let (mut led, gpio, manual) = rgb();

        let spec = TransitionSpec::with_duration(Duration::from_millis(100));
        led.set_colour([255, 255, 255], Some(&spec)).unwrap();
        let mut again = led
            .set_colour([255, 255, 255], Some(&spec.clone().chained()))
            .unwrap();
        assert_eq!(again.poll(), None);

        manual.advance(Duration::from_millis(100));
        led.on_tick().unwrap();
        manual.advance(Duration::from_millis(100));
        led.on_tick().unwrap();
        assert_eq!(again.poll(), Some(TransitionOutcome::Completed));
        assert!(gpio.is_pwm(4));
    }

    #[test]
    fn queued_colours_run_in_order_on_every_channel() {
        let (mut led, _gpio, manual) = rgb();

        led.set_colour([0, 128, 0], None).unwrap();
        led.set_colour(BLACK, None).unwrap();

        let spec = TransitionSpec::with_duration(Duration::from_millis(1000));
        let mut red = led.set_colour([255, 0, 0], Some(&spec)).unwrap();
        let mut green = led
            .set_colour([0, 255, 0], Some(&spec.clone().chained()))
            .unwrap();

        manual.set_elapsed(Duration::from_millis(500));
        led.on_tick().unwrap();
        assert_eq!(led.colour(), [128, 0, 0]);

        manual.set_elapsed(Duration::from_millis(1000));
        led.on_tick().unwrap();
        assert_eq!(led.colour(), [255, 0, 0]);
        assert_eq!(red.poll(), Some(TransitionOutcome::Completed));
        assert_eq!(green.poll(), None);

        manual.set_elapsed(Duration::from_millis(1500));
        led.on_tick().unwrap();
        assert_eq!(led.colour(), [128, 128, 0]);

        manual.set_elapsed(Duration::from_millis(2000));
        led.on_tick().unwrap();
        assert_eq!(led.colour(), [0, 255, 0]);
        assert_eq!(green.poll(), Some(TransitionOutcome::Completed));
    }

    #[test]
    fn failed_channel_write_does_not_dedupe_the_retry() {
        let (mut led, gpio, _) = rgb();
        gpio.clear_writes();

        gpio.fail_writes(5, true);
        assert!(led.set_colour(WHITE, None).is_err());

        gpio.fail_writes(5, false);
        led.set_colour(WHITE, None).unwrap();
        assert!(
            gpio.writes_for(5)
                .contains(&PinWrite::Digital { pin: 5, high: false })
        );
        assert_eq!(led.colour(), WHITE);
    }

    #[test]
    fn transitions_are_shared_by_all_channels() {
        let (mut led, _gpio, _) = rgb();
        led.set_transitions(&TransitionSpec::with_duration(Duration::from_millis(250)));
        assert_eq!(led.transitions().duration, Some(Duration::from_millis(250)));
        assert!(
            led.channels
                .iter()
                .all(|channel| channel.transitions().duration == Some(Duration::from_millis(250)))
        );
    }

    #[test]
    fn destroy_switches_off() {
        let (mut led, _gpio, _) = rgb();
        led.on(None).unwrap();
        let mut done = led.destroy().unwrap();
        assert_eq!(done.poll(), Some(TransitionOutcome::Completed));
        assert_eq!(led.colour(), BLACK);
        assert!(led.is_destroyed());
        assert!(led.set_colour([1, 2, 3], None).is_err());
    }
}
