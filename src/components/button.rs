use std::time::{Duration, Instant};

use anyhow::Result;

use crate::clock::Clock;
use crate::hardware::{Gpio, PinMode, Pull};

use super::ButtonEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Released,
    Pressed,
    Holding,
}

#[derive(Debug, Clone, Copy)]
pub struct ButtonOptions {
    /// Raw level that means "pressed".
    pub pressed_is_high: bool,
    /// Hold events repeat at this interval while pressed. Zero disables them.
    pub hold_interval: Duration,
    pub debounce: Duration,
    pub pull: Option<Pull>,
}

impl Default for ButtonOptions {
    fn default() -> Self {
        Self {
            pressed_is_high: true,
            hold_interval: Duration::from_millis(1000),
            debounce: Duration::from_millis(50),
            pull: None,
        }
    }
}

/// Momentary push button. Edges only arm a trailing debounce deadline; the
/// pin is read and events produced from `on_tick`, so all state changes
/// happen on the control loop.
pub struct Button<G>
where
    G: Gpio,
{
    pin: u32,
    gpio: G,
    clock: Clock,
    options: ButtonOptions,
    state: ButtonState,
    press_start: Option<Instant>,
    debounce_deadline: Option<Instant>,
    hold_deadline: Option<Instant>,
}

impl<G> Button<G>
where
    G: Gpio,
{
    pub fn new(gpio: G, pin: u32, options: ButtonOptions, clock: Clock) -> Result<Self> {
        gpio.setup()?;
        gpio.pin_mode(pin, PinMode::Input)?;
        if let Some(pull) = options.pull {
            gpio.set_pull(pin, pull)?;
        }
        Ok(Self {
            pin,
            gpio,
            clock,
            options,
            state: ButtonState::Released,
            press_start: None,
            debounce_deadline: None,
            hold_deadline: None,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn state(&self) -> ButtonState {
        self.state
    }

    pub fn is_pressed(&self) -> Result<bool> {
        Ok(self.gpio.digital_read(self.pin)? == self.options.pressed_is_high)
    }

    pub fn is_released(&self) -> Result<bool> {
        Ok(!self.is_pressed()?)
    }

    /// Records a raw edge. A later edge inside the debounce window pushes the
    /// pending read back.
    pub fn on_edge(&mut self) {
        self.debounce_deadline = Some(self.clock.now() + self.options.debounce);
    }

    pub fn on_tick(&mut self) -> Result<Vec<ButtonEvent>> {
        let now = self.clock.now();
        let mut events = Vec::new();

        if let Some(due) = self.debounce_deadline.filter(|due| *due <= now) {
            self.debounce_deadline = None;
            self.emit_holds(due, &mut events);
            self.settle(due, &mut events)?;
        }
        self.emit_holds(now, &mut events);

        Ok(events)
    }

    fn settle(&mut self, at: Instant, events: &mut Vec<ButtonEvent>) -> Result<()> {
        let pressed = self.is_pressed()?;
        events.push(ButtonEvent::Change { pressed });

        match (self.state, pressed) {
            (ButtonState::Released, true) => {
                self.state = ButtonState::Pressed;
                self.press_start = Some(at);
                self.hold_deadline = (!self.options.hold_interval.is_zero())
                    .then(|| at + self.options.hold_interval);
                events.push(ButtonEvent::Press);
            }
            (ButtonState::Pressed | ButtonState::Holding, false) => {
                self.state = ButtonState::Released;
                self.press_start = None;
                self.hold_deadline = None;
                events.push(ButtonEvent::Release);
            }
            _ => {}
        }
        Ok(())
    }

    fn emit_holds(&mut self, until: Instant, events: &mut Vec<ButtonEvent>) {
        let Some(start) = self.press_start else {
            return;
        };
        while let Some(due) = self.hold_deadline.filter(|due| *due <= until) {
            events.push(ButtonEvent::Hold(due - start));
            self.state = ButtonState::Holding;
            self.hold_deadline = Some(due + self.options.hold_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::hardware::SimulatedGpio;

    const PIN: u32 = 3;

    fn button(options: ButtonOptions) -> (Button<SimulatedGpio>, SimulatedGpio, ManualClock) {
        let gpio = SimulatedGpio::new();
        let (clock, manual) = Clock::manual();
        let button = Button::new(gpio.clone(), PIN, options, clock).expect("init");
        (button, gpio, manual)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    /// Ticks every 10 ms up to `until`, collecting events.
    fn run_until(
        button: &mut Button<SimulatedGpio>,
        manual: &ManualClock,
        from: u64,
        until: u64,
    ) -> Vec<ButtonEvent> {
        let mut events = Vec::new();
        for at in (from..=until).step_by(10) {
            manual.set_elapsed(ms(at));
            events.extend(button.on_tick().unwrap());
        }
        events
    }

    fn edge(button: &mut Button<SimulatedGpio>, gpio: &SimulatedGpio, high: bool) {
        gpio.set_level(PIN, high);
        button.on_edge();
    }

    #[test]
    fn press_and_release_after_debounce() {
        let (mut button, gpio, manual) = button(ButtonOptions::default());

        edge(&mut button, &gpio, true);
        assert!(run_until(&mut button, &manual, 0, 40).is_empty());
        assert_eq!(
            run_until(&mut button, &manual, 50, 60),
            vec![ButtonEvent::Change { pressed: true }, ButtonEvent::Press]
        );
        assert_eq!(button.state(), ButtonState::Pressed);

        edge(&mut button, &gpio, false);
        assert_eq!(
            run_until(&mut button, &manual, 70, 200),
            vec![ButtonEvent::Change { pressed: false }, ButtonEvent::Release]
        );
        assert_eq!(button.state(), ButtonState::Released);
    }

    #[test]
    fn bounces_collapse_into_one_read() {
        let (mut button, gpio, manual) = button(ButtonOptions::default());

        edge(&mut button, &gpio, true);
        manual.set_elapsed(ms(20));
        edge(&mut button, &gpio, false);
        manual.set_elapsed(ms(40));
        edge(&mut button, &gpio, true);

        // settles 50 ms after the last edge
        assert!(run_until(&mut button, &manual, 40, 80).is_empty());
        assert_eq!(
            run_until(&mut button, &manual, 90, 90),
            vec![ButtonEvent::Change { pressed: true }, ButtonEvent::Press]
        );
    }

    #[test]
    fn hold_repeats_until_release() {
        let (mut button, gpio, manual) = button(ButtonOptions::default());

        edge(&mut button, &gpio, true);
        let mut events = run_until(&mut button, &manual, 0, 2500);
        manual.set_elapsed(ms(2500));
        edge(&mut button, &gpio, false);
        events.extend(run_until(&mut button, &manual, 2500, 4000));

        assert_eq!(
            events,
            vec![
                ButtonEvent::Change { pressed: true },
                ButtonEvent::Press,
                ButtonEvent::Hold(ms(1000)),
                ButtonEvent::Hold(ms(2000)),
                ButtonEvent::Change { pressed: false },
                ButtonEvent::Release,
            ]
        );
    }

    #[test]
    fn next_press_restarts_hold_timing() {
        let (mut button, gpio, manual) = button(ButtonOptions::default());

        edge(&mut button, &gpio, true);
        run_until(&mut button, &manual, 0, 1500);
        edge(&mut button, &gpio, false);
        run_until(&mut button, &manual, 1510, 1600);

        edge(&mut button, &gpio, true);
        let events = run_until(&mut button, &manual, 1610, 2700);
        assert_eq!(
            events,
            vec![
                ButtonEvent::Change { pressed: true },
                ButtonEvent::Press,
                ButtonEvent::Hold(ms(1000)),
            ]
        );
    }

    #[test]
    fn late_tick_catches_up_on_holds() {
        let (mut button, gpio, manual) = button(ButtonOptions::default());

        edge(&mut button, &gpio, true);
        manual.set_elapsed(ms(3100));
        assert_eq!(
            button.on_tick().unwrap(),
            vec![
                ButtonEvent::Change { pressed: true },
                ButtonEvent::Press,
                ButtonEvent::Hold(ms(1000)),
                ButtonEvent::Hold(ms(2000)),
                ButtonEvent::Hold(ms(3000)),
            ]
        );
    }

    #[test]
    fn active_low_polarity_and_pull() {
        let options = ButtonOptions {
            pressed_is_high: false,
            pull: Some(Pull::Up),
            ..Default::default()
        };
        let (mut button, gpio, manual) = button(options);
        assert_eq!(gpio.pull(PIN), Some(Pull::Up));
        assert_eq!(gpio.mode(PIN), Some(PinMode::Input));

        gpio.set_level(PIN, true);
        assert!(button.is_released().unwrap());

        edge(&mut button, &gpio, false);
        assert!(button.is_pressed().unwrap());
        assert_eq!(
            run_until(&mut button, &manual, 0, 50),
            vec![ButtonEvent::Change { pressed: true }, ButtonEvent::Press]
        );
    }

    #[test]
    fn zero_hold_interval_disables_holds() {
        let options = ButtonOptions {
            hold_interval: Duration::ZERO,
            ..Default::default()
        };
        let (mut button, gpio, manual) = button(options);

        edge(&mut button, &gpio, true);
        let events = run_until(&mut button, &manual, 0, 3000);
        assert_eq!(
            events,
            vec![ButtonEvent::Change { pressed: true }, ButtonEvent::Press]
        );
    }
}
