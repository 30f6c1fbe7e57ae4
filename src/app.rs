use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, MessageBus, RgbCommand, event_message, rgb_command_target};
use crate::clock::Clock;
use crate::components::{
    Button, Completion, PanelEvent, RgbLed, RotaryEncoder, TransitionOutcome, UpdateMethod,
};
use crate::config::{ButtonConfig, EncoderConfig, PanelConfig, RgbLedConfig};
use crate::error::PanelError;
use crate::hardware::{EdgeTrigger, Gpio, PinEvent};

/// Slowest rate at which buttons and polled encoders are serviced.
const MAX_INPUT_INTERVAL: Duration = Duration::from_millis(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
enum InputRoute {
    Button(usize),
    Encoder(usize),
}

struct ButtonSlot<G: Gpio> {
    id: String,
    button: Button<G>,
}

struct EncoderSlot<G: Gpio> {
    id: String,
    encoder: RotaryEncoder<G>,
}

struct RgbSlot<G: Gpio + Clone> {
    id: String,
    led: RgbLed<G>,
}

/// A change command waiting for its transitions to settle before replying.
struct PendingReply {
    message: BusMessage,
    led: usize,
    completion: Completion,
}

/// Owns every peripheral and runs the single control loop. Interrupts, bus
/// commands and clock frames all arrive as channel messages and are handled
/// one at a time here.
pub struct App<G, B>
where
    G: Gpio + Clone,
    B: MessageBus,
{
    gpio: G,
    bus: B,
    clock: Clock,
    buttons: Vec<ButtonSlot<G>>,
    encoders: Vec<EncoderSlot<G>>,
    rgb_leds: Vec<RgbSlot<G>>,
    routes: HashMap<u32, InputRoute>,
    pin_tx: Sender<PinEvent>,
    pin_events: Receiver<PinEvent>,
    commands: Option<Receiver<BusMessage>>,
    shutdown: Option<Receiver<()>>,
    pending: Vec<PendingReply>,
}

impl<G, B> App<G, B>
where
    G: Gpio + Clone,
    B: MessageBus,
{
    /// Sets up every configured peripheral. One that fails to set up is
    /// logged and left out; the rest still run.
    pub fn new(config: &PanelConfig, gpio: G, bus: B, clock: Clock) -> Self {
        let (pin_tx, pin_events) = crossbeam_channel::unbounded();
        let mut app = Self {
            gpio,
            bus,
            clock,
            buttons: Vec::new(),
            encoders: Vec::new(),
            rgb_leds: Vec::new(),
            routes: HashMap::new(),
            pin_tx,
            pin_events,
            commands: None,
            shutdown: None,
            pending: Vec::new(),
        };

        for button in &config.buttons {
            if let Err(err) = app.add_button(button) {
                warn!(error = %err, id = %button.id, "skipping button");
            }
        }
        for encoder in &config.rotary_encoders {
            if let Err(err) = app.add_encoder(encoder) {
                warn!(error = %err, id = %encoder.id, "skipping rotary encoder");
            }
        }
        for led in &config.rgb_leds {
            if let Err(err) = app.add_rgb_led(led) {
                warn!(error = %err, id = %led.id, "skipping RGB LED");
            }
        }

        info!(
            buttons = app.buttons.len(),
            encoders = app.encoders.len(),
            rgb_leds = app.rgb_leds.len(),
            "peripherals ready"
        );
        app
    }

    fn add_button(&mut self, config: &ButtonConfig) -> Result<()> {
        let (pin, options) = config.pin_and_options()?;
        let button = Button::new(self.gpio.clone(), pin, options, self.clock.clone())?;
        self.gpio
            .register_interrupt(pin, EdgeTrigger::Both, self.pin_tx.clone())?;

        self.routes.insert(pin, InputRoute::Button(self.buttons.len()));
        self.buttons.push(ButtonSlot {
            id: config.id.clone(),
            button,
        });
        info!(id = %config.id, pin, "button set up");
        Ok(())
    }

    fn add_encoder(&mut self, config: &EncoderConfig) -> Result<()> {
        let (pin_a, pin_b, options) = config.pins_and_options()?;
        let encoder = RotaryEncoder::new(self.gpio.clone(), pin_a, pin_b, options)?;
        if options.update_method == UpdateMethod::Interrupt {
            for pin in [pin_a, pin_b] {
                self.gpio
                    .register_interrupt(pin, EdgeTrigger::Both, self.pin_tx.clone())?;
                self.routes
                    .insert(pin, InputRoute::Encoder(self.encoders.len()));
            }
        }

        self.encoders.push(EncoderSlot {
            id: config.id.clone(),
            encoder,
        });
        info!(
            id = %config.id,
            pin_a,
            pin_b,
            algorithm = ?options.algorithm,
            update_method = ?options.update_method,
            "rotary encoder set up"
        );
        Ok(())
    }

    fn add_rgb_led(&mut self, config: &RgbLedConfig) -> Result<()> {
        let pins = config.rgb_pins()?;
        let mut led = RgbLed::new(self.gpio.clone(), pins, config.reverse, self.clock.clone())?;
        if let Some(transition) = &config.transition {
            led.set_transitions(transition);
        }
        if let Some(colour) = config.colour {
            led.set_colour(colour, None)?;
        }

        self.rgb_leds.push(RgbSlot {
            id: config.id.clone(),
            led,
        });
        info!(id = %config.id, ?pins, reverse = config.reverse, "RGB LED set up");
        Ok(())
    }

    pub fn set_command_channel(&mut self, commands: Receiver<BusMessage>) {
        self.commands = Some(commands);
    }

    pub fn set_shutdown_channel(&mut self, shutdown: Receiver<()>) {
        self.shutdown = Some(shutdown);
    }

    fn input_interval(&self) -> Duration {
        self.encoders
            .iter()
            .filter(|slot| slot.encoder.update_method() == UpdateMethod::Polling)
            .map(|slot| slot.encoder.poll_interval())
            .fold(MAX_INPUT_INTERVAL, Duration::min)
    }

    pub fn run(&mut self) -> Result<()> {
        let frames = self.clock.frames();
        let inputs = crossbeam_channel::tick(self.input_interval());
        let pin_events = self.pin_events.clone();
        let mut commands = self
            .commands
            .clone()
            .unwrap_or_else(crossbeam_channel::never);
        let shutdown = self
            .shutdown
            .clone()
            .unwrap_or_else(crossbeam_channel::never);

        info!(
            frame_interval_ms = self.clock.frame_interval().as_millis() as u64,
            "control loop running"
        );
        loop {
            let mut commands_closed = false;
            crossbeam_channel::select! {
                recv(pin_events) -> event => {
                    if let Ok(event) = event {
                        self.handle_pin_event(event);
                    }
                },
                recv(commands) -> message => match message {
                    Ok(message) => self.handle_message(message),
                    Err(_) => commands_closed = true,
                },
                recv(inputs) -> _ => self.poll_inputs(),
                recv(frames) -> _ => self.on_frame(),
                recv(shutdown) -> _ => {
                    info!("shutdown requested");
                    break;
                }
            }
            if commands_closed {
                info!("command channel closed; no further commands");
                commands = crossbeam_channel::never();
            }
        }

        self.shutdown_leds();
        Ok(())
    }

    pub(crate) fn handle_pin_event(&mut self, event: PinEvent) {
        match self.routes.get(&event.pin).copied() {
            Some(InputRoute::Button(index)) => self.buttons[index].button.on_edge(),
            Some(InputRoute::Encoder(index)) => self.read_encoder(index, false),
            None => debug!(pin = event.pin, "edge on unrouted pin"),
        }
    }

    /// Services debounce and hold deadlines and samples polled encoders.
    pub(crate) fn poll_inputs(&mut self) {
        for index in 0..self.buttons.len() {
            let slot = &mut self.buttons[index];
            match slot.button.on_tick() {
                Ok(events) => {
                    let id = slot.id.clone();
                    for event in events {
                        self.publish_event(PanelEvent::Button {
                            id: id.clone(),
                            event,
                        });
                    }
                }
                Err(err) => warn!(error = %err, id = %slot.id, "failed to read button"),
            }
        }

        for index in 0..self.encoders.len() {
            if self.encoders[index].encoder.update_method() == UpdateMethod::Polling {
                self.read_encoder(index, true);
            }
        }
    }

    fn read_encoder(&mut self, index: usize, polling: bool) {
        let slot = &mut self.encoders[index];
        if slot.encoder.is_failed() {
            return;
        }
        let result = if polling {
            slot.encoder.poll()
        } else {
            slot.encoder.read()
        };

        match result {
            Ok(Some(direction)) => {
                let id = slot.id.clone();
                self.publish_event(PanelEvent::Turn { id, direction });
            }
            Ok(None) => {}
            Err(err) if matches!(err.downcast_ref::<PanelError>(), Some(PanelError::Decode { .. })) => {
                error!(error = %err, id = %slot.id, "rotary encoder disabled");
            }
            Err(err) => warn!(error = %err, id = %slot.id, "failed to read rotary encoder"),
        }
    }

    /// Advances every animation by one frame and answers change commands
    /// whose transitions have settled.
    pub(crate) fn on_frame(&mut self) {
        for slot in &mut self.rgb_leds {
            if let Err(err) = slot.led.on_tick() {
                warn!(error = %err, id = %slot.id, "LED update failed");
            }
        }
        self.flush_replies();
    }

    fn flush_replies(&mut self) {
        let mut index = 0;
        while index < self.pending.len() {
            let Some(outcome) = self.pending[index].completion.poll() else {
                index += 1;
                continue;
            };
            let pending = self.pending.swap_remove(index);
            let payload = match outcome {
                TransitionOutcome::Completed => {
                    json!({ "error": false, "colour": self.rgb_leds[pending.led].led.colour() })
                }
                TransitionOutcome::Interrupted => json!({ "error": false, "interrupted": true }),
            };
            self.reply(&pending.message, payload);
        }
    }

    pub(crate) fn handle_message(&mut self, message: BusMessage) {
        let Some(target) = rgb_command_target(&message.topic) else {
            debug!(topic = %message.topic, "ignoring message");
            return;
        };
        let explicit = message.payload.get("command").is_some() || message.reply_to.is_some();

        let Some(index) = self.rgb_leds.iter().position(|slot| slot.id == target) else {
            warn!(topic = %message.topic, "command for unknown RGB LED");
            self.reply_error(&message, format!("unknown RGB LED `{target}`"));
            return;
        };

        let command = match RgbCommand::parse(&message.payload) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, topic = %message.topic, "rejecting command");
                self.reply_error(&message, err.to_string());
                return;
            }
        };

        match command {
            RgbCommand::Status => {
                let colour = self.rgb_leds[index].led.colour();
                self.reply(&message, json!({ "error": false, "colour": colour }));
            }
            RgbCommand::Change(steps) => {
                let led = &mut self.rgb_leds[index].led;
                let mut parts = Vec::with_capacity(steps.len());
                for step in &steps {
                    match led.set_colour(step.colour, step.transition.as_ref()) {
                        Ok(completion) => parts.push(completion),
                        Err(err) => {
                            warn!(error = %err, topic = %message.topic, "colour change failed");
                            self.reply_error(&message, err.to_string());
                            return;
                        }
                    }
                }
                debug!(topic = %message.topic, steps = steps.len(), "colour change started");
                if explicit {
                    self.pending.push(PendingReply {
                        message,
                        led: index,
                        completion: Completion::all(parts),
                    });
                }
                self.flush_replies();
            }
        }
    }

    fn reply_error(&self, message: &BusMessage, reason: String) {
        self.reply(message, json!({ "error": true, "message": reason }));
    }

    fn reply(&self, message: &BusMessage, payload: Value) {
        let payload = message.reply_payload(payload);
        self.publish(&message.reply_topic(), &payload);
    }

    fn publish_event(&self, event: PanelEvent) {
        debug!(?event, "panel event");
        if let Some((topic, payload)) = event_message(&event) {
            self.publish(&topic, &payload);
        }
    }

    fn publish(&self, topic: &str, payload: &Value) {
        if let Err(err) = self.bus.publish(topic, payload) {
            warn!(error = %err, topic, "failed to publish message");
        }
    }

    /// Drives every RGB LED off through its transition, giving animations up
    /// to two seconds to finish.
    pub(crate) fn shutdown_leds(&mut self) {
        for slot in &mut self.rgb_leds {
            if slot.led.is_destroyed() {
                continue;
            }
            if let Err(err) = slot.led.destroy() {
                warn!(error = %err, id = %slot.id, "failed to switch LED off");
            }
        }

        let frame = self.clock.frame_interval();
        let frames = (SHUTDOWN_GRACE.as_millis() / frame.as_millis().max(1)) as usize;
        for _ in 0..frames {
            if !self.rgb_leds.iter().any(|slot| slot.led.is_animating()) {
                break;
            }
            thread::sleep(frame);
            self.on_frame();
        }
        self.flush_replies();
        info!("LEDs switched off");
    }
}
