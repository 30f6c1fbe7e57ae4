use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PanelError;
use crate::hardware::{Gpio, PinMode, Pull};

use super::quadrature::{DecodeAlgorithm, Decoder, QuadratureDecoder};

/// Deltas accumulated before a direction is decided.
pub const TURN_WINDOW: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Clockwise,
    Anticlockwise,
}

impl Direction {
    pub fn from_sum(sum: i32) -> Option<Self> {
        match sum.signum() {
            1 => Some(Self::Clockwise),
            -1 => Some(Self::Anticlockwise),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clockwise => "clockwise",
            Self::Anticlockwise => "anticlockwise",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMethod {
    /// Sample both pins on a fixed interval.
    Polling,
    /// Sample on edge events from either pin.
    #[default]
    Interrupt,
}

/// Batches decoder deltas into directional turns.
#[derive(Debug, Clone, Default)]
pub struct TurnAggregator {
    window: Vec<i32>,
}

impl TurnAggregator {
    pub fn new() -> Self {
        Self {
            window: Vec::with_capacity(TURN_WINDOW),
        }
    }

    /// Returns `None` for zero deltas, which also clear the window since
    /// the encoder has settled.
    pub fn push(&mut self, delta: i32) -> Option<Direction> {
        if delta == 0 {
            self.window.clear();
            return None;
        }

        self.window.push(delta);
        if self.window.len() < TURN_WINDOW {
            return None;
        }

        let sum: i32 = self.window.drain(..).sum();
        Direction::from_sum(sum)
    }

    pub fn pending(&self) -> usize {
        self.window.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EncoderOptions {
    pub algorithm: DecodeAlgorithm,
    pub update_method: UpdateMethod,
    pub poll_interval: Duration,
    pub pull_a: Option<Pull>,
    pub pull_b: Option<Pull>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            algorithm: DecodeAlgorithm::default(),
            update_method: UpdateMethod::default(),
            poll_interval: Duration::from_millis(1),
            pull_a: None,
            pull_b: None,
        }
    }
}

pub struct RotaryEncoder<G>
where
    G: Gpio,
{
    gpio: G,
    pin_a: u32,
    pin_b: u32,
    options: EncoderOptions,
    decoder: Box<dyn QuadratureDecoder>,
    aggregator: TurnAggregator,
    last_levels: (bool, bool),
    failed: bool,
}

impl<G> RotaryEncoder<G>
where
    G: Gpio,
{
    pub fn new(gpio: G, pin_a: u32, pin_b: u32, options: EncoderOptions) -> Result<Self> {
        gpio.setup()?;
        gpio.pin_mode(pin_a, PinMode::Input)?;
        if let Some(pull) = options.pull_a {
            gpio.set_pull(pin_a, pull)?;
        }
        gpio.pin_mode(pin_b, PinMode::Input)?;
        if let Some(pull) = options.pull_b {
            gpio.set_pull(pin_b, pull)?;
        }

        let a = gpio.digital_read(pin_a)?;
        let b = gpio.digital_read(pin_b)?;

        Ok(Self {
            gpio,
            pin_a,
            pin_b,
            options,
            decoder: Box::new(Decoder::new(options.algorithm, a, b)),
            aggregator: TurnAggregator::new(),
            last_levels: (a, b),
            failed: false,
        })
    }

    pub fn pins(&self) -> (u32, u32) {
        (self.pin_a, self.pin_b)
    }

    pub fn update_method(&self) -> UpdateMethod {
        self.options.update_method
    }

    pub fn poll_interval(&self) -> Duration {
        self.options.poll_interval
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Reads both pins and feeds the sample through the decoder. This is
    /// the interrupt path: every edge on either pin lands here.
    pub fn read(&mut self) -> Result<Option<Direction>> {
        let (a, b) = self.sample()?;
        self.feed(a, b)
    }

    /// Polling path. Samples whose pin pair has not changed are skipped, so
    /// polling sees the same transitions an edge interrupt would.
    pub fn poll(&mut self) -> Result<Option<Direction>> {
        let (a, b) = self.sample()?;
        if (a, b) == self.last_levels {
            return Ok(None);
        }
        self.feed(a, b)
    }

    fn sample(&self) -> Result<(bool, bool)> {
        if self.failed {
            return Err(self.decode_error(0).into());
        }
        Ok((
            self.gpio.digital_read(self.pin_a)?,
            self.gpio.digital_read(self.pin_b)?,
        ))
    }

    fn feed(&mut self, a: bool, b: bool) -> Result<Option<Direction>> {
        self.last_levels = (a, b);
        let delta = self.decoder.decode(a, b);
        if !(-2..=2).contains(&delta) {
            self.failed = true;
            return Err(self.decode_error(delta).into());
        }

        let direction = self.aggregator.push(delta);
        if delta != 0 {
            debug!(
                pin_a = self.pin_a,
                pin_b = self.pin_b,
                delta,
                pending = self.aggregator.pending(),
                "encoder step"
            );
        }
        Ok(direction)
    }

    fn decode_error(&self, delta: i32) -> PanelError {
        PanelError::Decode {
            pin_a: self.pin_a,
            pin_b: self.pin_b,
            delta,
        }
    }
}
