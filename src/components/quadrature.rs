use std::collections::VecDeque;

use serde::Deserialize;

/// Number of recent single-step deltas kept to disambiguate double steps.
const STEP_HISTORY: usize = 4;

/// Ordinal position (0..=3) of the A/B pair within one quadrature cycle.
///
/// Clockwise rotation walks B/A through 00, 01, 11, 10, which maps onto
/// 0, 1, 2, 3.
pub fn rotation_sequence(a: bool, b: bool) -> u8 {
    u8::from(a ^ b) | (u8::from(b) << 1)
}

pub trait QuadratureDecoder {
    /// Feeds one sample of both pins and returns the signed step delta
    /// since the previous sample; 0 when nothing moved.
    fn decode(&mut self, a: bool, b: bool) -> i32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeAlgorithm {
    /// Ordinal difference with history-based double-step recovery.
    #[default]
    Delta,
    /// Previous/current state lookup table, one step per valid transition.
    #[serde(alias = "default")]
    Table,
}

#[derive(Debug, Clone)]
pub enum Decoder {
    Delta(DeltaDecoder),
    Table(TableDecoder),
}

impl Decoder {
    /// Builds the decoder primed with the pins' current levels.
    pub fn new(algorithm: DecodeAlgorithm, a: bool, b: bool) -> Self {
        match algorithm {
            DecodeAlgorithm::Delta => Self::Delta(DeltaDecoder::new(a, b)),
            DecodeAlgorithm::Table => Self::Table(TableDecoder::new(a, b)),
        }
    }
}

impl QuadratureDecoder for Decoder {
    fn decode(&mut self, a: bool, b: bool) -> i32 {
        match self {
            Self::Delta(decoder) => decoder.decode(a, b),
            Self::Table(decoder) => decoder.decode(a, b),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeltaDecoder {
    last_sequence: u8,
    history: VecDeque<i32>,
}

impl DeltaDecoder {
    pub fn new(a: bool, b: bool) -> Self {
        Self {
            last_sequence: rotation_sequence(a, b),
            history: VecDeque::with_capacity(STEP_HISTORY),
        }
    }

    pub fn last_sequence(&self) -> u8 {
        self.last_sequence
    }

    fn record_step(&mut self, step: i32) {
        if self.history.len() == STEP_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(step);
    }

    /// A double step is only trusted when the last two single steps agree;
    /// anything else is dropped as noise.
    fn resolve_double_step(&self) -> i32 {
        let mut recent = self.history.iter().rev();
        match (recent.next(), recent.next()) {
            (Some(&last), Some(&previous)) if last == previous => 2 * last.signum(),
            _ => 0,
        }
    }
}

impl QuadratureDecoder for DeltaDecoder {
    fn decode(&mut self, a: bool, b: bool) -> i32 {
        let sequence = rotation_sequence(a, b);
        if sequence == self.last_sequence {
            return 0;
        }

        let raw = (i32::from(sequence) - i32::from(self.last_sequence)).rem_euclid(4);
        self.last_sequence = sequence;

        match raw {
            1 => {
                self.record_step(1);
                1
            }
            3 => {
                self.record_step(-1);
                -1
            }
            2 => self.resolve_double_step(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableDecoder {
    last_state: u8,
}

impl TableDecoder {
    const CLOCKWISE: [u8; 4] = [0b1101, 0b0100, 0b0010, 0b1011];
    const ANTICLOCKWISE: [u8; 4] = [0b1110, 0b0111, 0b0001, 0b1000];

    pub fn new(a: bool, b: bool) -> Self {
        Self {
            last_state: Self::encode(a, b),
        }
    }

    fn encode(a: bool, b: bool) -> u8 {
        (u8::from(a) << 1) | u8::from(b)
    }
}

impl QuadratureDecoder for TableDecoder {
    fn decode(&mut self, a: bool, b: bool) -> i32 {
        let state = Self::encode(a, b);
        let transition = (self.last_state << 2) | state;
        self.last_state = state;

        if Self::CLOCKWISE.contains(&transition) {
            1
        } else if Self::ANTICLOCKWISE.contains(&transition) {
            -1
        } else {
            0
        }
    }
}
