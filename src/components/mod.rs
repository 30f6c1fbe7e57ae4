pub mod button;
pub mod completion;
pub mod encoder;
pub mod led;
pub mod quadrature;
pub mod rgb;
pub mod transition;

use std::time::Duration;

pub use button::{Button, ButtonOptions};
pub use completion::{Completion, TransitionOutcome};
pub use encoder::{Direction, EncoderOptions, RotaryEncoder, UpdateMethod};
pub use rgb::{Colour, RgbLed};
pub use transition::TransitionSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Every debounced read, whichever way it went.
    Change { pressed: bool },
    Press,
    /// Time since the press began.
    Hold(Duration),
    Release,
}

/// Everything the peripherals report to the rest of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    Button { id: String, event: ButtonEvent },
    Turn { id: String, direction: Direction },
}
