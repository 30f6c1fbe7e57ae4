use thiserror::Error;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("invalid configuration for {peripheral}: {reason}")]
    Configuration { peripheral: String, reason: String },

    /// The decoder produced a value outside the range a quadrature step can
    /// take. The algorithm is broken, so the encoder stops polling.
    #[error("decoder for encoder on pins {pin_a}/{pin_b} produced invalid delta {delta}")]
    Decode { pin_a: u32, pin_b: u32, delta: i32 },

    #[error("LED channel on pin {pin} has been destroyed")]
    ChannelDestroyed { pin: u32 },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to deliver message to {topic}: {reason}")]
    BusDelivery { topic: String, reason: String },
}

impl PanelError {
    pub fn configuration(peripheral: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            peripheral: peripheral.into(),
            reason: reason.into(),
        }
    }
}
