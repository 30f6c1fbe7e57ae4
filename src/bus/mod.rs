pub mod command;
pub mod stdio;

pub use command::{ColourStep, RgbCommand};
pub use stdio::{JsonLinesBus, start as start_stdio};

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::components::{ButtonEvent, PanelEvent};

pub const RGB_COMMAND_PREFIX: &str = "command.rgb-led.";

/// Outbound side of the message bus.
pub trait MessageBus: Send {
    fn publish(&self, topic: &str, payload: &Value) -> Result<()>;
}

/// An inbound message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, alias = "reply_to")]
    pub reply_to: Option<String>,
    #[serde(default, alias = "correlation_id")]
    pub correlation_id: Option<Value>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            reply_to: None,
            correlation_id: None,
        }
    }

    pub fn reply_topic(&self) -> String {
        self.reply_to
            .clone()
            .unwrap_or_else(|| format!("{}.response", self.topic))
    }

    /// Copies the correlation id, if any, into a reply payload.
    pub fn reply_payload(&self, mut payload: Value) -> Value {
        if let (Some(id), Some(object)) = (&self.correlation_id, payload.as_object_mut()) {
            object.insert("correlationId".to_string(), id.clone());
        }
        payload
    }
}

pub fn rgb_command_topic(id: &str) -> String {
    format!("{RGB_COMMAND_PREFIX}{id}")
}

/// Returns the RGB LED id a command topic addresses.
pub fn rgb_command_target(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(RGB_COMMAND_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Topic and payload an event is published as. `Change` events stay inside
/// the process.
pub fn event_message(event: &PanelEvent) -> Option<(String, Value)> {
    match event {
        PanelEvent::Button { id, event } => {
            let (name, payload) = match event {
                ButtonEvent::Change { .. } => return None,
                ButtonEvent::Press => ("press", json!({ "pressed": true })),
                ButtonEvent::Hold(duration) => (
                    "hold",
                    json!({ "pressed": true, "durationMs": duration.as_millis() as u64 }),
                ),
                ButtonEvent::Release => ("release", json!({ "pressed": false })),
            };
            Some((format!("event.button.{id}.{name}"), payload))
        }
        PanelEvent::Turn { id, direction } => Some((
            format!("event.rotary-encoder.{id}.turn"),
            json!({ "direction": direction }),
        )),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use anyhow::{Result, bail};
    use serde_json::Value;

    use super::MessageBus;

    /// Records everything published. Can be told to fail.
    #[derive(Clone, Default)]
    pub struct RecordingBus {
        pub published: Arc<Mutex<Vec<(String, Value)>>>,
        pub fail: Arc<Mutex<bool>>,
    }

    impl RecordingBus {
        pub fn messages(&self) -> Vec<(String, Value)> {
            self.published.lock().unwrap().clone()
        }

        pub fn topics(&self) -> Vec<String> {
            self.messages().into_iter().map(|(topic, _)| topic).collect()
        }
    }

    impl MessageBus for RecordingBus {
        fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
            if *self.fail.lock().unwrap() {
                bail!("bus unavailable");
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.clone()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::components::Direction;

    fn button(event: ButtonEvent) -> PanelEvent {
        PanelEvent::Button {
            id: "power".into(),
            event,
        }
    }

    #[test]
    fn button_events_map_to_topics() {
        assert_eq!(
            event_message(&button(ButtonEvent::Press)),
            Some(("event.button.power.press".into(), json!({ "pressed": true })))
        );
        assert_eq!(
            event_message(&button(ButtonEvent::Hold(Duration::from_millis(2000)))),
            Some((
                "event.button.power.hold".into(),
                json!({ "pressed": true, "durationMs": 2000 })
            ))
        );
        assert_eq!(
            event_message(&button(ButtonEvent::Release)),
            Some(("event.button.power.release".into(), json!({ "pressed": false })))
        );
        assert_eq!(event_message(&button(ButtonEvent::Change { pressed: true })), None);
    }

    #[test]
    fn turn_event_payload() {
        let event = PanelEvent::Turn {
            id: "volume".into(),
            direction: Direction::Anticlockwise,
        };
        assert_eq!(
            event_message(&event),
            Some((
                "event.rotary-encoder.volume.turn".into(),
                json!({ "direction": "anticlockwise" })
            ))
        );
    }

    #[test]
    fn replies_default_to_response_topic() {
        let mut message: BusMessage = serde_json::from_value(json!({
            "topic": "command.rgb-led.power",
            "payload": { "command": "status" },
            "correlationId": "abc"
        }))
        .unwrap();
        assert_eq!(message.reply_topic(), "command.rgb-led.power.response");
        assert_eq!(
            message.reply_payload(json!({ "error": false })),
            json!({ "error": false, "correlationId": "abc" })
        );

        message.reply_to = Some("client.42".into());
        assert_eq!(message.reply_topic(), "client.42");
    }

    #[test]
    fn command_topics() {
        assert_eq!(rgb_command_topic("power"), "command.rgb-led.power");
        assert_eq!(rgb_command_target("command.rgb-led.power"), Some("power"));
        assert_eq!(rgb_command_target("command.rgb-led."), None);
        assert_eq!(rgb_command_target("event.button.power.press"), None);
    }
}
