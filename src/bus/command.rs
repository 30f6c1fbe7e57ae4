use serde::Deserialize;
use serde_json::Value;

use crate::components::{Colour, TransitionSpec};
use crate::error::PanelError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColourStep {
    #[serde(alias = "color")]
    pub colour: Colour,
    #[serde(default)]
    pub transition: Option<TransitionSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RgbCommand {
    /// Steps run in order; every step after the first is chained.
    Change(Vec<ColourStep>),
    Status,
}

#[derive(Deserialize)]
struct ChangeParams {
    queue: Vec<ColourStep>,
}

impl RgbCommand {
    pub fn parse(payload: &Value) -> Result<Self, PanelError> {
        let Some(command) = payload.get("command") else {
            let step = parse_step(payload.clone())?;
            return Ok(Self::Change(vec![step]));
        };

        match command.as_str() {
            Some("status") => Ok(Self::Status),
            Some("change") => {
                let params = payload.get("params").cloned().unwrap_or(Value::Null);
                let steps = if params.get("queue").is_some() {
                    serde_json::from_value::<ChangeParams>(params)
                        .map_err(|err| PanelError::InvalidCommand(err.to_string()))?
                        .queue
                } else {
                    vec![parse_step(params)?]
                };
                if steps.is_empty() {
                    return Err(PanelError::InvalidCommand("empty change queue".into()));
                }
                Ok(Self::Change(chain_steps(steps)))
            }
            Some(other) => Err(PanelError::InvalidCommand(format!(
                "unknown command `{other}`"
            ))),
            None => Err(PanelError::InvalidCommand(
                "`command` must be a string".into(),
            )),
        }
    }
}

fn parse_step(value: Value) -> Result<ColourStep, PanelError> {
    serde_json::from_value(value).map_err(|err| PanelError::InvalidCommand(err.to_string()))
}

fn chain_steps(steps: Vec<ColourStep>) -> Vec<ColourStep> {
    steps
        .into_iter()
        .enumerate()
        .map(|(index, mut step)| {
            if index > 0 {
                step.transition = Some(step.transition.unwrap_or_default().chained());
            }
            step
        })
        .collect()
}
