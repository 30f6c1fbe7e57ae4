use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::clock::DEFAULT_FRAME_INTERVAL;
use crate::components::quadrature::DecodeAlgorithm;
use crate::components::{ButtonOptions, Colour, EncoderOptions, TransitionSpec, UpdateMethod};
use crate::error::PanelError;
use crate::hardware::{HardwareConfig, Pull};

const CONFIG_ENV: &str = "PANEL_CTRL_CONFIG";
const CONFIG_DIR: &str = "panel_ctrl";
const CONFIG_NAME: &str = "panel.json";

#[derive(Debug, Clone)]
pub struct PanelSettings {
    pub path: PathBuf,
    pub config: PanelConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PanelConfig {
    pub buttons: Vec<ButtonConfig>,
    #[serde(alias = "rotary_encoders")]
    pub rotary_encoders: Vec<EncoderConfig>,
    #[serde(rename = "RGBLEDs", alias = "rgbLeds", alias = "rgb_leds")]
    pub rgb_leds: Vec<RgbLedConfig>,
    pub animation: AnimationConfig,
    #[serde(alias = "hardware")]
    pub gpio: HardwareConfig,
}

/// A bare pin number or a pin with per-pin options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PinConfig {
    Number(u32),
    Detailed {
        pin: u32,
        #[serde(default)]
        pull: Option<Pull>,
        #[serde(default, rename = "pressedIsHigh", alias = "pressed_is_high")]
        pressed_is_high: Option<bool>,
    },
}

impl PinConfig {
    pub fn pin(&self) -> u32 {
        match *self {
            Self::Number(pin) | Self::Detailed { pin, .. } => pin,
        }
    }

    pub fn pull(&self) -> Option<Pull> {
        match *self {
            Self::Number(_) => None,
            Self::Detailed { pull, .. } => pull,
        }
    }

    pub fn pressed_is_high(&self) -> Option<bool> {
        match *self {
            Self::Number(_) => None,
            Self::Detailed {
                pressed_is_high, ..
            } => pressed_is_high,
        }
    }
}

fn pin_count_error(kind: &str, id: &str, expected: usize, found: usize) -> PanelError {
    PanelError::configuration(
        format!("{kind} `{id}`"),
        format!("expected {expected} pin(s), found {found}"),
    )
}

fn default_hold_time_ms() -> u64 {
    1000
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_reverse() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonConfig {
    pub id: String,
    pub pins: Vec<PinConfig>,
    #[serde(default = "default_hold_time_ms", alias = "hold_time_ms")]
    pub hold_time_ms: u64,
    #[serde(default = "default_debounce_ms", alias = "debounce_ms")]
    pub debounce_ms: u64,
}

impl ButtonConfig {
    pub fn pin_and_options(&self) -> Result<(u32, ButtonOptions), PanelError> {
        let [pin] = self.pins.as_slice() else {
            return Err(pin_count_error("button", &self.id, 1, self.pins.len()));
        };
        Ok((
            pin.pin(),
            ButtonOptions {
                pressed_is_high: pin.pressed_is_high().unwrap_or(true),
                hold_interval: Duration::from_millis(self.hold_time_ms),
                debounce: Duration::from_millis(self.debounce_ms),
                pull: pin.pull(),
            },
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderConfig {
    pub id: String,
    pub pins: Vec<PinConfig>,
    #[serde(default)]
    pub algorithm: DecodeAlgorithm,
    #[serde(default, alias = "update_method")]
    pub update_method: UpdateMethod,
    #[serde(default = "default_poll_interval_ms", alias = "poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl EncoderConfig {
    pub fn pins_and_options(&self) -> Result<(u32, u32, EncoderOptions), PanelError> {
        let [a, b] = self.pins.as_slice() else {
            return Err(pin_count_error("rotary encoder", &self.id, 2, self.pins.len()));
        };
        Ok((
            a.pin(),
            b.pin(),
            EncoderOptions {
                algorithm: self.algorithm,
                update_method: self.update_method,
                poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
                pull_a: a.pull(),
                pull_b: b.pull(),
            },
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RgbLedConfig {
    pub id: String,
    pub pins: Vec<PinConfig>,
    #[serde(default = "default_reverse")]
    pub reverse: bool,
    #[serde(default, alias = "color")]
    pub colour: Option<Colour>,
    #[serde(default)]
    pub transition: Option<TransitionSpec>,
}

impl RgbLedConfig {
    pub fn rgb_pins(&self) -> Result<[u32; 3], PanelError> {
        let [r, g, b] = self.pins.as_slice() else {
            return Err(pin_count_error("RGB LED", &self.id, 3, self.pins.len()));
        };
        Ok([r.pin(), g.pin(), b.pin()])
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnimationConfig {
    #[serde(alias = "interval_ms")]
    pub interval_ms: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_FRAME_INTERVAL.as_millis() as u64,
        }
    }
}

impl AnimationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Loads the first configuration file found. An explicitly given path must
/// exist.
pub fn load_settings(explicit: Option<&Path>) -> Result<Option<PanelSettings>> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("configuration file {} does not exist", path.display());
        }
    }

    for candidate in default_config_paths(explicit) {
        if !candidate.exists() {
            continue;
        }
        let contents = fs::read_to_string(&candidate).with_context(|| {
            format!(
                "failed to read panel_ctrl configuration at {}",
                candidate.display()
            )
        })?;
        let config = parse_config(&contents).with_context(|| {
            format!(
                "failed to parse panel_ctrl configuration at {}",
                candidate.display()
            )
        })?;
        return Ok(Some(PanelSettings {
            path: candidate,
            config,
        }));
    }
    Ok(None)
}

pub fn parse_config(contents: &str) -> Result<PanelConfig> {
    serde_json::from_str(contents).context("configuration file is not a valid panel description")
}

pub fn default_config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(explicit) = explicit {
        paths.push(explicit.to_path_buf());
    }

    if let Some(from_env) = env::var_os(CONFIG_ENV) {
        paths.push(PathBuf::from(from_env));
    }

    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join(CONFIG_DIR).join(CONFIG_NAME));
    }

    if let Some(home) = env::var_os("HOME") {
        paths.push(
            PathBuf::from(home)
                .join(".config")
                .join(CONFIG_DIR)
                .join(CONFIG_NAME),
        );
    }

    paths.push(PathBuf::from(CONFIG_NAME));
    paths.push(PathBuf::from("config").join(CONFIG_NAME));

    paths
}
