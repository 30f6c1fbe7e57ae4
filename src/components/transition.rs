use std::f64::consts::PI;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};

use super::completion::Completer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EaseFamily {
    Quadratic,
    Cubic,
    Quartic,
    Quintic,
    Sinusoidal,
    Exponential,
    Circular,
    Elastic,
    Back,
    Bounce,
}

impl EaseFamily {
    const ALL: [Self; 10] = [
        Self::Quadratic,
        Self::Cubic,
        Self::Quartic,
        Self::Quintic,
        Self::Sinusoidal,
        Self::Exponential,
        Self::Circular,
        Self::Elastic,
        Self::Back,
        Self::Bounce,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Quadratic => "Quadratic",
            Self::Cubic => "Cubic",
            Self::Quartic => "Quartic",
            Self::Quintic => "Quintic",
            Self::Sinusoidal => "Sinusoidal",
            Self::Exponential => "Exponential",
            Self::Circular => "Circular",
            Self::Elastic => "Elastic",
            Self::Back => "Back",
            Self::Bounce => "Bounce",
        }
    }

    fn ease_in(self, k: f64) -> f64 {
        match self {
            Self::Quadratic => k * k,
            Self::Cubic => k.powi(3),
            Self::Quartic => k.powi(4),
            Self::Quintic => k.powi(5),
            Self::Sinusoidal => 1.0 - (k * PI / 2.0).cos(),
            Self::Exponential => {
                if k == 0.0 {
                    0.0
                } else {
                    1024f64.powf(k - 1.0)
                }
            }
            Self::Circular => 1.0 - (1.0 - k * k).sqrt(),
            Self::Elastic => {
                if k == 0.0 || k == 1.0 {
                    k
                } else {
                    -(2f64.powf(10.0 * (k - 1.0))) * ((k - 1.1) * 5.0 * PI).sin()
                }
            }
            Self::Back => {
                let s = 1.70158;
                k * k * ((s + 1.0) * k - s)
            }
            Self::Bounce => 1.0 - Self::Bounce.ease_out(1.0 - k),
        }
    }

    fn ease_out(self, k: f64) -> f64 {
        match self {
            Self::Bounce => {
                if k < 1.0 / 2.75 {
                    7.5625 * k * k
                } else if k < 2.0 / 2.75 {
                    let k = k - 1.5 / 2.75;
                    7.5625 * k * k + 0.75
                } else if k < 2.5 / 2.75 {
                    let k = k - 2.25 / 2.75;
                    7.5625 * k * k + 0.9375
                } else {
                    let k = k - 2.625 / 2.75;
                    7.5625 * k * k + 0.984375
                }
            }
            // every other family is symmetric: out(k) = 1 - in(1 - k)
            other => 1.0 - other.ease_in(1.0 - k),
        }
    }

    fn ease_in_out(self, k: f64) -> f64 {
        if k < 0.5 {
            self.ease_in(k * 2.0) * 0.5
        } else {
            self.ease_out(k * 2.0 - 1.0) * 0.5 + 0.5
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EaseMode {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Easing {
    #[default]
    Linear,
    Curve(EaseFamily, EaseMode),
}

static EASE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ease(InOut|In|Out)(Sin|[A-Z][a-z]*)$").expect("easing name pattern is valid")
});

impl Easing {
    /// Resolves names like `linear`, `easeInQuad`, `easeOutSine` or
    /// `easeInOutElastic`. The family part may be any prefix of the family
    /// name (`Quad`, `Quart`, `Expo`, `Circ`, `Sin`...).
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("linear") {
            return Some(Self::Linear);
        }

        let captures = EASE_NAME.captures(name)?;
        let mode = match captures.get(1)?.as_str() {
            "In" => EaseMode::In,
            "Out" => EaseMode::Out,
            _ => EaseMode::InOut,
        };
        let family_name = captures.get(2)?.as_str();
        let family_name = if family_name.starts_with("Sin") {
            "Sin"
        } else {
            family_name
        };
        let family = EaseFamily::ALL
            .into_iter()
            .find(|family| family.name().starts_with(family_name))?;
        Some(Self::Curve(family, mode))
    }

    /// Maps linear progress `k` in [0, 1] onto eased progress. Elastic and
    /// back curves overshoot outside [0, 1].
    pub fn apply(self, k: f64) -> f64 {
        let k = k.clamp(0.0, 1.0);
        match self {
            Self::Linear => k,
            Self::Curve(family, EaseMode::In) => family.ease_in(k),
            Self::Curve(family, EaseMode::Out) => family.ease_out(k),
            Self::Curve(family, EaseMode::InOut) => family.ease_in_out(k),
        }
    }
}

impl<'de> Deserialize<'de> for Easing {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Easing::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown easing `{name}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// Additional cycles after the first.
    Times(u32),
    Forever,
}

impl Repeat {
    fn take(&mut self) -> bool {
        match self {
            Self::Forever => true,
            Self::Times(0) => false,
            Self::Times(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }
}

impl<'de> Deserialize<'de> for Repeat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Count(u32),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Repeat::Forever,
            Raw::Flag(false) => Repeat::Times(0),
            Raw::Count(count) => Repeat::Times(count),
        })
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

/// Transition parameters. Every field is optional so per-call values can be
/// layered over a channel's defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransitionSpec {
    #[serde(deserialize_with = "deserialize_millis")]
    pub duration: Option<Duration>,
    #[serde(deserialize_with = "deserialize_millis")]
    pub delay: Option<Duration>,
    pub repeat: Option<Repeat>,
    pub yoyo: Option<bool>,
    pub easing: Option<Easing>,
    pub chain: Option<bool>,
}

impl TransitionSpec {
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
            ..Self::default()
        }
    }

    pub fn chained(mut self) -> Self {
        self.chain = Some(true);
        self
    }

    /// Fields set in `overrides` win.
    pub fn merge(&self, overrides: &TransitionSpec) -> TransitionSpec {
        TransitionSpec {
            duration: overrides.duration.or(self.duration),
            delay: overrides.delay.or(self.delay),
            repeat: overrides.repeat.or(self.repeat),
            yoyo: overrides.yoyo.or(self.yoyo),
            easing: overrides.easing.or(self.easing),
            chain: overrides.chain.or(self.chain),
        }
    }

    pub fn is_chained(&self) -> bool {
        self.chain.unwrap_or(false)
    }

    /// A zero duration counts as no animation.
    pub fn animated_duration(&self) -> Option<Duration> {
        self.duration.filter(|duration| !duration.is_zero())
    }

    pub(crate) fn plan(&self, target: u8) -> TweenPlan {
        let yoyo = self.yoyo.unwrap_or(false);
        let duration = self.animated_duration().unwrap_or(Duration::ZERO);
        let repeat = if duration.is_zero() {
            Repeat::Times(0)
        } else {
            self.repeat
                .unwrap_or(if yoyo { Repeat::Forever } else { Repeat::Times(0) })
        };
        TweenPlan {
            target,
            duration,
            delay: self.delay.unwrap_or(Duration::ZERO),
            repeat,
            yoyo,
            easing: self.easing.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TweenPlan {
    pub target: u8,
    pub duration: Duration,
    pub delay: Duration,
    pub repeat: Repeat,
    pub yoyo: bool,
    pub easing: Easing,
}

impl TweenPlan {
    pub fn start(self, from: u8, now: Instant, completer: Completer) -> Tween {
        Tween {
            from,
            to: self.target,
            duration: self.duration,
            repeat: self.repeat,
            yoyo: self.yoyo,
            easing: self.easing,
            reversed: false,
            cycle_start: now + self.delay,
            completer: Some(completer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TweenStep {
    pub value: u8,
    pub finished: bool,
}

/// A running interpolation between two brightness values.
#[derive(Debug)]
pub(crate) struct Tween {
    from: u8,
    to: u8,
    duration: Duration,
    repeat: Repeat,
    yoyo: bool,
    easing: Easing,
    reversed: bool,
    cycle_start: Instant,
    completer: Option<Completer>,
}

impl Tween {
    pub fn target(&self) -> u8 {
        self.to
    }

    pub fn take_completer(&mut self) -> Option<Completer> {
        self.completer.take()
    }

    fn endpoints(&self) -> (u8, u8) {
        if self.reversed {
            (self.to, self.from)
        } else {
            (self.from, self.to)
        }
    }

    /// Evaluates the tween at `now`. The end of a cycle always lands exactly
    /// on the cycle's end value; the next cycle, if any, starts from there.
    pub fn advance(&mut self, now: Instant) -> TweenStep {
        let (start, end) = self.endpoints();
        let Some(elapsed) = now.checked_duration_since(self.cycle_start) else {
            return TweenStep {
                value: start,
                finished: false,
            };
        };

        if elapsed >= self.duration {
            if !self.repeat.take() {
                return TweenStep {
                    value: end,
                    finished: true,
                };
            }
            if self.yoyo {
                self.reversed = !self.reversed;
            }
            self.cycle_start += self.duration;
            if now.duration_since(self.cycle_start) >= self.duration {
                self.cycle_start = now;
            }
            return TweenStep {
                value: end,
                finished: false,
            };
        }

        let progress = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        let eased = self.easing.apply(progress);
        let value = f64::from(start) + (f64::from(end) - f64::from(start)) * eased;
        TweenStep {
            value: value.round().clamp(0.0, 100.0) as u8,
            finished: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::completion::Completion;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn resolves_easing_names() {
        assert_eq!(Easing::from_name("linear"), Some(Easing::Linear));
        assert_eq!(
            Easing::from_name("easeInQuad"),
            Some(Easing::Curve(EaseFamily::Quadratic, EaseMode::In))
        );
        assert_eq!(
            Easing::from_name("easeOutSine"),
            Some(Easing::Curve(EaseFamily::Sinusoidal, EaseMode::Out))
        );
        assert_eq!(
            Easing::from_name("easeInOutQuart"),
            Some(Easing::Curve(EaseFamily::Quartic, EaseMode::InOut))
        );
        assert_eq!(
            Easing::from_name("easeInExpo"),
            Some(Easing::Curve(EaseFamily::Exponential, EaseMode::In))
        );
        assert_eq!(Easing::from_name("easeInWobble"), None);
        assert_eq!(Easing::from_name("quad"), None);
    }

    #[test]
    fn easing_curves_hit_endpoints() {
        for family in EaseFamily::ALL {
            for mode in [EaseMode::In, EaseMode::Out, EaseMode::InOut] {
                let easing = Easing::Curve(family, mode);
                assert!(close(easing.apply(0.0), 0.0), "{easing:?} at 0");
                assert!(close(easing.apply(1.0), 1.0), "{easing:?} at 1");
            }
        }
    }

    #[test]
    fn easing_shapes() {
        assert!(close(Easing::Linear.apply(0.25), 0.25));
        assert!(close(Easing::from_name("easeInQuad").unwrap().apply(0.5), 0.25));
        assert!(close(Easing::from_name("easeOutQuad").unwrap().apply(0.5), 0.75));
        assert!(close(Easing::from_name("easeInOutCubic").unwrap().apply(0.5), 0.5));
        assert!(Easing::from_name("easeInBack").unwrap().apply(0.2) < 0.0);
        assert!(close(Easing::Linear.apply(1.5), 1.0));
    }

    #[test]
    fn merge_prefers_overrides() {
        let defaults = TransitionSpec {
            duration: Some(Duration::from_millis(1000)),
            yoyo: Some(true),
            ..Default::default()
        };
        let overrides = TransitionSpec {
            duration: Some(Duration::from_millis(200)),
            chain: Some(true),
            ..Default::default()
        };

        let merged = defaults.merge(&overrides);
        assert_eq!(merged.duration, Some(Duration::from_millis(200)));
        assert_eq!(merged.yoyo, Some(true));
        assert_eq!(merged.chain, Some(true));
        assert_eq!(merged.easing, None);
    }

    #[test]
    fn parses_transition_spec_json() {
        let spec: TransitionSpec = serde_json::from_str(
            r#"{"duration": 1500, "delay": 10, "repeat": true, "yoyo": true, "easing": "easeInOutSine", "chain": true}"#,
        )
        .unwrap();
        assert_eq!(spec.duration, Some(Duration::from_millis(1500)));
        assert_eq!(spec.delay, Some(Duration::from_millis(10)));
        assert_eq!(spec.repeat, Some(Repeat::Forever));
        assert_eq!(spec.yoyo, Some(true));
        assert_eq!(
            spec.easing,
            Some(Easing::Curve(EaseFamily::Sinusoidal, EaseMode::InOut))
        );
        assert!(spec.is_chained());

        let spec: TransitionSpec = serde_json::from_str(r#"{"repeat": 3}"#).unwrap();
        assert_eq!(spec.repeat, Some(Repeat::Times(3)));

        assert!(serde_json::from_str::<TransitionSpec>(r#"{"easing": "wobbly"}"#).is_err());
    }

    #[test]
    fn yoyo_without_repeat_repeats_forever() {
        let spec = TransitionSpec {
            duration: Some(Duration::from_millis(10)),
            yoyo: Some(true),
            ..Default::default()
        };
        assert_eq!(spec.plan(50).repeat, Repeat::Forever);

        let instant = TransitionSpec::default();
        assert_eq!(instant.plan(50).repeat, Repeat::Times(0));
    }

    #[test]
    fn tween_interpolates_against_elapsed_time() {
        let start = Instant::now();
        let (completer, _completion) = Completion::pair();
        let mut tween = TransitionSpec::with_duration(Duration::from_millis(1000))
            .plan(50)
            .start(0, start, completer);

        assert_eq!(tween.advance(start).value, 0);
        assert_eq!(tween.advance(start + Duration::from_millis(500)).value, 25);
        let end = tween.advance(start + Duration::from_millis(1000));
        assert_eq!(end, TweenStep { value: 50, finished: true });
    }

    #[test]
    fn delayed_tween_holds_start_value() {
        let start = Instant::now();
        let (completer, _completion) = Completion::pair();
        let spec = TransitionSpec {
            duration: Some(Duration::from_millis(100)),
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let mut tween = spec.plan(100).start(20, start, completer);

        assert_eq!(tween.advance(start + Duration::from_millis(50)).value, 20);
        assert_eq!(tween.advance(start + Duration::from_millis(150)).value, 60);
        assert!(tween.advance(start + Duration::from_millis(200)).finished);
    }

    #[test]
    fn finite_repeat_restarts_then_finishes() {
        let start = Instant::now();
        let (completer, _completion) = Completion::pair();
        let spec = TransitionSpec {
            duration: Some(Duration::from_millis(100)),
            repeat: Some(Repeat::Times(1)),
            ..Default::default()
        };
        let mut tween = spec.plan(100).start(0, start, completer);

        let at = |ms| start + Duration::from_millis(ms);
        assert_eq!(tween.advance(at(100)), TweenStep { value: 100, finished: false });
        assert_eq!(tween.advance(at(150)).value, 50);
        assert_eq!(tween.advance(at(200)), TweenStep { value: 100, finished: true });
    }
}
