/*!
Pattern contract and the static pattern registry.

A pattern is a pure function of its parameters and the elapsed time since its
start: rendering the same parameters at the same instant always produces the
same buffer. Patterns never see the wall clock; the caller owns the time origin.
*/

mod control;
mod rainbow;
mod solid;
mod test_sequence;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::ColorBuffer;
use crate::error::{PipelineError, Result};

pub use control::PatternControl;
pub use rainbow::{RainbowCycle, RainbowWave};
pub use solid::{Breathing, Solid};
pub use test_sequence::TestSequence;

/// Value of one named pattern parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Color([u8; 3]),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::Color([r, g, b]) => write!(f, "({}, {}, {})", r, g, b),
        }
    }
}

pub type Params = BTreeMap<String, ParamValue>;

pub trait Pattern: Send {
    fn name(&self) -> &'static str;

    /// Current parameter values
    fn params(&self) -> Params;

    /// Change one parameter. Unknown names are an error, never ignored.
    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()>;

    /// Write the full frame for `elapsed` time since the pattern started
    fn render(&self, elapsed: Duration, buffer: &mut ColorBuffer) -> Result<()>;

    /// Return to the time-zero state
    fn reset(&mut self) {}
}

/// Parameter table shared by the built-in patterns: fixed names, fixed kinds
#[derive(Debug, Clone)]
pub(crate) struct ParamSet {
    pattern: &'static str,
    values: Params,
}

impl ParamSet {
    pub(crate) fn new(pattern: &'static str, defaults: &[(&str, ParamValue)]) -> Self {
        Self {
            pattern,
            values: defaults
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        }
    }

    pub(crate) fn number(&self, name: &str) -> f64 {
        match self.values.get(name) {
            Some(ParamValue::Number(n)) => *n,
            _ => 0.0,
        }
    }

    pub(crate) fn color(&self, name: &str) -> [u8; 3] {
        match self.values.get(name) {
            Some(ParamValue::Color(c)) => *c,
            _ => [0; 3],
        }
    }

    pub(crate) fn values(&self) -> Params {
        self.values.clone()
    }

    /// Replace a value, keeping its name and kind
    pub(crate) fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        let Some(slot) = self.values.get_mut(name) else {
            return Err(PipelineError::UnknownParam {
                pattern: self.pattern.to_string(),
                name: name.to_string(),
                valid: self.values.keys().cloned().collect::<Vec<_>>().join(", "),
            });
        };
        match (*slot, value) {
            (ParamValue::Number(_), ParamValue::Number(n)) if !n.is_finite() => Err(
                PipelineError::invalid_param(name, format!("{} is not a finite number", n)),
            ),
            (ParamValue::Number(_), ParamValue::Number(_))
            | (ParamValue::Color(_), ParamValue::Color(_)) => {
                *slot = value;
                Ok(())
            }
            (ParamValue::Number(_), _) => {
                Err(PipelineError::invalid_param(name, "expected a number"))
            }
            (ParamValue::Color(_), _) => Err(PipelineError::invalid_param(
                name,
                "expected an [r, g, b] colour",
            )),
        }
    }
}

/// Reject values outside `range` before they reach the table
pub(crate) fn require_range(
    name: &str,
    value: ParamValue,
    range: std::ops::RangeInclusive<f64>,
) -> Result<()> {
    if let ParamValue::Number(n) = value {
        if !range.contains(&n) {
            return Err(PipelineError::invalid_param(
                name,
                format!("{} outside {}..={}", n, range.start(), range.end()),
            ));
        }
    }
    Ok(())
}

/// Strictly positive numbers, e.g. durations used as divisors
pub(crate) fn require_positive(name: &str, value: ParamValue) -> Result<()> {
    match value {
        ParamValue::Number(n) if n <= 0.0 => Err(PipelineError::invalid_param(
            name,
            format!("{} must be greater than zero", n),
        )),
        _ => Ok(()),
    }
}

type Constructor = fn() -> Box<dyn Pattern>;

fn solid() -> Box<dyn Pattern> {
    Box::new(Solid::default())
}

fn breathing() -> Box<dyn Pattern> {
    Box::new(Breathing::default())
}

fn rainbow_wave() -> Box<dyn Pattern> {
    Box::new(RainbowWave::default())
}

fn rainbow_cycle() -> Box<dyn Pattern> {
    Box::new(RainbowCycle::default())
}

fn test_sequence() -> Box<dyn Pattern> {
    Box::new(TestSequence::default())
}

/// Every available pattern, keyed by name
const PATTERNS: &[(&str, Constructor)] = &[
    ("solid", solid),
    ("breathing", breathing),
    ("rainbow_wave", rainbow_wave),
    ("rainbow_cycle", rainbow_cycle),
    ("test", test_sequence),
];

pub fn names() -> impl Iterator<Item = &'static str> {
    PATTERNS.iter().map(|(name, _)| *name)
}

/// Build a pattern at its default parameters for a chain of `led_count` pixels
pub fn create(name: &str, led_count: usize) -> Result<Box<dyn Pattern>> {
    if led_count == 0 {
        return Err(PipelineError::config("a pattern needs at least one LED"));
    }
    PATTERNS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, constructor)| constructor())
        .ok_or_else(|| PipelineError::UnknownPattern(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_format::Pixel;

    #[test]
    fn test_registry_lists_every_pattern() {
        let names: Vec<_> = names().collect();
        assert_eq!(
            names,
            vec!["solid", "breathing", "rainbow_wave", "rainbow_cycle", "test"]
        );
        for name in names {
            assert_eq!(create(name, 10).unwrap().name(), name);
        }
    }

    #[test]
    fn test_create_unknown_pattern() {
        assert!(matches!(
            create("plasma", 10),
            Err(PipelineError::UnknownPattern(name)) if name == "plasma"
        ));
        assert!(matches!(create("solid", 0), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_unknown_param_names_valid_ones() {
        let mut pattern = create("solid", 10).unwrap();
        let err = pattern
            .set_param("speed", ParamValue::Number(1.0))
            .unwrap_err();
        match err {
            PipelineError::UnknownParam {
                pattern,
                name,
                valid,
            } => {
                assert_eq!(pattern, "solid");
                assert_eq!(name, "speed");
                assert_eq!(valid, "blue, green, red");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_param_kind_is_checked() {
        let mut pattern = create("breathing", 10).unwrap();
        assert!(matches!(
            pattern.set_param("color", ParamValue::Number(3.0)),
            Err(PipelineError::InvalidParam { .. })
        ));
        assert!(matches!(
            pattern.set_param("cycle_time", ParamValue::Color([1, 2, 3])),
            Err(PipelineError::InvalidParam { .. })
        ));
        assert!(matches!(
            pattern.set_param("cycle_time", ParamValue::Number(f64::NAN)),
            Err(PipelineError::InvalidParam { .. })
        ));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        for name in names() {
            let pattern = create(name, 50).unwrap();
            let mut first = ColorBuffer::new(50);
            let mut second = ColorBuffer::new(50);
            // Different prior contents must not leak into the frame
            second.fill(Pixel::rgb(9, 9, 9));
            let at = Duration::from_millis(1_234);
            pattern.render(at, &mut first).unwrap();
            pattern.render(at, &mut second).unwrap();
            assert_eq!(first.pixels(), second.pixels(), "{} is not pure", name);
        }
    }

    #[test]
    fn test_param_value_from_json() {
        let params: Params =
            serde_json::from_str(r#"{"speed": 25, "color": [0, 100, 255]}"#).unwrap();
        assert_eq!(params["speed"], ParamValue::Number(25.0));
        assert_eq!(params["color"], ParamValue::Color([0, 100, 255]));
    }
}
