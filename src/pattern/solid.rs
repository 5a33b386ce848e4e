use std::f64::consts::TAU;
use std::time::Duration;

use super::{require_positive, require_range, ParamSet, ParamValue, Params, Pattern};
use crate::buffer::ColorBuffer;
use crate::error::Result;
use crate::pixel_format::Pixel;

/// One colour on every pixel
#[derive(Debug, Clone)]
pub struct Solid {
    params: ParamSet,
}

impl Default for Solid {
    fn default() -> Self {
        Self {
            params: ParamSet::new(
                "solid",
                &[
                    ("red", ParamValue::Number(255.0)),
                    ("green", ParamValue::Number(0.0)),
                    ("blue", ParamValue::Number(0.0)),
                ],
            ),
        }
    }
}

impl Pattern for Solid {
    fn name(&self) -> &'static str {
        "solid"
    }

    fn params(&self) -> Params {
        self.params.values()
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        require_range(name, value, 0.0..=255.0)?;
        self.params.set(name, value)
    }

    fn render(&self, _elapsed: Duration, buffer: &mut ColorBuffer) -> Result<()> {
        buffer.fill(Pixel::from_f32(
            self.params.number("red") as f32,
            self.params.number("green") as f32,
            self.params.number("blue") as f32,
        ));
        Ok(())
    }
}

/// Slow sine fade of one colour between two brightness levels
#[derive(Debug, Clone)]
pub struct Breathing {
    params: ParamSet,
}

impl Default for Breathing {
    fn default() -> Self {
        Self {
            params: ParamSet::new(
                "breathing",
                &[
                    ("color", ParamValue::Color([0, 100, 255])),
                    ("cycle_time", ParamValue::Number(3.0)),
                    ("min_brightness", ParamValue::Number(0.1)),
                    ("max_brightness", ParamValue::Number(1.0)),
                ],
            ),
        }
    }
}

impl Breathing {
    fn level(&self, elapsed: Duration) -> f64 {
        let phase = elapsed.as_secs_f64() / self.params.number("cycle_time") * TAU;
        let intensity = (phase.sin() + 1.0) / 2.0;
        let min = self.params.number("min_brightness");
        let max = self.params.number("max_brightness");
        min + (max - min) * intensity
    }
}

impl Pattern for Breathing {
    fn name(&self) -> &'static str {
        "breathing"
    }

    fn params(&self) -> Params {
        self.params.values()
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "cycle_time" => require_positive(name, value)?,
            "min_brightness" | "max_brightness" => require_range(name, value, 0.0..=1.0)?,
            _ => {}
        }
        self.params.set(name, value)
    }

    fn render(&self, elapsed: Duration, buffer: &mut ColorBuffer) -> Result<()> {
        let level = self.level(elapsed);
        let [r, g, b] = self.params.color("color");
        // Truncate like the integer colour maths elsewhere
        buffer.fill(Pixel::clamped(
            (r as f64 * level) as i32,
            (g as f64 * level) as i32,
            (b as f64 * level) as i32,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_fills_configured_colour() {
        let mut solid = Solid::default();
        solid.set_param("green", ParamValue::Number(128.0)).unwrap();
        let mut buffer = ColorBuffer::new(4);
        solid.render(Duration::ZERO, &mut buffer).unwrap();
        assert!(buffer.pixels().iter().all(|&p| p == Pixel::rgb(255, 128, 0)));
    }

    #[test]
    fn test_solid_rejects_out_of_range_channel() {
        let mut solid = Solid::default();
        assert!(solid.set_param("red", ParamValue::Number(300.0)).is_err());
        assert!(solid.set_param("red", ParamValue::Number(-1.0)).is_err());
        assert_eq!(solid.params()["red"], ParamValue::Number(255.0));
    }

    #[test]
    fn test_breathing_stays_between_levels() {
        let breathing = Breathing::default();
        let mut buffer = ColorBuffer::new(1);

        // sin(0) = 0: half way between min and max
        breathing.render(Duration::ZERO, &mut buffer).unwrap();
        assert_eq!(buffer.pixels()[0], Pixel::rgb(0, 55, 140));

        // Quarter cycle: full brightness
        breathing
            .render(Duration::from_millis(750), &mut buffer)
            .unwrap();
        assert_eq!(buffer.pixels()[0], Pixel::rgb(0, 100, 255));

        // Three quarters: the floor, never fully off
        breathing
            .render(Duration::from_millis(2_250), &mut buffer)
            .unwrap();
        assert_eq!(buffer.pixels()[0], Pixel::rgb(0, 10, 25));
    }

    #[test]
    fn test_breathing_rejects_zero_cycle() {
        let mut breathing = Breathing::default();
        assert!(breathing
            .set_param("cycle_time", ParamValue::Number(0.0))
            .is_err());
        breathing
            .set_param("color", ParamValue::Color([255, 0, 0]))
            .unwrap();
        assert_eq!(breathing.params()["color"], ParamValue::Color([255, 0, 0]));
    }
}
