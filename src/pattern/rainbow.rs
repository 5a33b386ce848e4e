use std::time::Duration;

use super::{require_positive, require_range, ParamSet, ParamValue, Params, Pattern};
use crate::buffer::ColorBuffer;
use crate::error::Result;
use crate::pixel_format::Pixel;

/// HSV to RGB with hue in degrees, saturation and value in 0..=1
fn hsv(hue: f64, saturation: f64, value: f64) -> Pixel {
    let hue = hue.rem_euclid(360.0);
    let c = value * saturation;
    let x = c * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
    let m = value - c;
    let (r, g, b) = match (hue / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Pixel::clamped(
        ((r + m) * 255.0) as i32,
        ((g + m) * 255.0) as i32,
        ((b + m) * 255.0) as i32,
    )
}

fn set_shared(params: &mut ParamSet, name: &str, value: ParamValue) -> Result<()> {
    match name {
        "brightness" | "saturation" => require_range(name, value, 0.0..=1.0)?,
        "wave_length" | "cycle_time" => require_positive(name, value)?,
        _ => {}
    }
    params.set(name, value)
}

/// Rainbow travelling along the chain
#[derive(Debug, Clone)]
pub struct RainbowWave {
    params: ParamSet,
}

impl Default for RainbowWave {
    fn default() -> Self {
        Self {
            params: ParamSet::new(
                "rainbow_wave",
                &[
                    // LEDs per full rainbow
                    ("wave_length", ParamValue::Number(100.0)),
                    // LEDs per second
                    ("speed", ParamValue::Number(50.0)),
                    ("brightness", ParamValue::Number(1.0)),
                    ("saturation", ParamValue::Number(1.0)),
                ],
            ),
        }
    }
}

impl Pattern for RainbowWave {
    fn name(&self) -> &'static str {
        "rainbow_wave"
    }

    fn params(&self) -> Params {
        self.params.values()
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        set_shared(&mut self.params, name, value)
    }

    fn render(&self, elapsed: Duration, buffer: &mut ColorBuffer) -> Result<()> {
        let offset = elapsed.as_secs_f64() * self.params.number("speed");
        let wave_length = self.params.number("wave_length");
        let saturation = self.params.number("saturation");
        let brightness = self.params.number("brightness");

        for (position, pixel) in buffer.pixels_mut().iter_mut().enumerate() {
            let hue = (position as f64 + offset) / wave_length * 360.0;
            *pixel = hsv(hue, saturation, brightness);
        }
        Ok(())
    }
}

/// Whole chain stepping through the hue circle together
#[derive(Debug, Clone)]
pub struct RainbowCycle {
    params: ParamSet,
}

impl Default for RainbowCycle {
    fn default() -> Self {
        Self {
            params: ParamSet::new(
                "rainbow_cycle",
                &[
                    // Seconds per full turn of the hue circle
                    ("cycle_time", ParamValue::Number(5.0)),
                    ("brightness", ParamValue::Number(1.0)),
                    ("saturation", ParamValue::Number(1.0)),
                ],
            ),
        }
    }
}

impl Pattern for RainbowCycle {
    fn name(&self) -> &'static str {
        "rainbow_cycle"
    }

    fn params(&self) -> Params {
        self.params.values()
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        set_shared(&mut self.params, name, value)
    }

    fn render(&self, elapsed: Duration, buffer: &mut ColorBuffer) -> Result<()> {
        let hue = elapsed.as_secs_f64() / self.params.number("cycle_time") * 360.0;
        buffer.fill(hsv(
            hue,
            self.params.number("saturation"),
            self.params.number("brightness"),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(hsv(0.0, 1.0, 1.0), Pixel::rgb(255, 0, 0));
        assert_eq!(hsv(120.0, 1.0, 1.0), Pixel::rgb(0, 255, 0));
        assert_eq!(hsv(240.0, 1.0, 1.0), Pixel::rgb(0, 0, 255));
        assert_eq!(hsv(360.0, 1.0, 1.0), Pixel::rgb(255, 0, 0));
        assert_eq!(hsv(-120.0, 1.0, 1.0), Pixel::rgb(0, 0, 255));
        assert_eq!(hsv(77.0, 0.0, 1.0), Pixel::rgb(255, 255, 255));
        assert_eq!(hsv(77.0, 1.0, 0.0), Pixel::OFF);
    }

    #[test]
    fn test_wave_moves_with_time() {
        let wave = RainbowWave::default();
        let mut at_zero = ColorBuffer::new(100);
        let mut later = ColorBuffer::new(100);
        wave.render(Duration::ZERO, &mut at_zero).unwrap();
        // 50 LEDs/s for 200ms shifts the rainbow by ten pixels
        wave.render(Duration::from_millis(200), &mut later).unwrap();

        assert_eq!(at_zero.pixels()[0], Pixel::rgb(255, 0, 0));
        assert_eq!(&later.pixels()[..90], &at_zero.pixels()[10..]);
    }

    #[test]
    fn test_cycle_is_uniform() {
        let cycle = RainbowCycle::default();
        let mut buffer = ColorBuffer::new(20);
        cycle
            .render(Duration::from_millis(1_667), &mut buffer)
            .unwrap();
        let first = buffer.pixels()[0];
        assert!(buffer.pixels().iter().all(|&p| p == first));
        assert_ne!(first, Pixel::rgb(255, 0, 0));
    }

    #[test]
    fn test_wave_length_must_be_positive() {
        let mut wave = RainbowWave::default();
        assert!(wave
            .set_param("wave_length", ParamValue::Number(0.0))
            .is_err());
        assert!(wave
            .set_param("saturation", ParamValue::Number(1.5))
            .is_err());
        wave.set_param("speed", ParamValue::Number(-10.0)).unwrap();
    }
}
