use std::time::Duration;

use super::{require_positive, ParamSet, ParamValue, Params, Pattern};
use crate::buffer::ColorBuffer;
use crate::error::Result;
use crate::pixel_format::Pixel;

/// Hardware check: red, green, blue, then white at 20, 40, 60, 80 and 100%
const STEPS: [Pixel; 8] = [
    Pixel::rgb(255, 0, 0),
    Pixel::rgb(0, 255, 0),
    Pixel::rgb(0, 0, 255),
    Pixel::rgb(51, 51, 51),
    Pixel::rgb(102, 102, 102),
    Pixel::rgb(153, 153, 153),
    Pixel::rgb(204, 204, 204),
    Pixel::rgb(255, 255, 255),
];

#[derive(Debug, Clone)]
pub struct TestSequence {
    params: ParamSet,
}

impl Default for TestSequence {
    fn default() -> Self {
        Self {
            params: ParamSet::new("test", &[("step_duration", ParamValue::Number(3.0))]),
        }
    }
}

impl TestSequence {
    pub fn step_at(&self, elapsed: Duration) -> usize {
        let step = self.params.number("step_duration");
        let phase = elapsed.as_secs_f64() % (step * STEPS.len() as f64);
        ((phase / step) as usize).min(STEPS.len() - 1)
    }
}

impl Pattern for TestSequence {
    fn name(&self) -> &'static str {
        "test"
    }

    fn params(&self) -> Params {
        self.params.values()
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        require_positive(name, value)?;
        self.params.set(name, value)
    }

    fn render(&self, elapsed: Duration, buffer: &mut ColorBuffer) -> Result<()> {
        buffer.fill(STEPS[self.step_at(elapsed)]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_red() {
        let pattern = TestSequence::default();
        let mut buffer = ColorBuffer::new(10);
        pattern.render(Duration::ZERO, &mut buffer).unwrap();
        assert!(buffer.pixels().iter().all(|&p| p == Pixel::rgb(255, 0, 0)));
    }

    #[test]
    fn test_steps_and_wraps() {
        let mut pattern = TestSequence::default();
        pattern
            .set_param("step_duration", ParamValue::Number(1.0))
            .unwrap();

        assert_eq!(pattern.step_at(Duration::from_millis(999)), 0);
        assert_eq!(pattern.step_at(Duration::from_millis(1_000)), 1);
        assert_eq!(pattern.step_at(Duration::from_millis(3_500)), 3);
        assert_eq!(pattern.step_at(Duration::from_millis(7_999)), 7);
        assert_eq!(pattern.step_at(Duration::from_millis(8_000)), 0);

        let mut buffer = ColorBuffer::new(3);
        pattern
            .render(Duration::from_millis(4_200), &mut buffer)
            .unwrap();
        assert_eq!(buffer.pixels()[2], Pixel::rgb(102, 102, 102));
    }
}
