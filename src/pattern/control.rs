use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::info;

use super::{create, ParamValue, Params, Pattern};
use crate::buffer::ColorBuffer;
use crate::error::Result;

struct Active {
    pattern: Box<dyn Pattern>,
    started: Instant,
    brightness: u8,
}

/// Shared handle to the running pattern.
///
/// The pattern thread renders through it once per frame; anything else may
/// switch patterns or change parameters between frames. The transmit side
/// never takes this lock.
#[derive(Clone)]
pub struct PatternControl {
    active: Arc<Mutex<Active>>,
    led_count: usize,
}

impl PatternControl {
    pub fn new(pattern: Box<dyn Pattern>, led_count: usize, brightness: u8) -> Self {
        Self {
            active: Arc::new(Mutex::new(Active {
                pattern,
                started: Instant::now(),
                brightness,
            })),
            led_count,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Active> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the running pattern with a fresh one; time starts over
    pub fn switch_pattern(&self, name: &str) -> Result<()> {
        let pattern = create(name, self.led_count)?;
        let mut active = self.lock();
        info!("Switching pattern {} -> {}", active.pattern.name(), name);
        active.pattern = pattern;
        active.started = Instant::now();
        Ok(())
    }

    pub fn set_param(&self, name: &str, value: ParamValue) -> Result<()> {
        let mut active = self.lock();
        active.pattern.set_param(name, value)?;
        info!("{}.{} = {}", active.pattern.name(), name, value);
        Ok(())
    }

    /// Back to time zero
    pub fn reset(&self) {
        let mut active = self.lock();
        active.pattern.reset();
        active.started = Instant::now();
    }

    pub fn set_brightness(&self, brightness: u8) {
        self.lock().brightness = brightness;
    }

    pub fn brightness(&self) -> u8 {
        self.lock().brightness
    }

    pub fn params(&self) -> Params {
        self.lock().pattern.params()
    }

    pub fn pattern_name(&self) -> &'static str {
        self.lock().pattern.name()
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().started.elapsed()
    }

    /// Render the current frame, global brightness applied
    pub fn render(&self, buffer: &mut ColorBuffer) -> Result<()> {
        let active = self.lock();
        Self::render_locked(&active, active.started.elapsed(), buffer)
    }

    /// Render as if `elapsed` had passed since the pattern started
    pub fn render_at(&self, elapsed: Duration, buffer: &mut ColorBuffer) -> Result<()> {
        Self::render_locked(&self.lock(), elapsed, buffer)
    }

    fn render_locked(active: &Active, elapsed: Duration, buffer: &mut ColorBuffer) -> Result<()> {
        active.pattern.render(elapsed, buffer)?;
        buffer.scale(active.brightness);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pixel_format::Pixel;

    fn control(name: &str) -> PatternControl {
        PatternControl::new(create(name, 8).unwrap(), 8, 255)
    }

    #[test]
    fn test_switch_pattern() {
        let control = control("solid");
        control.switch_pattern("test").unwrap();
        assert_eq!(control.pattern_name(), "test");
        assert!(control.elapsed() < Duration::from_secs(1));

        assert!(matches!(
            control.switch_pattern("plasma"),
            Err(PipelineError::UnknownPattern(_))
        ));
        assert_eq!(control.pattern_name(), "test");
    }

    #[test]
    fn test_brightness_scales_render() {
        let control = control("solid");
        control.set_brightness(128);
        let mut buffer = ColorBuffer::new(8);
        control.render_at(Duration::ZERO, &mut buffer).unwrap();
        assert_eq!(buffer.pixels()[0], Pixel::rgb(128, 0, 0));
    }

    #[test]
    fn test_handle_is_shared() {
        let control = control("solid");
        let other = control.clone();
        other.set_param("blue", ParamValue::Number(10.0)).unwrap();
        assert_eq!(control.params()["blue"], ParamValue::Number(10.0));
    }
}
