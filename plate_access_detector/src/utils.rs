use std::time::{Duration, Instant};

/// Paces a source loop to a fixed frame rate.
pub struct FpsLimiter {
    fps_control: Instant,
    fps_wait: Duration,
}

impl FpsLimiter {
    pub fn new(fps: u64) -> Self {
        Self {
            fps_control: Instant::now(),
            fps_wait: Duration::from_millis(1000 / fps.max(1)),
        }
    }

    pub fn frame_time(&self) -> Duration {
        self.fps_wait
    }

    pub fn wait(&mut self) {
        let elapsed = self.fps_control.elapsed();

        if self.fps_wait > elapsed {
            spin_sleep::sleep(self.fps_wait - elapsed);
        }
        self.fps_control = Instant::now();
    }
}

/// Measures the rate frames go by, from the gap between consecutive ticks.
#[derive(Default)]
pub struct FpsMeter {
    last_frame: Option<Instant>,
}

impl FpsMeter {
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Rate since the previous tick; `None` on the first frame.
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        let fps = self.last_frame.and_then(|last| {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            (elapsed > 0.0).then(|| 1.0 / elapsed)
        });
        self.last_frame = Some(now);
        fps
    }
}

pub fn fps_label(fps: f64) -> String {
    format!("FPS: {:.2}", fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_time() {
        assert_eq!(FpsLimiter::new(20).frame_time(), Duration::from_millis(50));
        assert_eq!(FpsLimiter::new(0).frame_time(), Duration::from_secs(1));
    }

    #[test]
    fn test_meter_rate_between_frames() {
        let mut meter = FpsMeter::default();
        let start = Instant::now();
        assert_eq!(meter.tick_at(start), None);

        let fps = meter.tick_at(start + Duration::from_millis(40)).unwrap();
        assert!((fps - 25.0).abs() < 1e-6);
        assert_eq!(fps_label(fps), "FPS: 25.00");

        // same instant twice has no rate
        assert_eq!(meter.tick_at(start + Duration::from_millis(40)), None);
    }

    #[test]
    fn test_wait_paces_loop() {
        let mut limiter = FpsLimiter::new(50);
        let start = Instant::now();
        limiter.wait();
        limiter.wait();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
