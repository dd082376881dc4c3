use log::debug;

// Paces the frame loop at the configured rate and reports the measured frame
// duration, which is what the simulation steps by.
#[derive(Debug)]
pub struct FpsEstimator {
    iteration_start: std::time::Instant,
    pub iteration_duration: std::time::Duration,
}

static NATIVE_SLEEP_ACCURACY: std::time::Duration = std::time::Duration::from_micros(500);

impl FpsEstimator {
    pub fn new(fps: f64) -> FpsEstimator {
        FpsEstimator {
            iteration_start: std::time::Instant::now(),
            iteration_duration: std::time::Duration::from_secs_f64(1.0 / fps),
        }
    }

    fn high_resolution_sleep_until(done: &std::time::Instant) {
        let now = std::time::Instant::now();
        let system_sleep_until = done.checked_sub(NATIVE_SLEEP_ACCURACY).unwrap_or(now);
        if now < system_sleep_until {
            std::thread::sleep(system_sleep_until.duration_since(now));
        }
    }

    pub fn tick(&mut self) -> std::time::Duration {
        let sleep_until = self.iteration_start + self.iteration_duration;
        FpsEstimator::high_resolution_sleep_until(&sleep_until);
        let now = std::time::Instant::now();
        if now > sleep_until {
            debug!("Over time budget by: {:?}", now - sleep_until);
        }
        let delta_t = self.iteration_start.elapsed();
        self.iteration_start = std::time::Instant::now();
        delta_t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_reports_elapsed_time() {
        let mut estimator = FpsEstimator::new(200.0);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let dt = estimator.tick();
        assert!(dt >= std::time::Duration::from_millis(2));
    }
}
