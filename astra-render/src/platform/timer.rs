pub struct Timer {
    last_tick: std::time::Instant,
    pub delta_time: std::time::Duration,
}

impl Default for Timer {
    fn default() -> Self {
        Self {
            last_tick: std::time::Instant::now(),
            delta_time: std::time::Duration::ZERO,
        }
    }
}

impl Timer {
    pub fn tick(&mut self) {
        let now = std::time::Instant::now();
        self.delta_time = now - self.last_tick;
        self.last_tick = now;
    }

    #[inline]
    pub fn delta_time_ms(&self) -> f32 {
        self.delta_time.as_micros() as f32 / 1000.0
    }
}
