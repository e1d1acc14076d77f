use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Returns the number of milliseconds since UNIX EPOCH
#[inline]
pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

/// Stopwatch which logs on drop when the guarded section overruns the
/// threshold `TR` in milliseconds. The protocol loop must stay responsive,
/// so block assembly and block intake guard themselves with one of these;
/// an overrun means chain mutation is starving message handling.
pub struct Stopwatch<const TR: u64 = 1000> {
    op: &'static str,
    start: Instant,
}

impl Stopwatch {
    pub fn new(op: &'static str) -> Self {
        Self { op, start: Instant::now() }
    }
}

impl<const TR: u64> Stopwatch<TR> {
    pub fn with_threshold(op: &'static str) -> Self {
        Self { op, start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<const TR: u64> Drop for Stopwatch<TR> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if elapsed > Duration::from_millis(TR) {
            crate::warn!("{} held the protocol loop for {:#?}", self.op, elapsed);
        }
    }
}
