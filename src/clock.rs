//! Clock collaborator (spec §6): `monotonic_now_seconds()` and
//! `wallclock_microseconds()`.
//!
//! Timestamp normalization (spec §4.4) samples both clocks at the moment of
//! dequeue and stores the instantaneous offset with the frame, rather than
//! computing a fixed offset once at start, because the wall clock can step
//! (spec §9). Both `monotonic_now_seconds` and `wallclock_microseconds` are
//! called back-to-back at the dequeue site for this reason.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Abstract clock surface so the session and tests can swap in a
/// deterministic fake.
pub trait Clock: Send + Sync {
    /// Monotonic host-uptime clock, in seconds, for `current_pts`/`pulled_pts`.
    fn monotonic_now_seconds(&self) -> f64;

    /// Wall-clock time in microseconds, used only to normalize a frame's
    /// IIDC-reported wall-clock timestamp against the monotonic clock.
    fn wallclock_microseconds(&self) -> i64;

    /// Normalizes an IIDC frame timestamp (wall-clock microseconds) into the
    /// monotonic-uptime `current_pts` by sampling both clocks "now" and
    /// subtracting the instantaneous offset.
    fn normalize_pts(&self, frame_wallclock_us: i64) -> f64 {
        let now_wall_us = self.wallclock_microseconds();
        let now_mono = self.monotonic_now_seconds();
        let age_seconds = (now_wall_us - frame_wallclock_us) as f64 / 1_000_000.0;
        now_mono - age_seconds
    }
}

/// Real clock, backed by `std::time`.
#[derive(Default)]
pub struct SystemClock {
    epoch: once_cell::sync::OnceCell<Instant>,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            epoch: once_cell::sync::OnceCell::new(),
        }
    }

    fn epoch(&self) -> Instant {
        *self.epoch.get_or_init(Instant::now)
    }
}

impl Clock for SystemClock {
    fn monotonic_now_seconds(&self) -> f64 {
        Instant::now().duration_since(self.epoch()).as_secs_f64()
    }

    fn wallclock_microseconds(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        now.as_micros() as i64
    }
}

/// Deterministic fake clock for tests: both readings are explicitly settable
/// and advance only when told to.
pub struct FakeClock {
    mono_seconds: std::sync::atomic::AtomicU64, // bits of an f64
    wall_us: std::sync::atomic::AtomicI64,
}

impl FakeClock {
    pub fn new(mono_seconds: f64, wall_us: i64) -> Self {
        FakeClock {
            mono_seconds: std::sync::atomic::AtomicU64::new(mono_seconds.to_bits()),
            wall_us: std::sync::atomic::AtomicI64::new(wall_us),
        }
    }

    pub fn advance(&self, delta_seconds: f64, delta_wall_us: i64) {
        let cur = f64::from_bits(self.mono_seconds.load(std::sync::atomic::Ordering::SeqCst));
        self.mono_seconds.store(
            (cur + delta_seconds).to_bits(),
            std::sync::atomic::Ordering::SeqCst,
        );
        self.wall_us
            .fetch_add(delta_wall_us, std::sync::atomic::Ordering::SeqCst);
    }

    /// Steps the wall clock only, without advancing the monotonic clock —
    /// used to test that `normalize_pts` tracks wall-clock steps correctly.
    pub fn step_wallclock_only(&self, delta_wall_us: i64) {
        self.wall_us
            .fetch_add(delta_wall_us, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn monotonic_now_seconds(&self) -> f64 {
        f64::from_bits(self.mono_seconds.load(std::sync::atomic::Ordering::SeqCst))
    }

    fn wallclock_microseconds(&self) -> i64 {
        self.wall_us.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_pts_tracks_dequeue_time() {
        let clock = FakeClock::new(10.0, 1_000_000);
        // A frame stamped at wall-clock 1_000_000us dequeued "now" (no age).
        assert_eq!(clock.normalize_pts(1_000_000), 10.0);

        // A frame stamped 500ms in the past relative to "now".
        clock.advance(0.5, 500_000);
        assert_eq!(clock.normalize_pts(1_000_000), 10.0);
    }

    #[test]
    fn normalize_pts_survives_wallclock_step() {
        let clock = FakeClock::new(10.0, 1_000_000);
        // Wall clock jumps forward 10 seconds with no monotonic change
        // (e.g. NTP step). A frame stamped before the step still normalizes
        // using the *current* instantaneous offset, not a cached one.
        clock.step_wallclock_only(10_000_000);
        let pts = clock.normalize_pts(1_000_000);
        assert_eq!(pts, 0.0);
    }
}
