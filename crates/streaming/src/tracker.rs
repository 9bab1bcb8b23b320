use std::time::{Duration, Instant};

use foundation::{Viewport, ViewportError};
use tracing::debug;

/// Result of reporting a settled map region.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// The viewport-changed notification: resubscribe with this region.
    Changed(Viewport),
    /// Same region as the accepted (or pending) one.
    Unchanged,
    /// Too soon after the previous change; held until `until`.
    Deferred { until: Instant },
    /// Not a usable region; the previous viewport stays current.
    Rejected(ViewportError),
}

/// Turns raw viewport reports into change notifications.
///
/// Reports equal to the current region are no-ops. Changes closer together
/// than `min_interval` are coalesced: the newest candidate waits as pending and
/// is released by `poll` once the interval has passed, so the tracker always
/// converges on the latest region.
#[derive(Debug, Clone)]
pub struct ViewportTracker {
    current: Viewport,
    pending: Option<Viewport>,
    last_change: Option<Instant>,
    min_interval: Duration,
    notifications: u64,
}

impl ViewportTracker {
    pub fn new(initial: Viewport, min_interval: Duration) -> Self {
        Self {
            current: initial,
            pending: None,
            last_change: None,
            min_interval,
            notifications: 0,
        }
    }

    pub fn current(&self) -> Viewport {
        self.current
    }

    /// Number of `Changed` notifications emitted so far.
    pub fn notifications(&self) -> u64 {
        self.notifications
    }

    /// Reports the visible region as `[[lon, lat], [lon, lat]]`.
    pub fn report(&mut self, corners: [[f64; 2]; 2], now: Instant) -> ReportOutcome {
        match Viewport::from_array(corners) {
            Ok(candidate) => self.report_viewport(candidate, now),
            Err(err) => {
                debug!("ignoring viewport {corners:?}: {err}");
                ReportOutcome::Rejected(err)
            }
        }
    }

    pub fn report_viewport(&mut self, candidate: Viewport, now: Instant) -> ReportOutcome {
        if self.pending == Some(candidate) {
            return ReportOutcome::Unchanged;
        }
        if candidate == self.current {
            if self.pending.take().is_some() {
                debug!("pending viewport cancelled, back at {candidate}");
            }
            return ReportOutcome::Unchanged;
        }
        if let Some(until) = self.throttled_until(now) {
            debug!("deferring viewport {candidate}");
            self.pending = Some(candidate);
            return ReportOutcome::Deferred { until };
        }
        ReportOutcome::Changed(self.accept(candidate, now))
    }

    /// Releases the pending viewport once the throttle interval has passed.
    pub fn poll(&mut self, now: Instant) -> Option<Viewport> {
        let candidate = self.pending?;
        if self.throttled_until(now).is_some() {
            return None;
        }
        self.pending = None;
        Some(self.accept(candidate, now))
    }

    /// When `poll` should next be called, if anything is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending?;
        Some(
            self.last_change
                .map(|t| t + self.min_interval)
                .unwrap_or_else(Instant::now),
        )
    }

    fn throttled_until(&self, now: Instant) -> Option<Instant> {
        let until = self.last_change? + self.min_interval;
        (now < until).then_some(until)
    }

    fn accept(&mut self, candidate: Viewport, now: Instant) -> Viewport {
        debug!("viewport changed {} -> {candidate}", self.current);
        self.current = candidate;
        self.last_change = Some(now);
        self.notifications += 1;
        candidate
    }
}
