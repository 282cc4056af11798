//! Scheduled Internal Messages
//!
//! The mirror profile never sleeps. Anything that has to happen later is
//! recorded here as a deadline for one of a fixed set of internal messages,
//! and delivered by whoever drives the profile once the deadline passes.
//!
//! Each message has at most one pending instance: scheduling it again
//! replaces the previous deadline, and cancelling it removes it.

use embassy_time::Instant;

/// Internal messages the mirror profile can schedule for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Re-kick the mirror state machine after a backoff
    DelayedKick,
    /// Move the peer link to the idle subrate preset
    PeerLinkPolicyIdleTimeout,
    /// Stop waiting for the QHS link and treat it as ready
    QhsStartTimeout,
    /// Put an idle peer link into sniff mode
    IdlePeerEnterSniff,
}

impl TimerId {
    /// All timers, in delivery priority order for equal deadlines
    pub const ALL: [TimerId; 4] = [
        TimerId::DelayedKick,
        TimerId::PeerLinkPolicyIdleTimeout,
        TimerId::QhsStartTimeout,
        TimerId::IdlePeerEnterSniff,
    ];

    const fn index(self) -> usize {
        match self {
            TimerId::DelayedKick => 0,
            TimerId::PeerLinkPolicyIdleTimeout => 1,
            TimerId::QhsStartTimeout => 2,
            TimerId::IdlePeerEnterSniff => 3,
        }
    }
}

/// Deadlines of the pending internal messages
#[derive(Debug, Clone, Default)]
pub struct Timers {
    deadlines: [Option<Instant>; 4],
}

impl Timers {
    /// Create an empty timer set
    #[must_use]
    pub const fn new() -> Self {
        Self {
            deadlines: [None; 4],
        }
    }

    /// Schedule `id` to fire at `deadline`, replacing any pending instance
    pub fn schedule(&mut self, id: TimerId, deadline: Instant) {
        debug!("[TIMER] schedule {:?} at {}", id, deadline.as_millis());
        self.deadlines[id.index()] = Some(deadline);
    }

    /// Cancel `id`. Returns whether it was pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.deadlines[id.index()].take().is_some()
    }

    /// Check whether `id` is pending
    #[must_use]
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines[id.index()].is_some()
    }

    /// Deadline of `id`, if pending
    #[must_use]
    pub fn deadline(&self, id: TimerId) -> Option<Instant> {
        self.deadlines[id.index()]
    }

    /// The earliest pending deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Remove and return the earliest timer whose deadline is at or before `now`
    pub fn take_expired(&mut self, now: Instant) -> Option<TimerId> {
        let mut expired: Option<(TimerId, Instant)> = None;
        for id in TimerId::ALL {
            if let Some(deadline) = self.deadlines[id.index()] {
                if deadline <= now && expired.is_none_or(|(_, earliest)| deadline < earliest) {
                    expired = Some((id, deadline));
                }
            }
        }
        let (id, _) = expired?;
        self.deadlines[id.index()] = None;
        Some(id)
    }

    /// Cancel everything
    pub fn clear(&mut self) {
        self.deadlines = [None; 4];
    }
}
