//! Peer link subrating policy
//!
//! Sniff subrating on the peer link is picked from three presets:
//!
//! | preset       | subrate | subrate timeout |
//! |--------------|---------|-----------------|
//! | `Idle`       | 6       | 6               |
//! | `A2dpActive` | 2       | 0               |
//! | `EscoActive` | 1       | 0               |
//!
//! Both values are multiples of the sniff interval. When mirroring stops the
//! link goes back to the `EscoActive` preset and only drops to `Idle` after
//! the idle timeout.

use super::PeerLinkPolicyMode;
use crate::action::{Action, PeerLinkRequest, SniffSubrateParameters};
use crate::constants::{NUM_SNIFF_INSTANCES, SLOT_DURATION_US};
use crate::mirror::MirrorProfile;
use crate::timer::TimerId;

impl PeerLinkPolicyMode {
    /// Sniff subrate of this preset
    #[must_use]
    pub const fn subrate(self) -> u16 {
        match self {
            PeerLinkPolicyMode::Idle => 6,
            PeerLinkPolicyMode::A2dpActive => 2,
            PeerLinkPolicyMode::EscoActive => 1,
        }
    }

    /// Subrate timeout of this preset, in sniff intervals
    #[must_use]
    pub const fn subrate_timeout(self) -> u16 {
        match self {
            PeerLinkPolicyMode::Idle => 6,
            PeerLinkPolicyMode::A2dpActive | PeerLinkPolicyMode::EscoActive => 0,
        }
    }

    /// Subrating parameters for a sniff interval of `sniff_interval` slots
    #[must_use]
    pub const fn parameters(self, sniff_interval: u16) -> SniffSubrateParameters {
        let timeout = self.subrate_timeout().saturating_mul(sniff_interval);
        SniffSubrateParameters {
            max_remote_latency: self.subrate().saturating_mul(sniff_interval),
            min_remote_timeout: timeout,
            min_local_timeout: timeout,
        }
    }
}

impl MirrorProfile {
    fn apply_link_policy(&mut self, mode: PeerLinkPolicyMode) {
        let params = mode.parameters(self.options.sniff_interval_slots);
        debug!(
            "[LINK_POLICY] {:?} maxrl {} minrt {} minlt {}",
            mode, params.max_remote_latency, params.min_remote_timeout, params.min_local_timeout
        );
        self.push(Action::PeerLink(PeerLinkRequest::SniffSubrate {
            addr: self.peer_link.addr,
            params,
        }));
        self.link_policy = mode;
    }

    fn schedule_link_policy_idle_timeout(&mut self) {
        self.timers.schedule(
            TimerId::PeerLinkPolicyIdleTimeout,
            self.now + self.options.link_policy_idle_timeout,
        );
    }

    /// Start with the most aggressive preset and fall back to idle on timeout
    pub(crate) fn link_policy_init(&mut self) {
        info!("[LINK_POLICY] init");
        self.apply_link_policy(PeerLinkPolicyMode::EscoActive);
        self.timers.cancel(TimerId::PeerLinkPolicyIdleTimeout);
        self.schedule_link_policy_idle_timeout();
    }

    pub(crate) fn link_policy_set_a2dp_active(&mut self) {
        self.timers.cancel(TimerId::PeerLinkPolicyIdleTimeout);
        if self.channel.is_connected() && self.link_policy != PeerLinkPolicyMode::A2dpActive {
            self.apply_link_policy(PeerLinkPolicyMode::A2dpActive);
        }
    }

    pub(crate) fn link_policy_set_esco_active(&mut self) {
        self.timers.cancel(TimerId::PeerLinkPolicyIdleTimeout);
        if self.channel.is_connected() && self.link_policy != PeerLinkPolicyMode::EscoActive {
            self.apply_link_policy(PeerLinkPolicyMode::EscoActive);
        }
    }

    pub(crate) fn link_policy_set_idle(&mut self) {
        self.timers.cancel(TimerId::PeerLinkPolicyIdleTimeout);
        if self.channel.is_connected() && self.link_policy != PeerLinkPolicyMode::Idle {
            self.link_policy_set_esco_active();
            self.schedule_link_policy_idle_timeout();
        }
    }

    pub(crate) fn handle_link_policy_idle_timeout(&mut self) {
        if self.channel.is_connected() {
            self.apply_link_policy(PeerLinkPolicyMode::Idle);
        }
    }

    /// Current peer link subrating preset
    #[must_use]
    pub fn link_policy_mode(&self) -> PeerLinkPolicyMode {
        self.link_policy
    }

    /// Expected time in microseconds for a message to cross the peer link
    /// under the current subrating preset
    #[must_use]
    pub fn expected_peer_link_transmission_time(&self) -> u32 {
        u32::from(self.link_policy.subrate())
            * u32::from(self.options.sniff_interval_slots)
            * NUM_SNIFF_INSTANCES
            * SLOT_DURATION_US
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MirrorProfileOptions;
    use crate::l2cap::AudioSyncL2capState;
    use crate::mirror::tests::{connected_primary, drain, peer_addr};
    use embassy_time::Instant;

    fn subrate(max_remote_latency: u16, timeout: u16) -> Action {
        Action::PeerLink(PeerLinkRequest::SniffSubrate {
            addr: peer_addr(),
            params: SniffSubrateParameters {
                max_remote_latency,
                min_remote_timeout: timeout,
                min_local_timeout: timeout,
            },
        })
    }

    #[test]
    fn test_preset_parameters() {
        assert_eq!(
            PeerLinkPolicyMode::Idle.parameters(50),
            SniffSubrateParameters {
                max_remote_latency: 300,
                min_remote_timeout: 300,
                min_local_timeout: 300,
            }
        );
        assert_eq!(
            PeerLinkPolicyMode::A2dpActive.parameters(50).max_remote_latency,
            100
        );
        assert_eq!(PeerLinkPolicyMode::EscoActive.parameters(50).min_local_timeout, 0);
    }

    #[test]
    fn test_expected_transmission_time() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.link_policy = PeerLinkPolicyMode::Idle;
        assert_eq!(profile.expected_peer_link_transmission_time(), 375_000);
        profile.link_policy = PeerLinkPolicyMode::A2dpActive;
        assert_eq!(profile.expected_peer_link_transmission_time(), 125_000);
        profile.link_policy = PeerLinkPolicyMode::EscoActive;
        assert_eq!(profile.expected_peer_link_transmission_time(), 62_500);
    }

    #[test]
    fn test_init_then_idle_timeout() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.now = Instant::from_millis(1_000);
        profile.link_policy_init();
        assert_eq!(profile.link_policy_mode(), PeerLinkPolicyMode::EscoActive);
        assert_eq!(
            profile.timers.deadline(TimerId::PeerLinkPolicyIdleTimeout),
            Some(Instant::from_millis(6_000))
        );

        profile.handle_link_policy_idle_timeout();
        assert_eq!(profile.link_policy_mode(), PeerLinkPolicyMode::Idle);
        assert_eq!(
            drain(&mut profile).as_slice(),
            &[subrate(50, 0), subrate(300, 300)]
        );
    }

    #[test]
    fn test_set_idle_goes_through_esco_preset() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.link_policy = PeerLinkPolicyMode::A2dpActive;

        profile.link_policy_set_idle();
        assert_eq!(profile.link_policy_mode(), PeerLinkPolicyMode::EscoActive);
        assert!(profile.timers.is_pending(TimerId::PeerLinkPolicyIdleTimeout));
        assert_eq!(drain(&mut profile).as_slice(), &[subrate(50, 0)]);

        // Mirroring restarting cancels the pending drop to idle
        profile.link_policy_set_a2dp_active();
        assert!(!profile.timers.is_pending(TimerId::PeerLinkPolicyIdleTimeout));
        assert_eq!(drain(&mut profile).as_slice(), &[subrate(100, 0)]);
    }

    #[test]
    fn test_no_change_without_channel() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.channel.state = AudioSyncL2capState::None;

        profile.link_policy_set_esco_active();
        profile.link_policy_set_idle();
        profile.handle_link_policy_idle_timeout();
        assert_eq!(profile.link_policy_mode(), PeerLinkPolicyMode::Idle);
        assert!(drain(&mut profile).is_empty());
    }
}
