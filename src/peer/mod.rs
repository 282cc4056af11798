//! Peer Link Power Management
//!
//! The link between the two earbuds moves between active and sniff mode
//! depending on what the mirror state machine is about to do, and a subrating
//! policy on top trades latency for power depending on what is mirrored.

pub mod link_policy;
pub mod mode;

/// Power mode of the peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerLinkMode {
    /// Link is active
    #[default]
    Active,
    /// Sniff mode requested, waiting for the mode change
    EnteringSniff,
    /// Link is in sniff mode
    Sniff,
    /// Active mode requested, waiting for the mode change
    ExitingSniff,
}

impl PeerLinkMode {
    /// Check whether this is a steady mode (Active or Sniff)
    #[must_use]
    pub const fn is_steady(self) -> bool {
        matches!(self, PeerLinkMode::Active | PeerLinkMode::Sniff)
    }
}

/// Peer link subrating preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerLinkPolicyMode {
    /// Nothing mirrored; lowest duty cycle
    #[default]
    Idle,
    /// A2DP mirrored
    A2dpActive,
    /// eSCO mirrored; no subrating
    EscoActive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_link_mode_steady() {
        assert!(PeerLinkMode::Active.is_steady());
        assert!(PeerLinkMode::Sniff.is_steady());
        assert!(!PeerLinkMode::EnteringSniff.is_steady());
        assert!(!PeerLinkMode::ExitingSniff.is_steady());
    }
}
