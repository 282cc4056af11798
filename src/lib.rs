#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(dead_code, clippy::unused_async, clippy::too_many_lines)]

#[macro_use]
mod fmt;

mod address;
pub mod action;
pub mod api;
pub mod audio_sync;
pub mod constants;
pub mod event;
pub mod l2cap;
pub mod mirror;
pub mod peer;
pub mod processor;
pub mod sdp;
pub mod service;
pub mod timer;

use crate::constants::{
    DEFAULT_IDLE_PEER_ENTER_SNIFF_TIMEOUT_MS, DEFAULT_KICK_BACKOFF_MS,
    DEFAULT_LINK_POLICY_IDLE_TIMEOUT_MS, DEFAULT_MAX_SYNC_DELAY_MS, DEFAULT_QHS_START_TIMEOUT_MS,
    DEFAULT_SDP_SEARCH_ATTEMPTS, MAX_CHANNELS, SNIFF_ATTEMPT, SNIFF_INTERVAL_SLOTS, SNIFF_TIMEOUT,
};
use embassy_sync::channel::Channel;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    mutex::{MappedMutexGuard, Mutex, MutexGuard},
};
use embassy_time::Duration;

pub use address::BluetoothAddress;
pub use mirror::{A2dpStartMode, MirrorProfile, MirrorState};

pub(crate) static EVENT_CHANNEL: Channel<CriticalSectionRawMutex, event::Event, MAX_CHANNELS> =
    Channel::new();

pub(crate) static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, Request, MAX_CHANNELS> =
    Channel::new();

pub(crate) static RESPONSE_CHANNEL: Channel<CriticalSectionRawMutex, Response, MAX_CHANNELS> =
    Channel::new();

/// Global `MirrorProfile`, initialized by client at runtime
pub(crate) static MIRROR_PROFILE: Mutex<CriticalSectionRawMutex, Option<MirrorProfile>> =
    Mutex::new(None);

/// Initialize the global `MirrorProfile` with the given options.
///
/// This function must be called before using any API functions. [`processor::run`]
/// calls it for you.
///
/// # Errors
///
/// Returns `Err("MirrorProfile already initialized")` if called twice.
///
/// # Example
///
/// ```rust,no_run
/// use mirrorbird::{init_mirror_profile, MirrorProfileOptions};
///
/// # async fn example() -> Result<(), &'static str> {
/// init_mirror_profile(MirrorProfileOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn init_mirror_profile(options: MirrorProfileOptions) -> Result<(), &'static str> {
    let mut guard = MIRROR_PROFILE.lock().await;
    if guard.is_some() {
        return Err("MirrorProfile already initialized");
    }
    *guard = Some(MirrorProfile::new(options));
    Ok(())
}

/// Get a locked reference to the global `MirrorProfile`.
///
/// # Errors
///
/// Returns `Err("MirrorProfile not initialized")` before [`init_mirror_profile`].
///
/// # Note
///
/// This function is primarily intended for the processor task.
/// API users should use the functions in the `api` module instead.
pub async fn mirror_profile<'a>()
-> Result<MappedMutexGuard<'a, CriticalSectionRawMutex, MirrorProfile>, &'static str> {
    let guard = MIRROR_PROFILE.lock().await;
    if guard.is_none() {
        return Err("MirrorProfile not initialized");
    }
    // Checked above, the default is never constructed
    Ok(MutexGuard::map(guard, |profile| {
        profile.get_or_insert_with(|| MirrorProfile::new(MirrorProfileOptions::default()))
    }))
}

/// Role of the local earbud in the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Owns the handset connection and drives the mirror links
    Primary,
    /// Follows the Primary
    #[default]
    Secondary,
}

impl Role {
    /// Role from the "is primary" flag used by handover
    #[must_use]
    pub const fn from_is_primary(is_primary: bool) -> Self {
        if is_primary {
            Role::Primary
        } else {
            Role::Secondary
        }
    }

    /// Check for the Primary role
    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(self, Role::Primary)
    }
}

/// Identifies a task that receives confirmations or notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClientId(pub u8);

/// HCI status or reason code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HciStatus(pub u8);

impl HciStatus {
    /// Success
    pub const SUCCESS: Self = Self(0x00);
    /// Connection Timeout
    pub const CONNECTION_TIMEOUT: Self = Self(0x08);
    /// Remote User Terminated Connection
    pub const REMOTE_USER_TERMINATED: Self = Self(0x13);
    /// Connection Terminated By Local Host
    pub const TERMINATED_BY_LOCAL_HOST: Self = Self(0x16);
    /// Unspecified Error
    pub const UNSPECIFIED: Self = Self(0x1F);
    /// LMP Response Timeout
    pub const LMP_RESPONSE_TIMEOUT: Self = Self(0x22);

    /// Check for success
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Check whether a disconnect confirmation with this status means the link is gone
    ///
    /// Any other status usually means the link was already down and a
    /// disconnect indication is on its way.
    #[must_use]
    pub const fn is_link_terminated(self) -> bool {
        matches!(self.0, 0x16 | 0x13 | 0x22 | 0x1F | 0x08)
    }
}

/// Errors returned to callers of the mirror profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MirrorError {
    /// Operation only valid on the Primary
    NotPrimary,
    /// Operation not valid in the current state
    InvalidState,
    /// A bounded queue or table is full
    QueueFull,
    /// No peer address is known or an all-zero address was given
    NoPeerAddress,
    /// The mirror profile has not been initialized
    NotInitialized,
    /// Invalid parameter provided (e.g., malformed address)
    InvalidParameter,
}

/// Options for configuring a `MirrorProfile` instance
///
/// Every timing value here was tuned for one radio platform; adjust them for
/// yours.
///
/// # Examples
///
/// ```rust
/// use mirrorbird::MirrorProfileOptions;
/// use embassy_time::Duration;
///
/// let options = MirrorProfileOptions {
///     qhs_start_timeout: Duration::from_millis(800),
///     enable_a2dp_mirroring: false,
///     ..MirrorProfileOptions::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MirrorProfileOptions {
    /// How long to wait for the QHS link after the audio sync channel connects
    /// before mirroring starts without it
    pub qhs_start_timeout: Duration,
    /// Number of SDP searches for the peer's mirror service before giving up
    pub sdp_search_attempts: u8,
    /// Delay before the peer link moves to the idle subrate preset
    pub link_policy_idle_timeout: Duration,
    /// Delay after the peer link connects before it is put into sniff mode
    pub idle_peer_enter_sniff_timeout: Duration,
    /// Backoff before retrying after a failed mirror link
    pub kick_backoff: Duration,
    /// Longest an audio sync source waits for a sink response
    pub max_sync_delay: Duration,
    /// Mirror eSCO voice links
    pub enable_esco_mirroring: bool,
    /// Mirror A2DP media links
    pub enable_a2dp_mirroring: bool,
    /// Peer link sniff interval in baseband slots
    pub sniff_interval_slots: u16,
    /// Peer link sniff attempt in baseband slots
    pub sniff_attempt: u16,
    /// Peer link sniff timeout in baseband slots
    pub sniff_timeout: u16,
}

impl Default for MirrorProfileOptions {
    fn default() -> Self {
        Self {
            qhs_start_timeout: Duration::from_millis(DEFAULT_QHS_START_TIMEOUT_MS),
            sdp_search_attempts: DEFAULT_SDP_SEARCH_ATTEMPTS,
            link_policy_idle_timeout: Duration::from_millis(DEFAULT_LINK_POLICY_IDLE_TIMEOUT_MS),
            idle_peer_enter_sniff_timeout: Duration::from_millis(
                DEFAULT_IDLE_PEER_ENTER_SNIFF_TIMEOUT_MS,
            ),
            kick_backoff: Duration::from_millis(DEFAULT_KICK_BACKOFF_MS),
            max_sync_delay: Duration::from_millis(DEFAULT_MAX_SYNC_DELAY_MS),
            enable_esco_mirroring: true,
            enable_a2dp_mirroring: true,
            sniff_interval_slots: SNIFF_INTERVAL_SLOTS,
            sniff_attempt: SNIFF_ATTEMPT,
            sniff_timeout: SNIFF_TIMEOUT,
        }
    }
}

/// API requests sent to the processor task
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Request {
    /// Become Primary and connect the audio sync channel to the peer
    Connect(BluetoothAddress),
    /// Close the audio sync channel
    Disconnect,
    /// Apply a new role
    SetRole(Role),
    /// Enable or disable eSCO mirroring
    SetEscoMirroring(bool),
    /// Enable or disable A2DP mirroring
    SetA2dpMirroring(bool),
    /// The local HFP audio connected; decide who starts call audio
    HfpAudioConnectConfirmation,
    /// Get the mirror connection state
    GetState,
    /// Get the A2DP start mode
    GetA2dpStartMode,
    /// Check whether a mirror link is up
    IsConnected,
    /// Get the expected peer link transmission time
    GetExpectedTransmissionTime,
}

/// API responses sent back from the processor task
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Response {
    /// Request accepted
    Ok,
    /// Mirror connection state
    State(MirrorState),
    /// A2DP start mode
    A2dpStartMode(A2dpStartMode),
    /// Whether a mirror link is up
    Connected(bool),
    /// Expected peer link transmission time in microseconds
    TransmissionTime(u32),
    /// Error occurred
    Error(MirrorError),
}
