//! `MirrorBird` Constants
//!
//! This module contains the constants used throughout the `MirrorBird` library.
//! Timing values listed here are only the defaults of [`crate::MirrorProfileOptions`];
//! the state machines read the configured values.

/// Invalid connection handle, used while a mirror link is not connected
pub const CONNECTION_HANDLE_INVALID: u16 = 0xFFFF;

/// Invalid L2CAP channel identifier
pub const CHANNEL_ID_INVALID: u16 = 0x0000;

/// Default backoff before re-kicking the mirror state machine after a failure (ms)
pub const DEFAULT_KICK_BACKOFF_MS: u64 = 1_000;

/// Default time to wait for the QHS link after the audio sync channel connects (ms)
pub const DEFAULT_QHS_START_TIMEOUT_MS: u64 = 500;

/// Default number of SDP search attempts for the mirror service
pub const DEFAULT_SDP_SEARCH_ATTEMPTS: u8 = 3;

/// Default delay before applying the idle subrate preset (ms)
pub const DEFAULT_LINK_POLICY_IDLE_TIMEOUT_MS: u64 = 5_000;

/// Default delay before an idle peer link is put into sniff mode (ms)
pub const DEFAULT_IDLE_PEER_ENTER_SNIFF_TIMEOUT_MS: u64 = 10_000;

/// Default maximum time an audio sync source waits for a sink response (ms)
pub const DEFAULT_MAX_SYNC_DELAY_MS: u64 = 500;

/// Peer link sniff interval in baseband slots
pub const SNIFF_INTERVAL_SLOTS: u16 = 50;

/// Peer link sniff attempt in baseband slots
pub const SNIFF_ATTEMPT: u16 = 2;

/// Peer link sniff timeout in baseband slots
pub const SNIFF_TIMEOUT: u16 = 2;

/// Duration of one baseband slot in microseconds
pub const SLOT_DURATION_US: u32 = 625;

/// Number of sniff instances accounted for in the expected transmission time
pub const NUM_SNIFF_INSTANCES: u32 = 2;

/// Sample rates in the stream context are sent in units of this many Hz
pub const STREAM_CONTEXT_RATE_MULTIPLIER: u32 = 25;

/// AVDTP content protection type for SCMS-T
pub const AVDTP_CP_TYPE_SCMS: u16 = 0x0002;

/// Voice links with `tesco` at or below this value cannot be mirrored (SCO, HV3)
pub const UNMIRRORABLE_TESCO_MAX: u8 = 6;

/// Logical peer signalling channel used by the mirror profile
pub const PEER_SIG_MSG_CHANNEL_MIRROR_PROFILE: u8 = 0x03;

/// Maximum number of actions produced while handling a single event
pub const MAX_ACTIONS: usize = 32;

/// Maximum number of registered mirror profile clients
pub const MAX_CLIENTS: usize = 4;

/// Maximum number of audio sync messages parked behind the transition lock
pub const MAX_DEFERRED_SYNC_MESSAGES: usize = 4;

/// Maximum number of outstanding audio sync responses per source
pub const MAX_PENDING_SYNC_RESPONSES: usize = 4;

/// Maximum number of audio sync sinks registered with one source
pub const MAX_SYNC_SINKS: usize = 2;

/// Size of the buffer carrying SDP service search attribute results
pub const SDP_ATTRIBUTE_BUFFER_SIZE: usize = 64;

/// Depth of the event, request and response channels
pub const MAX_CHANNELS: usize = 8;

/// Audio sync L2CAP channel MTU
pub const AUDIO_SYNC_L2CAP_MTU: u16 = 672;

/// Minimum MTU accepted from the peer on the audio sync L2CAP channel
pub const AUDIO_SYNC_L2CAP_MIN_REMOTE_MTU: u16 = 48;

/// Maximum number of audio sources whose stream parameters are remembered
pub const MAX_AUDIO_SOURCES: usize = 2;

/// Sink id the mirror profile registers with audio sync sources
pub const MIRROR_PROFILE_SYNC_SINK_ID: u8 = 0x4D;
