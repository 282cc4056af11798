//! Peer Signalling Messages
//!
//! The Primary keeps the Secondary's copy of the handset audio context in step
//! over peer signalling: HFP volume and codec, A2DP volume, and the A2DP stream
//! context the Secondary needs to start the mirrored media chain.
//!
//! Messages are encoded as a type byte followed by the fields in little-endian
//! order.

use super::MirrorProfile;
use crate::action::{Action, AudioRequest, ProtocolViolation};
use crate::audio_sync::AudioSyncState;
use crate::constants::{AVDTP_CP_TYPE_SCMS, STREAM_CONTEXT_RATE_MULTIPLIER};
use crate::event::HfpCodecMode;
use heapless::Vec;

/// Largest encoded message
pub const MAX_MESSAGE_SIZE: usize = 16;

const TYPE_HFP_VOLUME: u8 = 0x00;
const TYPE_HFP_CODEC_AND_VOLUME: u8 = 0x01;
const TYPE_A2DP_VOLUME: u8 = 0x02;
const TYPE_STREAM_CONTEXT: u8 = 0x03;

const STREAM_CONTEXT_SIZE: usize = 12;

/// Message decoding errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignallingError {
    /// Message is shorter than its type requires
    InsufficientData,
    /// Unknown message type
    UnknownType(u8),
    /// A field holds a value outside its range
    InvalidValue,
}

impl core::fmt::Display for SignallingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "Insufficient data for mirror message"),
            Self::UnknownType(t) => write!(f, "Unknown mirror message type 0x{t:02x}"),
            Self::InvalidValue => write!(f, "Mirror message field out of range"),
        }
    }
}

/// A2DP stream context sent from the Primary to the Secondary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamContext {
    /// L2CAP channel of the media stream
    pub cid: u16,
    /// Media packet size
    pub mtu: u16,
    /// Stream endpoint
    pub seid: u8,
    /// Sample rate in units of 25 Hz
    pub sample_rate: u16,
    /// AVDTP content protection type, 0 for none
    pub content_protection_type: u16,
    /// Media volume
    pub volume: u8,
    /// Audio sync state of the Primary's A2DP source
    pub audio_state: AudioSyncState,
    /// Q2Q mode
    pub q2q_mode: bool,
}

/// Messages exchanged between the mirror profiles of the two earbuds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MirrorMessage {
    /// HFP volume changed
    HfpVolume {
        /// New volume
        volume: u8,
    },
    /// eSCO mirroring is starting with this codec and volume
    HfpCodecAndVolume {
        /// Negotiated codec
        codec_mode: HfpCodecMode,
        /// Voice volume
        volume: u8,
    },
    /// A2DP volume changed
    A2dpVolume {
        /// New volume
        volume: u8,
    },
    /// A2DP stream context
    StreamContext(StreamContext),
}

const fn codec_to_u8(codec_mode: HfpCodecMode) -> u8 {
    match codec_mode {
        HfpCodecMode::None => 0,
        HfpCodecMode::Narrowband => 1,
        HfpCodecMode::Wideband => 2,
        HfpCodecMode::SuperWideband => 3,
    }
}

const fn codec_from_u8(value: u8) -> Result<HfpCodecMode, SignallingError> {
    match value {
        0 => Ok(HfpCodecMode::None),
        1 => Ok(HfpCodecMode::Narrowband),
        2 => Ok(HfpCodecMode::Wideband),
        3 => Ok(HfpCodecMode::SuperWideband),
        _ => Err(SignallingError::InvalidValue),
    }
}

const fn state_to_u8(state: AudioSyncState) -> u8 {
    match state {
        AudioSyncState::Disconnected => 0,
        AudioSyncState::Connected => 1,
        AudioSyncState::Active => 2,
    }
}

const fn state_from_u8(value: u8) -> Result<AudioSyncState, SignallingError> {
    match value {
        0 => Ok(AudioSyncState::Disconnected),
        1 => Ok(AudioSyncState::Connected),
        2 => Ok(AudioSyncState::Active),
        _ => Err(SignallingError::InvalidValue),
    }
}

impl MirrorMessage {
    /// Encode the message
    ///
    /// # Errors
    ///
    /// Never fails for the messages defined here; the `Result` covers the
    /// fixed buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8, MAX_MESSAGE_SIZE>, SignallingError> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let len = match *self {
            MirrorMessage::HfpVolume { volume } => {
                buf[..2].copy_from_slice(&[TYPE_HFP_VOLUME, volume]);
                2
            }
            MirrorMessage::HfpCodecAndVolume { codec_mode, volume } => {
                buf[..3].copy_from_slice(&[
                    TYPE_HFP_CODEC_AND_VOLUME,
                    codec_to_u8(codec_mode),
                    volume,
                ]);
                3
            }
            MirrorMessage::A2dpVolume { volume } => {
                buf[..2].copy_from_slice(&[TYPE_A2DP_VOLUME, volume]);
                2
            }
            MirrorMessage::StreamContext(context) => {
                buf[0] = TYPE_STREAM_CONTEXT;
                buf[1..3].copy_from_slice(&context.cid.to_le_bytes());
                buf[3..5].copy_from_slice(&context.mtu.to_le_bytes());
                buf[5] = context.seid;
                buf[6..8].copy_from_slice(&context.sample_rate.to_le_bytes());
                buf[8..10].copy_from_slice(&context.content_protection_type.to_le_bytes());
                buf[10] = context.volume;
                buf[11] = state_to_u8(context.audio_state);
                buf[12] = u8::from(context.q2q_mode);
                1 + STREAM_CONTEXT_SIZE
            }
        };
        Vec::from_slice(&buf[..len]).map_err(|()| SignallingError::InsufficientData)
    }

    /// Decode a message received from the peer
    ///
    /// # Errors
    ///
    /// Returns a [`SignallingError`] for short, unknown or malformed messages.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignallingError> {
        let (&message_type, body) = bytes.split_first().ok_or(SignallingError::InsufficientData)?;
        match message_type {
            TYPE_HFP_VOLUME => {
                let &[volume, ..] = body else {
                    return Err(SignallingError::InsufficientData);
                };
                Ok(MirrorMessage::HfpVolume { volume })
            }
            TYPE_HFP_CODEC_AND_VOLUME => {
                let &[codec, volume, ..] = body else {
                    return Err(SignallingError::InsufficientData);
                };
                Ok(MirrorMessage::HfpCodecAndVolume {
                    codec_mode: codec_from_u8(codec)?,
                    volume,
                })
            }
            TYPE_A2DP_VOLUME => {
                let &[volume, ..] = body else {
                    return Err(SignallingError::InsufficientData);
                };
                Ok(MirrorMessage::A2dpVolume { volume })
            }
            TYPE_STREAM_CONTEXT => {
                if body.len() < STREAM_CONTEXT_SIZE {
                    return Err(SignallingError::InsufficientData);
                }
                Ok(MirrorMessage::StreamContext(StreamContext {
                    cid: u16::from_le_bytes([body[0], body[1]]),
                    mtu: u16::from_le_bytes([body[2], body[3]]),
                    seid: body[4],
                    sample_rate: u16::from_le_bytes([body[5], body[6]]),
                    content_protection_type: u16::from_le_bytes([body[7], body[8]]),
                    volume: body[9],
                    audio_state: state_from_u8(body[10])?,
                    q2q_mode: body[11] != 0,
                }))
            }
            other => Err(SignallingError::UnknownType(other)),
        }
    }
}

impl MirrorProfile {
    /// Send the HFP volume to the Secondary
    pub(crate) fn send_hfp_volume_to_secondary(&mut self, volume: u8) {
        self.push(Action::PeerSignal(MirrorMessage::HfpVolume { volume }));
    }

    /// Send the HFP codec and volume to the Secondary
    pub(crate) fn send_hfp_codec_and_volume_to_secondary(
        &mut self,
        codec_mode: HfpCodecMode,
        volume: u8,
    ) {
        self.push(Action::PeerSignal(MirrorMessage::HfpCodecAndVolume {
            codec_mode,
            volume,
        }));
    }

    /// Send the A2DP volume to the Secondary
    pub(crate) fn send_a2dp_volume_to_secondary(&mut self, volume: u8) {
        self.push(Action::PeerSignal(MirrorMessage::A2dpVolume { volume }));
    }

    /// Send the A2DP stream context to the Secondary, if peer signalling is up
    pub(crate) fn send_a2dp_stream_context_to_secondary(&mut self) {
        if !self.peer_sig_connected {
            return;
        }
        let a2dp = &self.a2dp;
        let context = StreamContext {
            cid: a2dp.cid,
            mtu: a2dp.mtu,
            seid: a2dp.seid,
            sample_rate: u16::try_from(a2dp.sample_rate / STREAM_CONTEXT_RATE_MULTIPLIER)
                .unwrap_or(u16::MAX),
            content_protection_type: if a2dp.content_protection {
                AVDTP_CP_TYPE_SCMS
            } else {
                0
            },
            volume: a2dp.volume,
            audio_state: a2dp.state,
            q2q_mode: a2dp.q2q_mode,
        };
        debug!("[MIRROR] send stream context, state {:?}", context.audio_state);
        self.push(Action::PeerSignal(MirrorMessage::StreamContext(context)));
    }

    /// Handle a message from the peer's mirror profile
    pub(crate) fn handle_peer_message(
        &mut self,
        message: MirrorMessage,
    ) -> Result<(), ProtocolViolation> {
        debug!("[MIRROR] peer message {:?}", message);
        match message {
            MirrorMessage::HfpVolume { volume } => self.set_sco_volume(volume)?,
            MirrorMessage::HfpCodecAndVolume { codec_mode, volume } => {
                debug!("[MIRROR] sco codec {:?}", codec_mode);
                self.esco.codec_mode = codec_mode;
                self.set_sco_volume(volume)?;
                if self.state.is_esco_connected() && self.esco.codec_mode != HfpCodecMode::None {
                    self.start_sco_audio();
                }
            }
            MirrorMessage::A2dpVolume { volume } => self.update_a2dp_volume_from_peer(volume),
            MirrorMessage::StreamContext(context) => self.handle_stream_context(context),
        }
        Ok(())
    }

    fn update_a2dp_volume_from_peer(&mut self, volume: u8) {
        if self.a2dp.volume != volume {
            self.a2dp.volume = volume;
            self.push(Action::Audio(AudioRequest::SetA2dpVolume(volume)));
        }
    }

    fn handle_stream_context(&mut self, context: StreamContext) {
        debug!(
            "[MIRROR] stream context, state {:?} -> {:?}, q2q {}",
            self.a2dp.state,
            context.audio_state,
            context.q2q_mode
        );
        self.a2dp.cid = context.cid;
        self.a2dp.mtu = context.mtu;
        self.a2dp.seid = context.seid;
        self.a2dp.sample_rate = u32::from(context.sample_rate) * STREAM_CONTEXT_RATE_MULTIPLIER;
        self.a2dp.content_protection = context.content_protection_type != 0;
        self.a2dp.state = context.audio_state;
        self.a2dp.q2q_mode = context.q2q_mode;
        self.update_a2dp_volume_from_peer(context.volume);

        if matches!(
            self.a2dp.state,
            AudioSyncState::Connected | AudioSyncState::Active
        ) {
            // Context from the peer usually means audio is about to start
            self.push(Action::Audio(AudioRequest::ProspectiveDspPowerOn));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MirrorProfileOptions;
    use crate::mirror::tests::drain;

    fn context() -> StreamContext {
        StreamContext {
            cid: 0x0041,
            mtu: 895,
            seid: 1,
            sample_rate: 1764,
            content_protection_type: AVDTP_CP_TYPE_SCMS,
            volume: 80,
            audio_state: AudioSyncState::Connected,
            q2q_mode: false,
        }
    }

    #[test]
    fn test_stream_context_encoding() {
        let bytes = MirrorMessage::StreamContext(context()).to_bytes().unwrap();
        assert_eq!(
            bytes.as_slice(),
            &[0x03, 0x41, 0x00, 0x7F, 0x03, 0x01, 0xE4, 0x06, 0x02, 0x00, 80, 1, 0]
        );
        assert_eq!(
            MirrorMessage::from_bytes(&bytes),
            Ok(MirrorMessage::StreamContext(context()))
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            MirrorMessage::from_bytes(&[]),
            Err(SignallingError::InsufficientData)
        );
        assert_eq!(
            MirrorMessage::from_bytes(&[0x01, 0x07, 10]),
            Err(SignallingError::InvalidValue)
        );
        assert_eq!(
            MirrorMessage::from_bytes(&[0x03, 0x41, 0x00]),
            Err(SignallingError::InsufficientData)
        );
        assert_eq!(
            MirrorMessage::from_bytes(&[0x09]),
            Err(SignallingError::UnknownType(0x09))
        );
    }

    #[test]
    fn test_primary_sends_context_only_with_peer_signalling() {
        let mut profile = MirrorProfile::new(MirrorProfileOptions::default());
        profile.a2dp.sample_rate = 44_100;
        profile.a2dp.content_protection = true;

        profile.send_a2dp_stream_context_to_secondary();
        assert!(drain(&mut profile).is_empty());

        profile.peer_sig_connected = true;
        profile.send_a2dp_stream_context_to_secondary();
        let actions = drain(&mut profile);
        let Some(Action::PeerSignal(MirrorMessage::StreamContext(sent))) = actions.first() else {
            panic!("expected stream context, got {actions:?}");
        };
        assert_eq!(sent.sample_rate, 1764);
        assert_eq!(sent.content_protection_type, 0x0002);
    }

    #[test]
    fn test_secondary_applies_stream_context() {
        let mut profile = MirrorProfile::new(MirrorProfileOptions::default());
        profile
            .handle_peer_message(MirrorMessage::StreamContext(context()))
            .unwrap();

        assert_eq!(profile.a2dp.sample_rate, 44_100);
        assert!(profile.a2dp.content_protection);
        assert_eq!(profile.a2dp.state, AudioSyncState::Connected);
        assert_eq!(
            drain(&mut profile).as_slice(),
            &[
                Action::Audio(AudioRequest::SetA2dpVolume(80)),
                Action::Audio(AudioRequest::ProspectiveDspPowerOn),
            ]
        );

        // Same volume again is not re-applied
        profile
            .handle_peer_message(MirrorMessage::A2dpVolume { volume: 80 })
            .unwrap();
        assert!(drain(&mut profile).is_empty());
    }

    #[test]
    fn test_secondary_sco_volume() {
        let mut profile = MirrorProfile::new(MirrorProfileOptions::default());
        profile
            .handle_peer_message(MirrorMessage::HfpVolume { volume: 12 })
            .unwrap();
        assert_eq!(profile.esco.volume, 12);
        assert_eq!(
            drain(&mut profile).as_slice(),
            &[Action::Audio(AudioRequest::SetVoiceVolume(12))]
        );

        // Codec without a connected eSCO only stores it
        profile
            .handle_peer_message(MirrorMessage::HfpCodecAndVolume {
                codec_mode: HfpCodecMode::Wideband,
                volume: 12,
            })
            .unwrap();
        assert_eq!(profile.esco.codec_mode, HfpCodecMode::Wideband);
        assert!(drain(&mut profile).is_empty());
    }
}
