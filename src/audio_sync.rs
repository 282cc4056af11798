//! Audio Sync Protocol
//!
//! Request/response contract between an audio *source* (an A2DP or voice
//! instance talking to the handset) and the *sinks* that mirror its state
//! onto the second earbud.
//!
//! The source sends indications to a sink:
//!
//! * **Connect** and **Activate** expect exactly one response. If no sink is
//!   registered the response is produced immediately. Otherwise the sink gets
//!   the indication and a fallback response is scheduled `max_sync_delay`
//!   later. Whichever of the two arrives first is delivered, the other is
//!   dropped.
//! * **State** and **CodecReconfigured** are fire-and-forget.
//!
//! [`AudioSyncSource`] tracks the outstanding responses for one source.
//! Sinks implement [`AudioSyncSink`].

use crate::MirrorError;
use crate::constants::{MAX_PENDING_SYNC_RESPONSES, MAX_SYNC_SINKS};
use embassy_time::{Duration, Instant};
use heapless::{Deque, Vec};

/// Identifies one indication/response exchange
pub type SyncId = u16;

/// Identifies an audio source (e.g. the first A2DP source)
pub type AudioSourceId = u8;

/// AVDTP stream endpoint identifier
pub type StreamEndpointId = u8;

/// Identifies a registered sink
pub type SinkId = u8;

/// State of an audio source as seen by its sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioSyncState {
    /// No stream
    #[default]
    Disconnected,
    /// Codec negotiated, not streaming
    Connected,
    /// Streaming
    Active,
}

/// Payload of connect and activate indications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncIndication {
    /// Source whose state is being mirrored
    pub source_id: AudioSourceId,
    /// Stream endpoint of the source
    pub seid: StreamEndpointId,
    /// Exchange identifier, echoed in the response
    pub sync_id: SyncId,
}

/// Payload of the plain state indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateIndication {
    /// Source whose state changed
    pub source_id: AudioSourceId,
    /// New state
    pub state: AudioSyncState,
    /// Stream endpoint of the source
    pub seid: StreamEndpointId,
}

/// Payload of the codec reconfigured indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CodecReconfiguredIndication {
    /// Source whose codec changed
    pub source_id: AudioSourceId,
    /// Stream endpoint of the source
    pub seid: StreamEndpointId,
    /// AVDTP device identifier
    pub device_id: u8,
    /// AVDTP stream identifier
    pub stream_id: u8,
}

/// Messages a source sends to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioSyncMessage {
    /// Reach the Connected state, then respond
    ConnectInd(SyncIndication),
    /// Reach the Active state, then respond
    ActivateInd(SyncIndication),
    /// The source state changed
    StateInd(StateIndication),
    /// The source codec parameters changed
    CodecReconfiguredInd(CodecReconfiguredIndication),
}

/// Discriminant of [`AudioSyncMessage`], used to cancel queued messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioSyncMessageKind {
    /// [`AudioSyncMessage::ConnectInd`]
    ConnectInd,
    /// [`AudioSyncMessage::ActivateInd`]
    ActivateInd,
    /// [`AudioSyncMessage::StateInd`]
    StateInd,
    /// [`AudioSyncMessage::CodecReconfiguredInd`]
    CodecReconfiguredInd,
}

impl AudioSyncMessage {
    /// The kind of this message
    #[must_use]
    pub const fn kind(&self) -> AudioSyncMessageKind {
        match self {
            AudioSyncMessage::ConnectInd(_) => AudioSyncMessageKind::ConnectInd,
            AudioSyncMessage::ActivateInd(_) => AudioSyncMessageKind::ActivateInd,
            AudioSyncMessage::StateInd(_) => AudioSyncMessageKind::StateInd,
            AudioSyncMessage::CodecReconfiguredInd(_) => {
                AudioSyncMessageKind::CodecReconfiguredInd
            }
        }
    }
}

/// Which request a response answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioSyncResponseKind {
    /// Answers [`AudioSyncMessage::ConnectInd`]
    Connect,
    /// Answers [`AudioSyncMessage::ActivateInd`]
    Activate,
}

/// Response to a connect or activate indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AudioSyncResponse {
    /// Request being answered
    pub kind: AudioSyncResponseKind,
    /// Exchange identifier from the indication
    pub sync_id: SyncId,
}

/// A sink able to mirror the state of an audio source
pub trait AudioSyncSink {
    /// Identity of this sink, used to detect re-registration
    fn sink_id(&self) -> SinkId;

    /// Deliver a sync message to the sink
    fn send_sync_message(&mut self, message: AudioSyncMessage);

    /// Drop not-yet-delivered messages of `kind`. Returns how many were dropped.
    fn cancel_sync_messages(&mut self, kind: AudioSyncMessageKind) -> usize;
}

/// Cancel all queued messages to `sink` except state indications
///
/// A queued state indication may carry a disconnect that the sink must see,
/// so it is kept.
pub fn cancel_queued_messages(sink: &mut dyn AudioSyncSink) {
    let mut cancelled = 0;
    for kind in [
        AudioSyncMessageKind::ConnectInd,
        AudioSyncMessageKind::ActivateInd,
        AudioSyncMessageKind::CodecReconfiguredInd,
    ] {
        cancelled += sink.cancel_sync_messages(kind);
    }
    debug!(
        "[AUDIO_SYNC] cancelled {} queued messages for sink {}",
        cancelled,
        sink.sink_id()
    );
}

#[derive(Debug, Clone, Copy)]
struct PendingResponse {
    response: AudioSyncResponse,
    deadline: Instant,
}

/// Source side of the audio sync protocol
///
/// Holds the responses that are still owed to the source's own state machine
/// and the set of registered sinks.
#[derive(Debug)]
pub struct AudioSyncSource {
    source_id: AudioSourceId,
    seid: StreamEndpointId,
    state: AudioSyncState,
    max_sync_delay: Duration,
    sinks: Vec<SinkId, MAX_SYNC_SINKS>,
    pending: Vec<PendingResponse, MAX_PENDING_SYNC_RESPONSES>,
    ready: Deque<AudioSyncResponse, MAX_PENDING_SYNC_RESPONSES>,
}

impl AudioSyncSource {
    /// Create the source side for `source_id`
    #[must_use]
    pub fn new(source_id: AudioSourceId, max_sync_delay: Duration) -> Self {
        Self {
            source_id,
            seid: 0,
            state: AudioSyncState::Disconnected,
            max_sync_delay,
            sinks: Vec::new(),
            pending: Vec::new(),
            ready: Deque::new(),
        }
    }

    /// Current state of the source
    #[must_use]
    pub fn state(&self) -> AudioSyncState {
        self.state
    }

    /// Check whether a sink is registered
    #[must_use]
    pub fn is_registered(&self, sink_id: SinkId) -> bool {
        self.sinks.contains(&sink_id)
    }

    /// Register a sink and send it the current state
    ///
    /// Registering an already registered sink does not add it twice; it still
    /// receives the current state exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::QueueFull`] if the sink table is full.
    pub fn register_sink(&mut self, sink: &mut dyn AudioSyncSink) -> Result<(), MirrorError> {
        let sink_id = sink.sink_id();
        if !self.sinks.contains(&sink_id) {
            self.sinks
                .push(sink_id)
                .map_err(|_| MirrorError::QueueFull)?;
        }
        sink.send_sync_message(AudioSyncMessage::StateInd(StateIndication {
            source_id: self.source_id,
            state: self.state,
            seid: self.seid,
        }));
        Ok(())
    }

    /// Unregister a sink. Returns whether it was registered.
    pub fn unregister_sink(&mut self, sink_id: SinkId) -> bool {
        match self.sinks.iter().position(|&id| id == sink_id) {
            Some(index) => {
                self.sinks.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Ask `sink` to reach the Connected state
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::QueueFull`] if too many responses are outstanding.
    pub fn connect_indication(
        &mut self,
        sink: Option<&mut dyn AudioSyncSink>,
        seid: StreamEndpointId,
        sync_id: SyncId,
        now: Instant,
    ) -> Result<(), MirrorError> {
        self.seid = seid;
        let indication = SyncIndication {
            source_id: self.source_id,
            seid,
            sync_id,
        };
        self.request(
            sink,
            AudioSyncMessage::ConnectInd(indication),
            AudioSyncResponseKind::Connect,
            sync_id,
            now,
        )
    }

    /// Ask `sink` to reach the Active state
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::QueueFull`] if too many responses are outstanding.
    pub fn activate_indication(
        &mut self,
        sink: Option<&mut dyn AudioSyncSink>,
        seid: StreamEndpointId,
        sync_id: SyncId,
        now: Instant,
    ) -> Result<(), MirrorError> {
        self.seid = seid;
        let indication = SyncIndication {
            source_id: self.source_id,
            seid,
            sync_id,
        };
        self.request(
            sink,
            AudioSyncMessage::ActivateInd(indication),
            AudioSyncResponseKind::Activate,
            sync_id,
            now,
        )
    }

    /// Tell `sink` about a state change that needs no response
    pub fn state_indication(
        &mut self,
        sink: Option<&mut dyn AudioSyncSink>,
        state: AudioSyncState,
        seid: StreamEndpointId,
    ) {
        self.state = state;
        self.seid = seid;
        if let Some(sink) = sink {
            sink.send_sync_message(AudioSyncMessage::StateInd(StateIndication {
                source_id: self.source_id,
                state,
                seid,
            }));
        }
    }

    /// Tell `sink` that the codec parameters changed
    pub fn codec_reconfigured_indication(
        &mut self,
        sink: Option<&mut dyn AudioSyncSink>,
        seid: StreamEndpointId,
        device_id: u8,
        stream_id: u8,
    ) {
        self.seid = seid;
        if let Some(sink) = sink {
            sink.send_sync_message(AudioSyncMessage::CodecReconfiguredInd(
                CodecReconfiguredIndication {
                    source_id: self.source_id,
                    seid,
                    device_id,
                    stream_id,
                },
            ));
        }
    }

    fn request(
        &mut self,
        sink: Option<&mut dyn AudioSyncSink>,
        message: AudioSyncMessage,
        kind: AudioSyncResponseKind,
        sync_id: SyncId,
        now: Instant,
    ) -> Result<(), MirrorError> {
        let response = AudioSyncResponse { kind, sync_id };
        match sink {
            None => {
                debug!("[AUDIO_SYNC] no sink, respond to {:?} now", kind);
                self.ready
                    .push_back(response)
                    .map_err(|_| MirrorError::QueueFull)
            }
            Some(sink) => {
                // A repeated sync id supersedes the older exchange
                self.pending.retain(|p| p.response != response);
                self.pending
                    .push(PendingResponse {
                        response,
                        deadline: now + self.max_sync_delay,
                    })
                    .map_err(|_| MirrorError::QueueFull)?;
                sink.send_sync_message(message);
                Ok(())
            }
        }
    }

    /// Handle a genuine response from a sink
    ///
    /// Returns `false` if the exchange was already answered (by the timeout)
    /// and the response was discarded, or if the response queue is full. In
    /// the latter case the exchange stays pending and is answered by
    /// [`Self::expire`] once the queue has room.
    pub fn handle_sink_response(&mut self, response: AudioSyncResponse) -> bool {
        match self.pending.iter().position(|p| p.response == response) {
            Some(_) if self.ready.is_full() => {
                warn!(
                    "[AUDIO_SYNC] response queue full, {:?} for sync id {} stays pending",
                    response.kind,
                    response.sync_id
                );
                false
            }
            Some(index) => {
                self.pending.swap_remove(index);
                self.ready.push_back(response).is_ok()
            }
            None => {
                debug!(
                    "[AUDIO_SYNC] discarding late {:?} for sync id {}",
                    response.kind,
                    response.sync_id
                );
                false
            }
        }
    }

    /// Synthesize responses for exchanges whose sink did not answer in time
    ///
    /// Expired exchanges that do not fit into the response queue stay pending
    /// until a later call.
    pub fn expire(&mut self, now: Instant) {
        while let Some(index) = self.pending.iter().position(|p| p.deadline <= now) {
            if self.ready.is_full() {
                error!("[AUDIO_SYNC] response queue full");
                break;
            }
            let expired = self.pending.swap_remove(index);
            warn!(
                "[AUDIO_SYNC] sink did not answer {:?} for sync id {}",
                expired.response.kind,
                expired.response.sync_id
            );
            // Cannot fail, checked above
            let _ = self.ready.push_back(expired.response);
        }
    }

    /// Earliest fallback deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.deadline).min()
    }

    /// Next response for the source's own state machine
    pub fn poll_response(&mut self) -> Option<AudioSyncResponse> {
        self.ready.pop_front()
    }
}
