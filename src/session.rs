//! Session handle around a single WebRTC peer connection
//!
//! One [`Session`] corresponds to one connection attempt. The controller
//! owns it exclusively, replaces it wholesale on reconnect or config change,
//! and closes it on teardown. Every callback the session registers tags its
//! events with the attempt generation so the controller can discard events
//! from superseded attempts.

use crate::controller::ViewerEvent;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

/// Live peer connection for one connection attempt
#[derive(Clone)]
pub(crate) struct Session {
    /// Identifier for this attempt in logs
    session_id: String,

    /// Attempt generation carried in every event this session emits
    generation: u64,

    /// Underlying WebRTC peer connection
    pc: Arc<RTCPeerConnection>,
}

impl Session {
    /// Create a peer connection wired for receive-only viewing
    ///
    /// Registers default codecs and interceptors, declares one receive-only
    /// video and one receive-only audio media line, and routes track arrival
    /// and connectivity state changes onto the controller's event queue.
    pub(crate) async fn new(
        generation: u64,
        events: mpsc::UnboundedSender<ViewerEvent>,
    ) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();

        info!(session_id, generation, "creating media session");

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::WebRtc(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtc(format!("failed to create peer connection: {}", e))
        })?);

        // Declare what the remote side should send.
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| Error::Negotiation(format!("failed to add {} receiver: {}", kind, e)))?;
        }

        let track_events = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let _ = track_events.send(ViewerEvent::TrackArrived { generation, track });
            Box::pin(async {})
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let failed = matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected
            );
            let _ = state_events.send(ViewerEvent::TransportState {
                generation,
                label: state.to_string(),
                failed,
            });
            Box::pin(async {})
        }));

        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let failed = matches!(state, RTCIceConnectionState::Failed);
            let _ = events.send(ViewerEvent::TransportState {
                generation,
                label: state.to_string(),
                failed,
            });
            Box::pin(async {})
        }));

        Ok(Self {
            session_id,
            generation,
            pc,
        })
    }

    /// Attempt generation this session belongs to
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Create the local offer and commit it as the local description
    pub(crate) async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to set local description: {}", e)))?;

        let local_desc = self.pc.local_description().await.ok_or_else(|| {
            Error::Negotiation("no local description after setting offer".to_string())
        })?;

        debug!(session_id = %self.session_id, "created local offer");

        Ok(local_desc.sdp)
    }

    /// Commit the remote answer
    pub(crate) async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::Negotiation(format!("failed to parse answer: {}", e)))?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to set remote description: {}", e)))?;

        debug!(session_id = %self.session_id, "committed remote answer");

        Ok(())
    }

    /// Current peer connection state, for assertions in tests
    #[cfg(test)]
    pub(crate) fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    /// Close the underlying peer connection
    pub(crate) async fn close(&self) -> Result<()> {
        info!(session_id = %self.session_id, "closing media session");

        self.pc
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("failed to close connection: {}", e)))
    }
}
