//! WebRTC negotiation engine
//!
//! Adapts a `webrtc` peer connection to the `NegotiationEngine` port: one
//! peer connection per call session, with one audio and one video
//! transceiver, forwarding gathered candidates and remote tracks as
//! engine events.
use crate::config::IceConfig;
use crate::domain::call::engine::{EngineEvent, EngineEventSender, EngineFactory, NegotiationEngine};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{
    DescriptionKind, IceCandidate, RemoteTrack, SessionDescription, TrackKind,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

fn engine_error(context: &str, err: webrtc::Error) -> CallError {
    CallError::NegotiationEngine(format!("{}: {}", context, err))
}

/// Opens `WebRtcEngine`s with a fixed ICE server list
#[derive(Debug, Clone, Default)]
pub struct WebRtcEngineFactory {
    ice_servers: Vec<String>,
}

impl WebRtcEngineFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    pub fn from_config(config: &IceConfig) -> Self {
        Self::new(config.servers.clone())
    }
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn open(&self, events: EngineEventSender) -> Result<Box<dyn NegotiationEngine>> {
        let engine = WebRtcEngine::open(&self.ice_servers, events).await?;
        Ok(Box::new(engine))
    }
}

/// One peer connection
pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcEngine {
    pub async fn open(ice_servers: &[String], events: EngineEventSender) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| engine_error("Failed to register codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| engine_error("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: if ice_servers.is_empty() {
                vec![]
            } else {
                vec![RTCIceServer {
                    urls: ice_servers.to_vec(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| engine_error("Failed to create peer connection", e))?,
        );

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            peer_connection
                .add_transceiver_from_kind(kind, None)
                .await
                .map_err(|e| engine_error("Failed to add transceiver", e))?;
        }

        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(EngineEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let track_events = events;
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => TrackKind::Video,
                        _ => TrackKind::Audio,
                    };
                    let id = track.id();
                    info!("Remote {:?} track {}", kind, id);
                    let _ = events.send(EngineEvent::RemoteTrack(RemoteTrack { id, kind }));
                })
            },
        ));

        Ok(Self { peer_connection })
    }

    fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
        let converted = match description.kind {
            DescriptionKind::Offer => RTCSessionDescription::offer(description.sdp),
            DescriptionKind::Answer => RTCSessionDescription::answer(description.sdp),
        };
        converted.map_err(|e| engine_error("Invalid session description", e))
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| engine_error("Failed to create offer", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| engine_error("Failed to create answer", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = Self::to_rtc(description)?;
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| engine_error("Failed to set local description", e))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = Self::to_rtc(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| engine_error("Failed to set remote description", e))
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| engine_error("Failed to add candidate", e))
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| engine_error("Failed to close peer connection", e))
    }
}
