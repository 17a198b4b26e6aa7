//! One calling endpoint assembled from configuration

use crate::application::coordinator::{CoordinatorConfig, CoordinatorHandle, NegotiationCoordinator};
use crate::config::Config;
use crate::domain::call::MediaDevice;
use crate::infrastructure::protocols::webrtc::WebRtcEngineFactory;
use crate::infrastructure::signaling::{ReconnectPolicy, SignalingTransport, TransportHandle};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Signaling transport, WebRTC engine factory and coordinator wired together
pub struct CallEndpoint {
    calls: CoordinatorHandle,
    transport: TransportHandle,
    transport_task: JoinHandle<()>,
    coordinator_task: JoinHandle<()>,
}

impl CallEndpoint {
    /// Connect to the configured relay and start negotiating
    pub fn start(config: &Config, media: Arc<dyn MediaDevice>) -> Self {
        info!("Starting call endpoint on {}", config.signaling.url);
        let (transport, inbound, transport_task) = SignalingTransport::spawn(
            config.signaling.url.clone(),
            ReconnectPolicy::from(&config.reconnect),
        );

        let (calls, coordinator_task) = NegotiationCoordinator::spawn(
            CoordinatorConfig::from(&config.call),
            transport.clone(),
            inbound,
            Arc::new(WebRtcEngineFactory::from_config(&config.ice)),
            media,
        );

        Self {
            calls,
            transport,
            transport_task,
            coordinator_task,
        }
    }

    pub fn calls(&self) -> &CoordinatorHandle {
        &self.calls
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    /// Hang up any call, then close the relay connection
    pub async fn shutdown(self) {
        let Self {
            calls,
            transport,
            transport_task,
            coordinator_task,
        } = self;

        if let Err(e) = calls.hang_up().await {
            warn!("Hang up during shutdown failed: {}", e);
        }
        // Handles cloned out of `calls()` would otherwise keep it alive
        coordinator_task.abort();
        let _ = coordinator_task.await;

        transport.shutdown();
        if let Err(e) = transport_task.await {
            warn!("Transport task failed: {}", e);
        }
        info!("Call endpoint stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::engine::MockMediaDevice;
    use crate::domain::call::CallStatus;
    use crate::infrastructure::signaling::ConnectionStatus;
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_and_shutdown_without_relay() {
        let mut config = Config::default();
        config.signaling.url = "ws://127.0.0.1:9/signaling/nobody".to_string();
        config.reconnect.initial_delay_ms = 10;
        config.reconnect.max_delay_ms = 20;

        let endpoint = CallEndpoint::start(&config, Arc::new(MockMediaDevice::new()));
        assert_eq!(endpoint.calls().status(), CallStatus::idle());
        assert_ne!(endpoint.transport().status(), ConnectionStatus::Open);

        tokio::time::timeout(Duration::from_secs(5), endpoint.shutdown())
            .await
            .unwrap();
    }
}
