//! Client builder
//!
//! The `ClientBuilder` collects transport and client settings before
//! starting anything. It allows you to:
//! - pick the endpoint: a WebSocket URL or any [`Connector`]
//! - tune connect, send and receive timeouts
//! - choose a reconnection strategy and the pending-call policy
//! - enable OpenTelemetry setup and client metrics
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, ExponentialBackoff, PendingCallPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> tether_core::Result<()> {
//! let client = ClientBuilder::new("ws://localhost:8080/rpc")
//!     .with_reconnect(ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(5)))
//!     .with_receive_timeout(Duration::from_secs(5))
//!     .with_pending_call_policy(PendingCallPolicy::AwaitTimeout)
//!     .build()?;
//!
//! // With observability
//! let client2 = ClientBuilder::new("ws://localhost:8080/rpc")
//!     .with_default_observability()
//!     .service_name("my-frontend")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::client::{Client, ClientConfig, PendingCallPolicy};
use crate::connector::{Connector, WsConnector};
use crate::metrics::ClientMetrics;
use crate::reconnect::ReconnectionStrategy;
use crate::transport::{Transport, TransportConfig};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Error, ObservabilityConfig, Result};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

enum Endpoint {
    Url(String),
    Connector(Box<dyn Connector>),
}

/// Builder for configuring and starting a [`Client`]
pub struct ClientBuilder {
    endpoint: Endpoint,
    transport: TransportConfig,
    client: ClientConfig,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    metrics: bool,
}

impl ClientBuilder {
    /// Builder for a WebSocket endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_endpoint(Endpoint::Url(url.into()))
    }

    /// Builder over a custom connector, e.g. [`memory`](crate::memory)
    pub fn with_connector(connector: impl Connector) -> Self {
        Self::with_endpoint(Endpoint::Connector(Box::new(connector)))
    }

    fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            transport: TransportConfig::default(),
            client: ClientConfig::default(),
            observability_config: None,
            service_name: None,
            metrics: false,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.transport.send_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.client.receive_timeout = timeout;
        self
    }

    /// Replace the default delay sequence
    pub fn with_reconnect(mut self, strategy: impl ReconnectionStrategy) -> Self {
        self.transport.strategy = Box::new(strategy);
        self
    }

    pub fn with_pending_call_policy(mut self, policy: PendingCallPolicy) -> Self {
        self.client.pending_call_policy = policy;
        self
    }

    /// Initialize OpenTelemetry with this configuration on build
    ///
    /// Also enables client metrics.
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Record client metrics through the global meter provider
    pub fn with_metrics(mut self) -> Self {
        self.metrics = true;
        self
    }

    /// Service name for telemetry
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Start the transport and attach a client
    ///
    /// Returns immediately; the first connection is made in the background.
    /// Must be called within a tokio runtime. Fails only for a malformed URL.
    pub fn build(self) -> Result<Client> {
        let service_name = self
            .service_name
            .clone()
            .or_else(|| self.observability_config.as_ref().map(|c| c.service_name.clone()))
            .unwrap_or_else(|| "tether".to_string());

        let metrics_enabled = self.metrics || self.observability_config.is_some();
        if let Some(mut config) = self.observability_config {
            config.service_name = service_name.clone();
            // a subscriber installed by the application takes precedence
            if let Err(e) = tether_core::init_observability(config) {
                tracing::warn!(error = %e, "observability not initialized");
            }
        }
        let metrics = metrics_enabled.then(|| Arc::new(ClientMetrics::new(service_name)));

        let transport_config = self.transport.with_metrics_handle(metrics.clone());
        let transport = match self.endpoint {
            Endpoint::Url(url) => {
                url.as_str()
                    .into_client_request()
                    .map_err(|e| Error::Connect(format!("invalid url {url}: {e}")))?;
                tracing::info!(url = %url, "starting client");
                Transport::with_connector(WsConnector::new(url), transport_config)
            }
            Endpoint::Connector(connector) => {
                tracing::info!("starting client over custom connector");
                Transport::with_connector(connector, transport_config)
            }
        };

        Ok(Client::with_metrics(transport, self.client, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::memory;
    use crate::reconnect::FixedDelay;

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::new("ws://localhost:8080");
        assert!(matches!(builder.endpoint, Endpoint::Url(ref url) if url == "ws://localhost:8080"));
        assert_eq!(builder.transport.connect_timeout, Duration::from_secs(1));
        assert_eq!(builder.transport.send_timeout, Duration::from_secs(1));
        assert_eq!(builder.client.receive_timeout, Duration::from_secs(1));
        assert_eq!(builder.client.pending_call_policy, PendingCallPolicy::RejectOnClose);
        assert!(builder.observability_config.is_none());
        assert!(builder.service_name.is_none());
        assert!(!builder.metrics);
    }

    #[test]
    fn test_builder_chaining() {
        let builder = ClientBuilder::new("ws://localhost:8080")
            .with_connect_timeout(Duration::from_millis(250))
            .with_send_timeout(Duration::from_millis(500))
            .with_receive_timeout(Duration::from_secs(3))
            .with_reconnect(FixedDelay::new(Duration::from_millis(10)))
            .with_pending_call_policy(PendingCallPolicy::AwaitTimeout)
            .with_metrics()
            .service_name("test-service");

        assert_eq!(builder.transport.connect_timeout, Duration::from_millis(250));
        assert_eq!(builder.transport.send_timeout, Duration::from_millis(500));
        assert_eq!(builder.client.receive_timeout, Duration::from_secs(3));
        assert_eq!(builder.client.pending_call_policy, PendingCallPolicy::AwaitTimeout);
        assert!(builder.metrics);
        assert_eq!(builder.service_name.as_deref(), Some("test-service"));
    }

    #[test]
    fn test_builder_observability_config() {
        let config = ObservabilityConfig::new("test-client")
            .with_endpoint("http://localhost:4317")
            .with_log_level("debug");

        let builder = ClientBuilder::new("ws://localhost:8080").with_observability(config);
        let obs = builder.observability_config.unwrap();
        assert_eq!(obs.service_name, "test-client");
        assert_eq!(obs.log_level, "debug");
    }

    #[tokio::test]
    async fn test_build_rejects_malformed_url() {
        let err = ClientBuilder::new("not a url").build().unwrap_err();
        assert!(matches!(err, Error::Connect(_)));
    }

    #[tokio::test]
    async fn test_build_over_connector() {
        let (connector, mut listener) = memory();
        let client = ClientBuilder::with_connector(connector).build().unwrap();
        let _server = listener.accept().await.unwrap();
        client.transport().opened().await.unwrap();
        assert!(client.transport().is_open());
        client.close();
    }
}
