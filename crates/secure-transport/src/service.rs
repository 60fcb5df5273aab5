//! Secure gateway service - wires stores, channel lifecycle, replay guard
//! and pipeline into an axum router and serves it.

use crate::adapters::{InMemoryChannelStore, InMemoryReplayStore, NoSessionResolver, TracingEventSink};
use crate::channel::{purge_task, ChannelService};
use crate::domain::{ConfigError, GatewayError, SecureConfig};
use crate::handlers::{handshake_router, HandshakeState};
use crate::middleware::{SecureTransportLayer, TracingLayer};
use crate::pipeline::TransportPipeline;
use crate::ports::{
    Authenticator, ChannelStore, ReplayGuardStore, SecurityEventSink, SessionResolver,
    SystemTimeSource, TimeSource,
};
use crate::replay::ReplayGuard;
use axum::Router;
use shared_crypto::{CryptoEngine, Kek, SecretKey};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// External collaborators of the gateway.
#[derive(Clone)]
pub struct GatewayDeps {
    pub channel_store: Arc<dyn ChannelStore>,
    pub replay_store: Arc<dyn ReplayGuardStore>,
    pub sessions: Arc<dyn SessionResolver>,
    pub authenticator: Arc<dyn Authenticator>,
    pub events: Arc<dyn SecurityEventSink>,
    pub clock: Arc<dyn TimeSource>,
}

impl GatewayDeps {
    /// In-memory stores, tracing audit sink and the system clock.
    pub fn in_memory(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            channel_store: Arc::new(InMemoryChannelStore::new()),
            replay_store: Arc::new(InMemoryReplayStore::new()),
            sessions: Arc::new(NoSessionResolver),
            authenticator,
            events: Arc::new(TracingEventSink),
            clock: Arc::new(SystemTimeSource),
        }
    }
}

/// Secure gateway service state
pub struct SecureGatewayService {
    config: Arc<SecureConfig>,
    channels: Arc<ChannelService>,
    pipeline: Arc<TransportPipeline>,
    authenticator: Arc<dyn Authenticator>,
}

impl SecureGatewayService {
    /// Validate `config` and assemble the service.
    pub fn new(config: SecureConfig, deps: GatewayDeps) -> Result<Self, GatewayError> {
        config.validate()?;

        let kek = match config.kek() {
            Ok(kek) => kek,
            // Only reachable with secure mode disabled
            Err(ConfigError::MissingKek) => {
                warn!("No KEK configured, channel keys use an ephemeral KEK");
                Kek::from_key(SecretKey::generate())
            }
            Err(e) => return Err(e.into()),
        };
        let engine = Arc::new(CryptoEngine::new(kek));

        let config = Arc::new(config);
        let channels = Arc::new(ChannelService::new(
            deps.channel_store,
            engine,
            deps.sessions,
            Arc::clone(&deps.events),
            Arc::clone(&deps.clock),
            config.channel_ttl(),
        ));
        let replay = Arc::new(ReplayGuard::new(
            deps.replay_store,
            Arc::clone(&deps.clock),
            config.replay_ttl(),
        ));
        let pipeline = Arc::new(TransportPipeline::new(
            Arc::clone(&config),
            Arc::clone(&channels),
            replay,
            deps.events,
            deps.clock,
        ));

        Ok(Self {
            config,
            channels,
            pipeline,
            authenticator: deps.authenticator,
        })
    }

    pub fn config(&self) -> &SecureConfig {
        &self.config
    }

    pub fn channels(&self) -> Arc<ChannelService> {
        Arc::clone(&self.channels)
    }

    pub fn pipeline(&self) -> Arc<TransportPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Handshake route merged with `app`, behind the secure transport and
    /// tracing layers.
    pub fn router(&self, app: Router) -> Router {
        let handshake = handshake_router(HandshakeState {
            channels: Arc::clone(&self.channels),
            authenticator: Arc::clone(&self.authenticator),
        });

        handshake
            .merge(app)
            .layer(SecureTransportLayer::new(Arc::clone(&self.pipeline)))
            .layer(TracingLayer::new())
    }

    /// Serve `app` on `addr` until `shutdown` resolves.
    pub async fn serve<F>(self, addr: SocketAddr, app: Router, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router(app);

        let purge = tokio::spawn(purge_task(
            Arc::clone(&self.channels),
            self.config.purge_interval(),
        ));

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Bind(format!("{}: {}", addr, e)))?;
        info!(
            addr = %addr,
            enabled = self.config.enabled,
            force = self.config.force,
            "Secure gateway listening"
        );

        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        purge.abort();

        match result {
            Ok(()) => {
                info!("Secure gateway stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Secure gateway server error");
                Err(GatewayError::Serve(e.to_string()))
            }
        }
    }
}
