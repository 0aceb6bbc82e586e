//! Reachability classification engine
//!
//! Sequences one run:
//!
//! 1. Discovering: interface enumeration, HTTP echo and STUN run together.
//!    At least one public endpoint must resolve.
//! 2. ListenerReady: bind the listener and wait for its readiness signal.
//! 3. Settle for `settle_delay` so middleboxes catch up.
//! 4. Probing: ask the outside probe about `public_ip:bound_port`. NAT-PMP
//!    is tried only once the probe has answered, and any mapping it grants
//!    is released before the run ends.
//! 5. Classified: the verdict follows the probe alone; everything else is
//!    evidence.
//!
//! Fatal errors (enumeration, no public endpoint, bind failure) move the run
//! to `Aborted` and are returned to the caller.

use super::cgnat::{classify_address, AddressClass};
use super::interfaces::{list_local_addresses, InterfaceSource, SystemInterfaces};
use super::listener::ListenerCoordinator;
use super::natpmp::{NatPmpMapper, PortMapper, NATPMP_TIMEOUT};
use super::prober::{HttpReachabilityProber, ReachabilityProbe};
use super::resolver::{NetworkResolver, PublicEndpointResolver};
use super::types::{
    Classification, Evidence, IpProtocol, LocalInterface, MappingAttempt, PortMapping,
    PublicEndpoint, ResolveError,
};
use crate::{Error, ProbeConfig, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Engine states, in the order a successful run visits them
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing started yet
    Init,
    /// Enumerating interfaces and resolving public endpoints
    Discovering,
    /// Listener bound and accepting
    ListenerReady,
    /// Probe (and optional mapping) in flight
    Probing,
    /// Verdict computed
    Classified,
    /// Stopped on a fatal error
    Aborted,
}

/// Everything produced by one successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Verdict and evidence
    pub classification: Classification,
    /// Non-loopback local addresses
    pub local_interfaces: Vec<LocalInterface>,
    /// Address the listener was bound to
    pub listen_addr: SocketAddr,
    /// States visited, in order
    pub transitions: Vec<EngineState>,
    /// When the listener signalled readiness
    pub ready_at: DateTime<Utc>,
    /// When the probe was issued
    pub probe_started_at: DateTime<Utc>,
}

/// Orchestrates discovery, listening, probing and classification
pub struct ClassificationEngine {
    config: ProbeConfig,
    interfaces: Arc<dyn InterfaceSource>,
    resolver: Arc<dyn PublicEndpointResolver>,
    prober: Arc<dyn ReachabilityProbe>,
    mapper: Option<Arc<dyn PortMapper>>,
    last_transitions: Mutex<Vec<EngineState>>,
}

impl ClassificationEngine {
    /// Wire up the real network components from `config`
    pub fn from_config(config: ProbeConfig) -> Result<Self> {
        config.validate()?;

        let resolver = NetworkResolver::new(&config)?;
        let prober = HttpReachabilityProber::new(&config)?;
        let mapper: Option<Arc<dyn PortMapper>> = if config.natpmp_enabled {
            Some(Arc::new(NatPmpMapper::new(config.natpmp_gateway, NATPMP_TIMEOUT)))
        } else {
            None
        };

        Ok(Self::new(
            config,
            Arc::new(SystemInterfaces),
            Arc::new(resolver),
            Arc::new(prober),
            mapper,
        ))
    }

    /// Build an engine from explicit components
    pub fn new(
        config: ProbeConfig,
        interfaces: Arc<dyn InterfaceSource>,
        resolver: Arc<dyn PublicEndpointResolver>,
        prober: Arc<dyn ReachabilityProbe>,
        mapper: Option<Arc<dyn PortMapper>>,
    ) -> Self {
        Self {
            config,
            interfaces,
            resolver,
            prober,
            mapper,
            last_transitions: Mutex::new(Vec::new()),
        }
    }

    /// Configuration this engine runs with
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// States visited by the most recent run, including `Aborted`
    pub fn last_transitions(&self) -> Vec<EngineState> {
        self.last_transitions
            .lock()
            .map(|states| states.clone())
            .unwrap_or_default()
    }

    /// Run the full classification once
    pub async fn run(&self) -> Result<RunReport> {
        let mut trace = StateTrace::new();
        let result = self.run_traced(&mut trace).await;

        if let Ok(mut last) = self.last_transitions.lock() {
            *last = trace.states;
        }
        result
    }

    async fn run_traced(&self, trace: &mut StateTrace) -> Result<RunReport> {
        // Discovering
        trace.enter(EngineState::Discovering);
        let source = Arc::clone(&self.interfaces);
        let (local_interfaces, http_echo, stun) = tokio::join!(
            tokio::task::spawn_blocking(move || list_local_addresses(source.as_ref())),
            self.resolver.resolve_via_http_echo(),
            self.resolver.resolve_via_stun(&self.config.stun_server),
        );

        let local_interfaces = local_interfaces
            .map_err(|e| Error::Enumeration(format!("Enumeration task failed: {}", e)))
            .and_then(|listed| listed)
            .map_err(|e| trace.abort(e))?;
        debug!("Found {} local address(es)", local_interfaces.len());

        if let Err(e) = &http_echo {
            debug!("HTTP echo resolution failed: {}", e);
        }
        if let Err(e) = &stun {
            debug!("STUN resolution failed: {}", e);
        }

        let probed_host = select_probe_host(&http_echo, &stun).map_err(|e| trace.abort(e))?;
        let endpoints_agree = endpoints_agree(&http_echo, &stun);
        if endpoints_agree == Some(false) {
            debug!("HTTP echo and STUN report different public IPs");
        }

        // ListenerReady
        let port = self.config.listen_port();
        info!("Starting a TCP server on port {}...", port);
        let listener = ListenerCoordinator::start(port)
            .await
            .map_err(|e| trace.abort(e))?;
        let listen_addr = listener.await_ready().await.map_err(|e| trace.abort(e))?;
        let ready_at = Utc::now();
        trace.enter(EngineState::ListenerReady);

        if !self.config.settle_delay().is_zero() {
            debug!("Settling for {:?} before probing", self.config.settle_delay());
            tokio::time::sleep(self.config.settle_delay()).await;
        }

        // Probing
        trace.enter(EngineState::Probing);
        let probed_port = listen_addr.port();
        let probe_started_at = Utc::now();
        let reachability = self.prober.probe(probed_host, probed_port).await;
        if let Err(e) = &reachability {
            warn!("Reachability probe failed: {}", e);
        }

        // Mapping only after the probe has answered, so a granted mapping
        // cannot open the port the probe is testing
        let mapping = self.try_mapping(probed_port).await;

        // Classified
        let address_class = classify_address(probed_host);
        let classification = Classification::from_evidence(Evidence {
            http_echo,
            stun,
            endpoints_agree,
            probed_host,
            probed_port,
            reachability,
            mapping,
            cgnat_detected: address_class == AddressClass::Cgnat,
            private_address: address_class == AddressClass::Private,
        });
        trace.enter(EngineState::Classified);
        info!("Classification: {}", classification.verdict);

        if let MappingAttempt::Mapped(mapping) = &classification.evidence.mapping {
            self.release_mapping(mapping).await;
        }
        listener.shutdown().await;

        Ok(RunReport {
            classification,
            local_interfaces,
            listen_addr,
            transitions: trace.states.clone(),
            ready_at,
            probe_started_at,
        })
    }

    async fn release_mapping(&self, mapping: &PortMapping) {
        let Some(mapper) = &self.mapper else {
            return;
        };

        if let Err(e) = mapper.release_mapping(mapping).await {
            debug!(
                "Failed to release NAT-PMP mapping for port {}: {}",
                mapping.internal_port, e
            );
        }
    }

    async fn try_mapping(&self, port: u16) -> MappingAttempt {
        let Some(mapper) = &self.mapper else {
            return MappingAttempt::NotAttempted;
        };

        match mapper
            .request_mapping(IpProtocol::TCP, port, port, self.config.natpmp_lease_secs)
            .await
        {
            Ok(mapping) => MappingAttempt::Mapped(mapping),
            Err(e) => {
                debug!("NAT-PMP unavailable: {}", e);
                MappingAttempt::Unsupported(e.to_string())
            }
        }
    }
}

/// Pick the IP to probe: HTTP echo first, STUN as fallback
pub fn select_probe_host(
    http_echo: &std::result::Result<PublicEndpoint, ResolveError>,
    stun: &std::result::Result<PublicEndpoint, ResolveError>,
) -> Result<IpAddr> {
    match (http_echo, stun) {
        (Ok(echo), _) => Ok(echo.ip),
        (Err(e), Ok(stun)) => {
            info!("Using STUN-derived IP {} ({})", stun.ip, e);
            Ok(stun.ip)
        }
        (Err(echo_err), Err(stun_err)) => Err(Error::NoPublicEndpoint {
            http_echo: echo_err.to_string(),
            stun: stun_err.to_string(),
        }),
    }
}

/// Whether both mechanisms saw the same IP; `None` unless both succeeded
pub fn endpoints_agree(
    http_echo: &std::result::Result<PublicEndpoint, ResolveError>,
    stun: &std::result::Result<PublicEndpoint, ResolveError>,
) -> Option<bool> {
    match (http_echo, stun) {
        (Ok(a), Ok(b)) => Some(a.ip == b.ip),
        _ => None,
    }
}

struct StateTrace {
    states: Vec<EngineState>,
}

impl StateTrace {
    fn new() -> Self {
        Self {
            states: vec![EngineState::Init],
        }
    }

    fn current(&self) -> EngineState {
        self.states.last().copied().unwrap_or(EngineState::Init)
    }

    fn enter(&mut self, state: EngineState) {
        debug!("Engine state: {:?} -> {:?}", self.current(), state);
        self.states.push(state);
    }

    fn abort(&mut self, err: Error) -> Error {
        error!("Aborting run during {:?}: {}", self.current(), err);
        self.states.push(EngineState::Aborted);
        err
    }
}
