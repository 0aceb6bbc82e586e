//! Connectivity module: public address discovery and reachability
//!
//! Components, leaves first:
//! - interface enumeration (`interfaces`)
//! - public endpoint resolution via HTTP echo and STUN (`http_ip`, `stun`, `resolver`)
//! - the TCP listener the probe connects to (`listener`)
//! - the third-party reachability probe (`prober`)
//! - optional NAT-PMP mapping (`gateway`, `natpmp`)
//! - the classification engine tying them together (`orchestrator`)

// Submodules
pub mod cgnat;
pub mod gateway;
pub mod http_ip;
pub mod interfaces;
pub mod listener;
pub mod natpmp;
pub mod orchestrator;
pub mod prober;
pub mod resolver;
pub mod stun;
pub mod types;

// Re-export commonly used types
pub use types::{
    Classification, EndpointSource, Evidence, IpProtocol, LocalInterface, MappingAttempt,
    MappingError, PortMapping, ProbeError, PublicEndpoint, ReachabilityResult, ResolveError,
    Verdict,
};

// Re-export main entry points
pub use cgnat::{classify_address, AddressClass};
pub use interfaces::{list_local_addresses, InterfaceRecord, InterfaceSource, SystemInterfaces};
pub use listener::{ConnectionEvent, ListenerCoordinator, ListenerHandle, ReadySignal};
pub use natpmp::{NatPmpClient, NatPmpMapper, PortMapper};
pub use orchestrator::{ClassificationEngine, EngineState, RunReport};
pub use prober::{HttpReachabilityProber, ReachabilityProbe};
pub use resolver::{NetworkResolver, PublicEndpointResolver};
