// Local fakes for the external services a run talks to

use crate::connectivity::stun::{ATTR_XOR_MAPPED_ADDRESS, STUN_BINDING_RESPONSE, STUN_MAGIC_COOKIE};
use crate::connectivity::*;
use crate::ProbeConfig;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Serve HTTP/1 on 127.0.0.1 with a closure deciding every response
pub async fn spawn_http_server<F>(responder: F) -> SocketAddr
where
    F: Fn(&Method, &str, &[u8]) -> (StatusCode, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let responder = Arc::new(responder);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let responder = responder.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let responder = responder.clone();
                    async move {
                        let method = req.method().clone();
                        let path = req.uri().path().to_string();
                        let body = req.collect().await?.to_bytes();
                        let (status, text) = responder(&method, path.as_str(), &body[..]);
                        Ok::<_, hyper::Error>(
                            Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::from(text)))
                                .unwrap(),
                        )
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// Echo service that always answers with `body`
pub async fn spawn_echo_server(status: StatusCode, body: &'static str) -> String {
    let addr = spawn_http_server(move |_, _, _| (status, body.to_string())).await;
    format!("http://{}/", addr)
}

/// Probe service answering `status` for whichever port was asked,
/// recording every request body it sees
pub async fn spawn_probe_server(
    status: bool,
) -> (String, Arc<Mutex<Vec<crate::connectivity::prober::ProbeRequest>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let addr = spawn_http_server(move |method, _, body| {
        assert_eq!(*method, Method::POST);
        let request: crate::connectivity::prober::ProbeRequest =
            serde_json::from_slice(body).unwrap();
        let port = request.ports[0];
        recorder.lock().unwrap().push(request);
        (
            StatusCode::OK,
            format!(
                r#"{{"error":false,"check":[{{"port":{},"status":{}}}],"msg":null}}"#,
                port, status
            ),
        )
    })
    .await;
    (format!("http://{}/api/v1/query", addr), seen)
}

/// Probe service answering a fixed body
pub async fn spawn_fixed_probe_server(body: &'static str) -> String {
    let addr = spawn_http_server(move |_, _, _| (StatusCode::OK, body.to_string())).await;
    format!("http://{}/api/v1/query", addr)
}

/// A URL nothing listens on
pub async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/", addr)
}

/// Binding success response carrying `mapped` as XOR-MAPPED-ADDRESS
pub fn stun_success_response(transaction_id: &[u8], mapped: SocketAddr) -> Vec<u8> {
    let IpAddr::V4(ip) = mapped.ip() else {
        panic!("IPv4 only");
    };

    let mut attr = Vec::new();
    attr.extend_from_slice(&ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
    attr.extend_from_slice(&8u16.to_be_bytes());
    attr.push(0);
    attr.push(0x01);
    attr.extend_from_slice(&(mapped.port() ^ (STUN_MAGIC_COOKIE >> 16) as u16).to_be_bytes());
    attr.extend_from_slice(&(u32::from(ip) ^ STUN_MAGIC_COOKIE).to_be_bytes());

    let mut msg = Vec::new();
    msg.extend_from_slice(&STUN_BINDING_RESPONSE.to_be_bytes());
    msg.extend_from_slice(&(attr.len() as u16).to_be_bytes());
    msg.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
    msg.extend_from_slice(transaction_id);
    msg.extend_from_slice(&attr);
    msg
}

/// STUN server reporting `mapped` to every binding request
pub async fn spawn_stun_server(mapped: SocketAddr) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 576];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            if len < 20 {
                continue;
            }
            let response = stun_success_response(&buf[8..20], mapped);
            let _ = socket.send_to(&response, from).await;
        }
    });
    addr.to_string()
}

/// UDP address that never answers
pub async fn silent_udp_server() -> (UdpSocket, String) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    (socket, addr)
}

/// Requests a fake gateway has received, oldest first
pub type GatewayLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// NAT-PMP gateway granting `external_port` with at most `max_lease` seconds
pub async fn spawn_natpmp_gateway(
    external_ip: Ipv4Addr,
    external_port: u16,
    max_lease: u32,
) -> (SocketAddr, GatewayLog) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let log: GatewayLog = Arc::new(Mutex::new(Vec::new()));
    let recorder = log.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            recorder.lock().unwrap().push(buf[..len].to_vec());
            let mut response = vec![0u8, 128 + buf[1], 0, 0];
            response.extend_from_slice(&42u32.to_be_bytes());
            match (len, buf[1]) {
                (2, 0) => response.extend_from_slice(&external_ip.octets()),
                (12, 1 | 2) => {
                    let requested = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
                    response.extend_from_slice(&buf[4..6]);
                    response.extend_from_slice(&external_port.to_be_bytes());
                    response.extend_from_slice(&requested.min(max_lease).to_be_bytes());
                }
                _ => continue,
            }
            let _ = socket.send_to(&response, from).await;
        }
    });
    (addr, log)
}

/// Config pointing every service at local fakes, with no settling delay
pub fn test_config(echo_url: String, probe_url: String, stun_server: String) -> ProbeConfig {
    ProbeConfig {
        port: Some(0),
        settle_delay_ms: 0,
        http_timeout_secs: 2,
        stun_timeout_ms: 300,
        echo_url,
        probe_url,
        stun_server,
        natpmp_enabled: false,
        ..ProbeConfig::default()
    }
}

/// Interface source returning a fixed set of records
pub struct StaticInterfaces(pub Vec<InterfaceRecord>);

impl InterfaceSource for StaticInterfaces {
    fn interfaces(&self) -> std::io::Result<Vec<InterfaceRecord>> {
        Ok(self.0.clone())
    }
}

/// Interface source whose listing always fails
pub struct BrokenInterfaces;

impl InterfaceSource for BrokenInterfaces {
    fn interfaces(&self) -> std::io::Result<Vec<InterfaceRecord>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "netlink unavailable",
        ))
    }
}

/// One `eth0` interface with a private address and loopback `lo`
pub fn lan_interfaces() -> Arc<dyn InterfaceSource> {
    Arc::new(StaticInterfaces(vec![
        InterfaceRecord {
            name: "lo".to_string(),
            addresses: Ok(vec!["127.0.0.1".parse().unwrap(), "::1".parse().unwrap()]),
        },
        InterfaceRecord {
            name: "eth0".to_string(),
            addresses: Ok(vec!["192.168.1.20".parse().unwrap()]),
        },
    ]))
}

/// Resolver with canned answers
pub struct FixedResolver {
    pub echo: Result<PublicEndpoint, ResolveError>,
    pub stun: Result<PublicEndpoint, ResolveError>,
}

impl FixedResolver {
    pub fn echo_only(ip: &str) -> Self {
        Self {
            echo: Ok(PublicEndpoint::http_echo(ip.parse().unwrap())),
            stun: Err(ResolveError::StunTimeout),
        }
    }
}

#[async_trait]
impl PublicEndpointResolver for FixedResolver {
    async fn resolve_via_http_echo(&self) -> Result<PublicEndpoint, ResolveError> {
        self.echo.clone()
    }

    async fn resolve_via_stun(&self, _server: &str) -> Result<PublicEndpoint, ResolveError> {
        self.stun.clone()
    }
}

/// What a `RecordingProbe` call observed
#[derive(Debug, Clone)]
pub struct ProbeCall {
    pub host: IpAddr,
    pub port: u16,
    /// Whether a TCP connect to the port succeeded at call time
    pub listener_accepting: bool,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Probe double that connects to the listener before answering
pub struct RecordingProbe {
    outcome: Result<bool, ProbeError>,
    pub calls: Mutex<Vec<ProbeCall>>,
}

impl RecordingProbe {
    pub fn new(outcome: Result<bool, ProbeError>) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReachabilityProbe for RecordingProbe {
    async fn probe(&self, host: IpAddr, port: u16) -> Result<ReachabilityResult, ProbeError> {
        let at = chrono::Utc::now();
        let listener_accepting = tokio::time::timeout(
            Duration::from_secs(1),
            TcpStream::connect((Ipv4Addr::LOCALHOST, port)),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

        self.calls.lock().unwrap().push(ProbeCall {
            host,
            port,
            listener_accepting,
            at,
        });

        self.outcome.clone().map(|reachable| ReachabilityResult { port, reachable })
    }
}

/// Mapper double with a canned outcome
pub struct FixedMapper {
    pub external_port: Option<u16>,
}

#[async_trait]
impl PortMapper for FixedMapper {
    async fn request_mapping(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        _external_port_hint: u16,
        lease_secs: u32,
    ) -> Result<PortMapping, MappingError> {
        match self.external_port {
            Some(external_port) => Ok(PortMapping {
                protocol,
                internal_port,
                external_port,
                lease_secs,
                gateway: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
                external_ip: None,
            }),
            None => Err(MappingError::Timeout),
        }
    }

    async fn release_mapping(&self, _mapping: &PortMapping) -> Result<(), MappingError> {
        Ok(())
    }
}

/// Gateway double that forwards a mapped port until it is released
#[derive(Default)]
pub struct ForwardingGateway {
    forwarded: Mutex<Option<u16>>,
    released: Mutex<Vec<u16>>,
}

impl ForwardingGateway {
    pub fn forwarded(&self) -> Option<u16> {
        *self.forwarded.lock().unwrap()
    }

    pub fn released(&self) -> Vec<u16> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortMapper for ForwardingGateway {
    async fn request_mapping(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        external_port_hint: u16,
        lease_secs: u32,
    ) -> Result<PortMapping, MappingError> {
        *self.forwarded.lock().unwrap() = Some(external_port_hint);
        Ok(PortMapping {
            protocol,
            internal_port,
            external_port: external_port_hint,
            lease_secs,
            gateway: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            external_ip: None,
        })
    }

    async fn release_mapping(&self, mapping: &PortMapping) -> Result<(), MappingError> {
        *self.forwarded.lock().unwrap() = None;
        self.released.lock().unwrap().push(mapping.internal_port);
        Ok(())
    }
}

/// Outside observer behind a `ForwardingGateway`: a port is reachable only
/// while the gateway forwards it, and the verdict arrives after `delay`
pub struct NattedObserver {
    pub gateway: Arc<ForwardingGateway>,
    pub delay: Duration,
}

#[async_trait]
impl ReachabilityProbe for NattedObserver {
    async fn probe(&self, _host: IpAddr, port: u16) -> Result<ReachabilityResult, ProbeError> {
        tokio::time::sleep(self.delay).await;
        Ok(ReachabilityResult {
            port,
            reachable: self.gateway.forwarded() == Some(port),
        })
    }
}

/// In-memory log sink for `tracing_subscriber::fmt`
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Subscriber writing plain-text INFO-and-above lines into this capture
    pub fn info_subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
