//! SSDP multicast discovery.
//!
//! Sends `M-SEARCH` datagrams from the first private interface, collects
//! responses until the listen timeout, and extracts bridge hints from two
//! response formats:
//!
//! - firmware newer than 1.9 adds a `hue-bridgeid` header;
//! - older firmware only carries the MAC at the end of the USN uuid.

use crate::check_ip::unique_id_from_mac;
use crate::job::Task;
use crate::method::{DiscoveryMethod, MethodContext, MethodSearch, Reporter};
use crate::net::{self, LocalInterface};
use async_trait::async_trait;
use hue_discovery_core::{BridgeDiscoveryResult, DiscoveryClassType, Result, UpnpConfig};
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// Largest SSDP response accepted
const RECV_BUFFER_SIZE: usize = 4096;

/// Multicast hop limit; SSDP stays on the local segment
const MULTICAST_TTL: u32 = 2;

const HEADER_END: &str = "\r\n\r\n";

const BRIDGE_ID_FORMAT: &str = r"(?is)LOCATION:\s*http://(\d{1,3}(?:\.\d{1,3}){3})(?::\d+)?/description\.xml.*?SERVER:[^\r\n]*IpBridge/(\d+\.\d+(?:\.\d+)?).*?hue-bridgeid:\s*([0-9a-f]{16})";

const LEGACY_FORMAT: &str = r"(?is)LOCATION:\s*http://(\d{1,3}(?:\.\d{1,3}){3})(?::\d+)?/description\.xml.*?SERVER:[^\r\n]*IpBridge/(\d+\.\d+(?:\.\d+)?).*?USN:\s*uuid:[0-9a-f-]*?([0-9a-f]{12})::";

/// Builds the discovery request datagram.
pub fn m_search_request(config: &UpnpConfig) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\nHOST: {}:{}\r\nMAN: \"ssdp:discover\"\r\nMX: {}\r\nST: ssdp:all\r\n\r\n",
        config.multicast_addr, config.port, config.mx
    )
}

/// Incremental parser over accumulated SSDP response text
pub struct SsdpParser {
    bridge_id_format: Regex,
    legacy_format: Regex,
    buffer: String,
    candidates: Vec<BridgeDiscoveryResult>,
}

impl SsdpParser {
    pub fn new() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            bridge_id_format: Regex::new(BRIDGE_ID_FORMAT)?,
            legacy_format: Regex::new(LEGACY_FORMAT)?,
            buffer: String::new(),
            candidates: Vec::new(),
        })
    }

    /// Appends received text and parses every complete response in it.
    pub fn feed(&mut self, text: &str) {
        self.buffer.push_str(text);
        while let Some(end) = self.buffer.find(HEADER_END) {
            let message: String = self.buffer.drain(..end + HEADER_END.len()).collect();
            self.parse_message(&message);
        }
    }

    /// Parses any trailing partial response and returns all candidates.
    pub fn finish(mut self) -> Vec<BridgeDiscoveryResult> {
        let rest = std::mem::take(&mut self.buffer);
        if !rest.trim().is_empty() {
            self.parse_message(&rest);
        }
        self.candidates
    }

    fn parse_message(&mut self, message: &str) {
        if let Some(caps) = self.bridge_id_format.captures(message) {
            self.candidates.push(BridgeDiscoveryResult::hinted(
                &caps[1],
                caps[3].to_ascii_uppercase(),
                &caps[2],
            ));
            return;
        }

        if let Some(caps) = self.legacy_format.captures(message) {
            let unique_id = unique_id_from_mac(&caps[3]).unwrap_or_default();
            self.candidates
                .push(BridgeDiscoveryResult::hinted(&caps[1], unique_id, &caps[2]));
            return;
        }

        trace!("Ignoring non-bridge SSDP response");
    }
}

fn bind_socket(iface: &LocalInterface) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_if_v4(&iface.ip)?;
    socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(iface.ip, 0)).into())?;

    Ok(UdpSocket::from_std(socket.into())?)
}

/// Protocol task behind the UPnP method
pub struct UpnpTask {
    context: MethodContext,
    reporter: Reporter,
    config: UpnpConfig,
}

impl UpnpTask {
    pub fn new(context: &MethodContext, reporter: Reporter) -> Self {
        Self {
            config: context.config.upnp.clone(),
            context: context.clone(),
            reporter,
        }
    }

    async fn listen(
        &self,
        socket: &UdpSocket,
        mut parser: SsdpParser,
        cancel: &CancellationToken,
    ) -> Vec<BridgeDiscoveryResult> {
        let request = m_search_request(&self.config);
        let target = SocketAddrV4::new(self.config.multicast_addr, self.config.port);

        let deadline = tokio::time::sleep(self.config.timeout());
        tokio::pin!(deadline);

        let mut sent = 0;
        let mut next_send = tokio::time::Instant::now();
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut deadline => break,
                _ = tokio::time::sleep_until(next_send), if sent < self.config.send_count => {
                    if let Err(e) = socket.send_to(request.as_bytes(), target).await {
                        warn!(error = %e, "Failed to send M-SEARCH");
                    }
                    sent += 1;
                    next_send += self.config.send_interval();
                }
                received = socket.recv_from(&mut buffer) => match received {
                    Ok((size, from)) => {
                        trace!(%from, size, "SSDP response");
                        parser.feed(&String::from_utf8_lossy(&buffer[..size]));
                    }
                    Err(e) => {
                        warn!(error = %e, "SSDP socket closed");
                        break;
                    }
                },
            }
        }

        parser.finish()
    }
}

#[async_trait]
impl Task for UpnpTask {
    type Output = Vec<BridgeDiscoveryResult>;

    #[instrument(name = "upnp", skip_all)]
    async fn execute(&mut self, cancel: &CancellationToken) -> Self::Output {
        let iface = match net::first_private_interface() {
            Ok(iface) => iface,
            Err(e) => {
                warn!(error = %e, "UPnP search skipped");
                return Vec::new();
            }
        };

        let socket = match bind_socket(&iface) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(interface = %iface.name, error = %e, "Failed to bind SSDP socket");
                return Vec::new();
            }
        };

        let parser = match SsdpParser::new() {
            Ok(parser) => parser,
            Err(e) => {
                warn!(error = %e, "Invalid SSDP response pattern");
                return Vec::new();
            }
        };

        let candidates = self.listen(&socket, parser, cancel).await;
        drop(socket);
        debug!(candidates = candidates.len(), "SSDP listen window closed");

        if cancel.is_cancelled() {
            return Vec::new();
        }

        self.context
            .validation(candidates, &self.reporter)
            .execute(cancel)
            .await
    }
}

/// Creates the UPnP discovery method
pub fn method(context: &MethodContext) -> Box<dyn DiscoveryMethod> {
    Box::new(MethodSearch::new(
        DiscoveryClassType::Upnp,
        context.clone(),
        UpnpTask::new,
    ))
}
