use pnet_packet::Packet as _;
use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::tcp::TcpPacket;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// HTTP methods we recognise at the start of a TCP payload.
const METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"];

/// A captured HTTP request as seen by handlers.
/// This is the output of frame decoding and the input of dispatch.
#[derive(Debug, PartialEq, Clone)]
pub struct Packet {
    pub source_ip: IpAddr,
    pub dest_ip: IpAddr,
    pub source_port: u16,
    pub dest_port: u16,
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    pub cookies: BTreeMap<String, String>,
    pub user_agent: Option<String>,
}

impl Packet {
    /// The observed domain: the `Host` header, lower-cased, without a port.
    pub fn domain(&self) -> Option<String> {
        let host = self.host.as_deref()?.trim();
        let host = match host.rsplit_once(':') {
            // Leave bracketed IPv6 literals without a port alone.
            Some((name, port)) if !name.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                name
            }
            _ => host,
        };
        if host.is_empty() {
            None
        } else {
            Some(host.to_ascii_lowercase())
        }
    }

    /// Name used for a result when no handler-specific site applies.
    pub fn site(&self) -> String {
        self.domain().unwrap_or_else(|| self.dest_ip.to_string())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// Decodes a raw Ethernet frame into a `Packet` if it carries the head of an
/// HTTP request over TCP (IPv4 or IPv6). Anything else yields `None`.
pub fn decode_frame(frame: &[u8]) -> Option<Packet> {
    let ethernet = EthernetPacket::new(frame)?;
    match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => {
            let ipv4 = Ipv4Packet::new(ethernet.payload())?;
            decode_transport(
                IpAddr::V4(ipv4.get_source()),
                IpAddr::V4(ipv4.get_destination()),
                ipv4.get_next_level_protocol(),
                ipv4.payload(),
            )
        }
        EtherTypes::Ipv6 => {
            let ipv6 = Ipv6Packet::new(ethernet.payload())?;
            decode_transport(
                IpAddr::V6(ipv6.get_source()),
                IpAddr::V6(ipv6.get_destination()),
                ipv6.get_next_header(),
                ipv6.payload(),
            )
        }
        // ARP and friends never carry sessions.
        _ => None,
    }
}

fn decode_transport(
    source_ip: IpAddr,
    dest_ip: IpAddr,
    protocol: IpNextHeaderProtocol,
    payload: &[u8],
) -> Option<Packet> {
    if protocol != IpNextHeaderProtocols::Tcp {
        return None;
    }
    let tcp = TcpPacket::new(payload)?;
    let request = parse_request_head(tcp.payload())?;
    Some(Packet {
        source_ip,
        dest_ip,
        source_port: tcp.get_source(),
        dest_port: tcp.get_destination(),
        method: request.method,
        path: request.path,
        host: request.host,
        cookies: request.cookies,
        user_agent: request.user_agent,
    })
}

/// The parts of an HTTP request head handlers care about.
#[derive(Debug, Default, PartialEq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    pub cookies: BTreeMap<String, String>,
    pub user_agent: Option<String>,
}

/// Reads the request line and headers from the start of a TCP payload.
/// The head must be complete in this segment.
pub fn parse_request_head(payload: &[u8]) -> Option<RequestHead> {
    let text = std::str::from_utf8(payload).ok()?;
    let (head, _body) = text.split_once("\r\n\r\n")?;
    let mut lines = head.split("\r\n");

    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?;
    if !METHODS.contains(&method) {
        return None;
    }
    let path = request_line.next()?;
    if !request_line.next()?.starts_with("HTTP/") {
        return None;
    }

    let mut request = RequestHead {
        method: method.to_string(),
        path: path.to_string(),
        ..Default::default()
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("host") {
            request.host = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("cookie") {
            parse_cookies(value, &mut request.cookies);
        } else if name.eq_ignore_ascii_case("user-agent") {
            request.user_agent = Some(value.to_string());
        }
    }
    Some(request)
}

/// Splits a `Cookie` header value into name/value pairs. Later duplicates win.
pub fn parse_cookies(header: &str, into: &mut BTreeMap<String, String>) {
    for pair in header.split(';') {
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                into.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
}
