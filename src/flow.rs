//! TCP flow reconstruction: dispatches packets from both directions of a
//! connection into a pair of `TcpEndpoint`s and keeps the merged,
//! chronologically-ordered packet history the segment splitter consumes.
//!
//! `ConnectionKey` is a symmetrical 4-tuple key, adapted from
//! `listener/stream_id.rs`'s `symmetrical_key` (sorting by the numerically
//! smaller `(ip, port)` pair so either direction of a connection probe maps
//! to the same key) but narrowed to the IPv4/TCP-only domain this detector
//! covers.

use std::net::Ipv4Addr;

use crate::endpoint::TcpEndpoint;
use crate::packet::AnnotatedPacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub ip_a: Ipv4Addr,
    pub port_a: u16,
    pub ip_b: Ipv4Addr,
    pub port_b: u16,
}

impl ConnectionKey {
    pub fn new(ip1: Ipv4Addr, port1: u16, ip2: Ipv4Addr, port2: u16) -> Self {
        if (ip1, port1) <= (ip2, port2) {
            ConnectionKey {
                ip_a: ip1,
                port_a: port1,
                ip_b: ip2,
                port_b: port2,
            }
        } else {
            ConnectionKey {
                ip_a: ip2,
                port_a: port2,
                ip_b: ip1,
                port_b: port1,
            }
        }
    }

    pub fn from_packet(packet: &AnnotatedPacket) -> Self {
        ConnectionKey::new(
            packet.src_ip,
            packet.tcp.src_port,
            packet.dst_ip,
            packet.tcp.dst_port,
        )
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{}",
            self.ip_a, self.port_a, self.ip_b, self.port_b
        )
    }
}

pub struct TcpFlow {
    pub endpoint_a: TcpEndpoint,
    pub endpoint_b: TcpEndpoint,
    pub packets: Vec<AnnotatedPacket>,
}

impl TcpFlow {
    /// Seeds both endpoints from the flow's first observed packet. The
    /// packet itself is not appended to either endpoint's history yet — the
    /// caller must follow with `add_packet(first_packet)`.
    pub fn new(first_packet: &AnnotatedPacket) -> Self {
        TcpFlow {
            endpoint_a: TcpEndpoint::new(first_packet, true),
            endpoint_b: TcpEndpoint::new(first_packet, false),
            packets: Vec::new(),
        }
    }

    /// Routes `packet` to whichever endpoint transmitted it, updates that
    /// endpoint's state, and lets the peer endpoint process the ACK it
    /// carries (if any).
    pub fn add_packet(&mut self, packet: AnnotatedPacket, process_packet: bool) {
        let is_a = packet.src_ip == self.endpoint_a.ip && packet.tcp.src_port == self.endpoint_a.port;
        let has_ack = packet.tcp.flags.is_ack();

        let wire_packets = if is_a {
            self.endpoint_a.add_packet(packet.clone(), process_packet)
        } else {
            self.endpoint_b.add_packet(packet.clone(), process_packet)
        };
        self.packets.extend(wire_packets);

        if process_packet && has_ack {
            if is_a {
                self.endpoint_b.process_ack(&packet);
            } else {
                self.endpoint_a.process_ack(&packet);
            }
        }
    }

    pub fn post_process(&mut self) {
        self.endpoint_a.set_passed_bytes_for_packets();
        self.endpoint_b.set_passed_bytes_for_packets();
    }
}
