//! Splits a reconstructed flow into request/response segments: a segment is
//! data-from-A followed by data-from-B, and fresh data from A starts a new
//! segment. Non-data packets (pure ACKs, SYN/FIN control packets) ride along
//! with whichever segment is currently open.

use crate::flow::TcpFlow;
use crate::packet::AnnotatedPacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

pub fn split_flow_into_segments(flow: &TcpFlow) -> Vec<TcpFlow> {
    let mut segments = Vec::new();
    if flow.packets.is_empty() {
        return segments;
    }

    let mut current_sender = Side::A;
    segments.push(TcpFlow::new(&flow.packets[0]));

    for packet in flow.packets.iter() {
        if packet.data_len == 0 {
            if let Some(segment) = segments.last_mut() {
                if !segment.packets.is_empty() {
                    segment.add_packet(packet.clone(), false);
                }
            }
            continue;
        }

        let sender_matches = match current_sender {
            Side::A => sent_by_endpoint(packet, &flow.endpoint_a),
            Side::B => sent_by_endpoint(packet, &flow.endpoint_b),
        };
        if !sender_matches {
            if current_sender == Side::A {
                current_sender = Side::B;
            } else {
                current_sender = Side::A;
                segments.push(TcpFlow::new(packet));
            }
        }
        segments.last_mut().unwrap().add_packet(packet.clone(), false);
    }

    segments
}

fn sent_by_endpoint(packet: &AnnotatedPacket, endpoint: &crate::endpoint::TcpEndpoint) -> bool {
    packet.src_ip == endpoint.ip && packet.tcp.src_port == endpoint.port
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{ParsedTcp, TcpFlags};
    use std::net::Ipv4Addr;

    fn pkt(
        src: Ipv4Addr,
        sport: u16,
        dst: Ipv4Addr,
        dport: u16,
        seq: u32,
        data_len: u32,
        ack: u32,
        flags: u8,
        index: u64,
        ts_us: i64,
    ) -> AnnotatedPacket {
        AnnotatedPacket {
            src_ip: src,
            dst_ip: dst,
            tcp: ParsedTcp {
                src_port: sport,
                dst_port: dport,
                flags: TcpFlags(flags),
                window: 65535,
                options: Vec::new(),
                payload: vec![0u8; data_len as usize],
            },
            ts_us,
            index,
            data_len,
            seq,
            seq_end: crate::seq::add_offset(seq, data_len),
            ack,
            seq_relative: -1,
            ack_relative: -1,
            rtx: None,
            rtx_is_spurious: false,
            previous_tx: None,
            previous_packet: None,
            ack_index: -1,
            ack_delay_ms: -1.0,
            bytes_passed: -1,
        }
    }

    #[test]
    fn request_response_pair_forms_one_segment() {
        let client = Ipv4Addr::new(10, 0, 0, 1);
        let server = Ipv4Addr::new(10, 0, 0, 2);

        let syn = pkt(client, 1234, server, 80, 1000, 0, 0, TcpFlags::SYN, 0, 0);
        let mut flow = TcpFlow::new(&syn);
        flow.add_packet(syn, true);
        flow.add_packet(
            pkt(server, 80, client, 1234, 5000, 0, 1001, TcpFlags::SYN | TcpFlags::ACK, 1, 1000),
            true,
        );
        flow.add_packet(
            pkt(client, 1234, server, 80, 1001, 50, 5001, TcpFlags::ACK, 2, 2000),
            true,
        );
        flow.add_packet(
            pkt(server, 80, client, 1234, 5001, 200, 1051, TcpFlags::ACK, 3, 3000),
            true,
        );

        let segments = split_flow_into_segments(&flow);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn new_request_after_response_starts_new_segment() {
        let client = Ipv4Addr::new(10, 0, 0, 1);
        let server = Ipv4Addr::new(10, 0, 0, 2);

        let syn = pkt(client, 1234, server, 80, 1000, 0, 0, TcpFlags::SYN, 0, 0);
        let mut flow = TcpFlow::new(&syn);
        flow.add_packet(syn, true);
        flow.add_packet(
            pkt(client, 1234, server, 80, 1001, 50, 0, TcpFlags::ACK, 1, 1000),
            true,
        );
        flow.add_packet(
            pkt(server, 80, client, 1234, 5000, 200, 1051, TcpFlags::ACK, 2, 2000),
            true,
        );
        // Second request from the client -> new segment.
        flow.add_packet(
            pkt(client, 1234, server, 80, 1051, 60, 5200, TcpFlags::ACK, 3, 3000),
            true,
        );
        flow.add_packet(
            pkt(server, 80, client, 1234, 5200, 80, 1111, TcpFlags::ACK, 4, 4000),
            true,
        );

        let segments = split_flow_into_segments(&flow);
        assert_eq!(segments.len(), 2);
    }
}
