//! Reads an offline packet capture file and dispatches each TCP/IPv4 frame
//! to the flow it belongs to.
//!
//! Grounded on `listener/capture.rs`'s `PacketCapturer`/`OwnedPacket` (same
//! `pcap` crate, same owned-buffer-per-frame approach) and
//! `listener/packet/packet_builder.rs`'s Ethernet -> IPv4 parse chain and
//! `timeval` conversion, but reads a capture file with `Capture::from_file`
//! instead of sniffing a live device with `Capture::from_device`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::Packet;

use crate::flow::{ConnectionKey, TcpFlow};
use crate::packet::{AnnotatedPacket, ParsedTcp, TcpFlags};
use crate::tcp::parse_options;

/// Converts a `libc::timeval` (as reported by `pcap`'s packet header) into
/// microseconds since the Unix epoch.
pub fn timeval_to_micros(tv: libc::timeval) -> i64 {
    tv.tv_sec as i64 * 1_000_000 + tv.tv_usec as i64
}

/// Parses a raw captured Ethernet frame into an `AnnotatedPacket`. Returns
/// `None` if the frame is not an Ethernet+IPv4+TCP packet, mirroring the
/// reference implementation's silent-skip-on-parse-failure behavior.
pub fn parse_frame(data: &[u8], ts_us: i64, index: u64) -> Option<AnnotatedPacket> {
    let eth = EthernetPacket::new(data)?;
    if eth.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }
    let ipv4 = Ipv4Packet::new(eth.payload())?;
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
        return None;
    }
    let tcp = TcpPacket::new(ipv4.payload())?;

    let ihl_words = ipv4.get_header_length();
    let data_offset_words = tcp.get_data_offset();
    let options = parse_options(tcp.get_options_raw());

    let data_len = crate::tcp::tcp_data_len(
        ipv4.get_total_length(),
        ihl_words,
        data_offset_words,
    ) as u32;
    let seq = tcp.get_sequence();

    Some(AnnotatedPacket {
        src_ip: ipv4.get_source(),
        dst_ip: ipv4.get_destination(),
        tcp: ParsedTcp {
            src_port: tcp.get_source(),
            dst_port: tcp.get_destination(),
            flags: TcpFlags(tcp.get_flags()),
            window: tcp.get_window(),
            options,
            payload: tcp.payload().to_vec(),
        },
        ts_us,
        index,
        data_len,
        seq,
        seq_end: crate::seq::add_offset(seq, data_len),
        ack: tcp.get_acknowledgement(),
        seq_relative: -1,
        ack_relative: -1,
        rtx: None,
        rtx_is_spurious: false,
        previous_tx: None,
        previous_packet: None,
        ack_index: -1,
        ack_delay_ms: -1.0,
        bytes_passed: -1,
    })
}

/// Reads every frame in the capture file at `path`, reconstructing TCP
/// flows keyed by their symmetrical 4-tuple. Frames that fail to parse as
/// Ethernet/IPv4/TCP are silently skipped and never advance the monotonic
/// packet index, matching the reference driver's contract. Stops after
/// `max_num_packets` successfully-dispatched frames if given.
pub fn read_flows(
    path: &Path,
    max_num_packets: Option<u64>,
) -> Result<HashMap<ConnectionKey, TcpFlow>> {
    let mut cap = pcap::Capture::from_file(path)
        .with_context(|| format!("failed to open capture file {}", path.display()))?;

    let mut flows: HashMap<ConnectionKey, TcpFlow> = HashMap::new();
    let mut index: u64 = 0;

    loop {
        let raw_packet = match cap.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                log::warn!("error reading packet from capture: {e}");
                break;
            }
        };

        let ts_us = timeval_to_micros(raw_packet.header.ts);
        let parsed = match parse_frame(raw_packet.data, ts_us, index) {
            Some(p) => p,
            None => continue,
        };

        let key = ConnectionKey::from_packet(&parsed);
        match flows.get_mut(&key) {
            Some(flow) => flow.add_packet(parsed, true),
            None => {
                let mut flow = TcpFlow::new(&parsed);
                flow.add_packet(parsed, true);
                flows.insert(key, flow);
            }
        }

        index += 1;
        if let Some(max) = max_num_packets {
            if index > max {
                break;
            }
        }
    }

    Ok(flows)
}
