//! Per-direction TCP state reconstruction: one `TcpEndpoint` tracks every
//! packet transmitted by a single side of a connection, learns that side's
//! initial sequence number, classifies retransmissions, and sweeps
//! unacknowledged packets off ACKs and SACKs.
//!
//! Mirrors `listener/tracker.rs`'s `TcpTracker`/`TcpStats` bookkeeping
//! style (a flat packet history plus a pending/"unacked" working set) but
//! keeps the full cross-referenced packet history the detector needs rather
//! than the teacher's summary-statistics-only view.

use crate::packet::AnnotatedPacket;
use crate::seq::{after, before, between, range_included, subtract_offset};
use crate::stats;
use crate::tcp::get_sacks;

#[derive(Debug)]
pub struct TcpEndpoint {
    pub ip: std::net::Ipv4Addr,
    pub port: u16,
    pub mss: i32,

    pub packets: Vec<AnnotatedPacket>,
    unacked_packets: Vec<usize>,
    pub num_data_packets: u64,

    seq_acked: i64,
    seq_next: i64,
    ack: i64,
    seq_init: i64,
    ack_init: i64,
    seq_initialized: bool,

    median_rtt_ms: Option<f64>,
}

impl TcpEndpoint {
    pub fn new(first_packet: &AnnotatedPacket, use_source: bool) -> Self {
        let (ip, port, mss) = if use_source {
            (first_packet.src_ip, first_packet.tcp.src_port, -1)
        } else {
            (
                first_packet.dst_ip,
                first_packet.tcp.dst_port,
                crate::tcp::tcp_mss(&first_packet.tcp.options),
            )
        };

        let mut endpoint = TcpEndpoint {
            ip,
            port,
            mss,
            packets: Vec::new(),
            unacked_packets: Vec::new(),
            num_data_packets: 0,
            seq_acked: -1,
            seq_next: -1,
            ack: -1,
            seq_init: -1,
            ack_init: -1,
            seq_initialized: false,
            median_rtt_ms: None,
        };
        endpoint.set_initial_sequence_numbers(first_packet, use_source);
        endpoint
    }

    /// Relies on either this endpoint's own SEQ (`use_source`) or the peer's
    /// ACK to learn the initial sequence number; relative sequence and ACK
    /// numbers start at 1, matching the detector's convention.
    pub fn set_initial_sequence_numbers(&mut self, packet: &AnnotatedPacket, use_source: bool) {
        let ack_flag_set = packet.tcp.flags.is_ack();

        if self.seq_init == -1 {
            if use_source {
                self.seq_acked = packet.seq as i64;
                self.seq_next = packet.seq as i64;
            } else if ack_flag_set {
                self.seq_acked = packet.ack as i64;
                self.seq_next = packet.ack as i64;
            }
            if self.seq_next != -1 {
                self.seq_init = self.seq_next - 1;
            }
        }

        if self.ack_init == -1 {
            if use_source && ack_flag_set {
                self.ack = packet.ack as i64;
            } else if !use_source {
                self.ack = packet.seq as i64;
            }
            if self.ack != -1 {
                self.ack_init = self.ack - 1;
            }
        }

        if self.seq_init != -1 && self.ack_init != -1 {
            self.seq_initialized = true;
        }
    }

    /// Adds a packet transmitted by this endpoint, splitting it into
    /// on-the-wire segments and updating retransmission/unacked-set state.
    /// Returns the wire-level packets that were appended.
    pub fn add_packet(
        &mut self,
        packet: AnnotatedPacket,
        process_packet: bool,
    ) -> Vec<AnnotatedPacket> {
        if !self.seq_initialized {
            self.set_initial_sequence_numbers(&packet, true);
        }
        if process_packet && self.mss == -1 {
            self.mss = if packet.tcp.flags.is_syn() {
                crate::tcp::tcp_mss(&packet.tcp.options)
            } else {
                crate::tcp::tcp_mss_estimate(packet.data_len)
            };
        }

        let wire_packets = if process_packet {
            crate::packet::tcp_wire_packets(&packet, self.mss)
        } else {
            vec![packet]
        };

        let mut appended = Vec::with_capacity(wire_packets.len());
        for mut wire_packet in wire_packets {
            wire_packet.seq_relative = subtract_offset(wire_packet.seq, self.seq_init as u32) as i64;
            wire_packet.ack_relative = subtract_offset(wire_packet.ack, self.ack_init as u32) as i64;
            if !self.packets.is_empty() {
                wire_packet.previous_packet = Some(self.packets.len() - 1);
            }

            let new_index = self.packets.len();
            if wire_packet.has_data() && process_packet {
                if after(wire_packet.seq_end, self.seq_next as u32) {
                    self.seq_next = wire_packet.seq_end as i64;
                } else {
                    self.find_previous_tx(&mut wire_packet, new_index);
                }
                self.unacked_packets.push(new_index);
            }

            if wire_packet.data_len > 0 {
                self.num_data_packets += 1;
            }

            self.packets.push(wire_packet.clone());
            appended.push(wire_packet);
        }
        appended
    }

    /// Looks for the most recent packet carrying (at least) the same
    /// starting sequence number and links the pair as original/retransmit.
    fn find_previous_tx(&mut self, packet: &mut AnnotatedPacket, new_index: usize) {
        for previous_index in (0..self.packets.len()).rev() {
            let previous = &self.packets[previous_index];
            if previous.seq == packet.seq || between(packet.seq, previous.seq, previous.seq_end) {
                self.packets[previous_index].rtx = Some(new_index);
                packet.previous_tx = Some(previous_index);
                return;
            }
        }
    }

    /// Processes the ACK number and any SACK/DSACK blocks carried by
    /// `ack_packet` (a packet transmitted by the *peer*, received by this
    /// endpoint's sender).
    pub fn process_ack(&mut self, ack_packet: &AnnotatedPacket) {
        let sacks = get_sacks(&ack_packet.tcp.options);

        if after(ack_packet.ack, self.seq_acked as u32) {
            self.seq_acked = ack_packet.ack as i64;
            self.ack_packets(ack_packet, &sacks);
        } else if !sacks.is_empty() {
            self.ack_packets(ack_packet, &sacks);
        }

        if !sacks.is_empty() {
            self.dsack_packets(ack_packet, &sacks);
        }
    }

    fn ack_packets(&mut self, ack_packet: &AnnotatedPacket, sacks: &[(u32, u32)]) {
        let seq_acked = self.seq_acked as u32;
        let mut remaining = Vec::with_capacity(self.unacked_packets.len());
        for &index in &self.unacked_packets {
            let acked = {
                let unacked = &self.packets[index];
                !after(unacked.seq_end, seq_acked) || is_sacked(unacked, sacks)
            };
            if acked {
                let packet = &mut self.packets[index];
                packet.ack_index = ack_packet.index as i64;
                packet.ack_delay_ms = (ack_packet.ts_us - packet.ts_us) as f64 / 1000.0;
            } else {
                remaining.push(index);
            }
        }
        self.unacked_packets = remaining;
    }

    fn dsack_packets(&mut self, ack_packet: &AnnotatedPacket, sacks: &[(u32, u32)]) {
        let ack = ack_packet.ack;
        for &(sack_start, sack_end) in sacks {
            if before(sack_start, ack) && !after(sack_end, ack) {
                self.handle_spurious_rtx(sack_start, sack_end);
            }
        }
    }

    /// Finds the most recent retransmitted packet covered by a DSACK range
    /// and tags its retransmission as spurious.
    fn handle_spurious_rtx(&mut self, seq_start: u32, seq_end: u32) {
        for index in (0..self.packets.len()).rev() {
            let packet = &self.packets[index];
            if packet.rtx.is_some() && range_included(seq_start, seq_end, packet.seq, packet.seq_end)
            {
                self.packets[index].rtx_is_spurious = true;
                return;
            }
        }
    }

    pub fn num_losses(&self) -> u64 {
        self.packets.iter().filter(|p| p.is_lost()).count() as u64
    }

    /// Computes, for every packet, the number of bytes already delivered to
    /// the peer before that packet was sent (in-flight packets included).
    pub fn set_passed_bytes_for_packets(&mut self) {
        let mut num_bytes: i64 = 0;
        for packet in &mut self.packets {
            packet.bytes_passed = num_bytes;
            if !packet.is_lost() {
                num_bytes += packet.data_len as i64;
            }
        }
    }

    pub fn median_rtt_ms(&mut self, recompute: bool) -> Option<f64> {
        if self.median_rtt_ms.is_none() || recompute {
            let rtts: Vec<f64> = self
                .packets
                .iter()
                .filter(|p| p.rtx.is_none() && p.ack_delay_ms != -1.0)
                .map(|p| p.ack_delay_ms)
                .collect();
            self.median_rtt_ms = stats::median(&rtts);
        }
        self.median_rtt_ms
    }
}

fn is_sacked(packet: &AnnotatedPacket, sacks: &[(u32, u32)]) -> bool {
    sacks
        .iter()
        .any(|&(start, end)| range_included(packet.seq, packet.seq_end, start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{ParsedTcp, TcpFlags};
    use std::net::Ipv4Addr;

    fn pkt(seq: u32, data_len: u32, ack: u32, flags: u8, index: u64, ts_us: i64) -> AnnotatedPacket {
        AnnotatedPacket {
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            tcp: ParsedTcp {
                src_port: 1000,
                dst_port: 80,
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
    fn initial_sequence_from_source() {
        let p = pkt(1000, 100, 0, TcpFlags::SYN, 0, 0);
        let endpoint = TcpEndpoint::new(&p, true);
        assert!(endpoint.seq_initialized);
        assert_eq!(endpoint.seq_init, 999);
    }

    #[test]
    fn initial_sequence_from_peer_ack() {
        let p = pkt(1000, 0, 5000, TcpFlags::SYN | TcpFlags::ACK, 0, 0);
        let endpoint = TcpEndpoint::new(&p, false);
        assert_eq!(endpoint.seq_init, 4999);
    }

    #[test]
    fn retransmission_is_detected_and_linked() {
        let mut endpoint = TcpEndpoint::new(&pkt(1000, 0, 0, TcpFlags::SYN, 0, 0), true);
        endpoint.add_packet(pkt(1000, 0, 0, TcpFlags::SYN, 0, 0), true);
        endpoint.add_packet(pkt(1001, 100, 0, TcpFlags::ACK, 1, 1000), true);
        endpoint.add_packet(pkt(1001, 100, 0, TcpFlags::ACK, 2, 2000), true);

        assert_eq!(endpoint.num_losses(), 1);
        let original = &endpoint.packets[1];
        assert!(original.rtx.is_some());
        let rtx_index = original.rtx.unwrap();
        assert_eq!(endpoint.packets[rtx_index].previous_tx, Some(1));
    }

    #[test]
    fn ack_sweeps_unacked_packet() {
        let mut endpoint = TcpEndpoint::new(&pkt(1000, 0, 0, TcpFlags::SYN, 0, 0), true);
        endpoint.add_packet(pkt(1000, 0, 0, TcpFlags::SYN, 0, 0), true);
        endpoint.add_packet(pkt(1001, 100, 0, TcpFlags::ACK, 1, 1_000_000), true);

        let ack = pkt(0, 0, 1101, TcpFlags::ACK, 2, 1_050_000);
        endpoint.process_ack(&ack);

        assert!(endpoint.unacked_packets.is_empty());
        assert_eq!(endpoint.packets[1].ack_index, 2);
        assert!((endpoint.packets[1].ack_delay_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn dsack_marks_retransmission_spurious() {
        let mut endpoint = TcpEndpoint::new(&pkt(1000, 0, 0, TcpFlags::SYN, 0, 0), true);
        endpoint.add_packet(pkt(1000, 0, 0, TcpFlags::SYN, 0, 0), true);
        endpoint.add_packet(pkt(1001, 100, 0, TcpFlags::ACK, 1, 1000), true);
        endpoint.add_packet(pkt(1001, 100, 0, TcpFlags::ACK, 2, 2000), true);
        assert_eq!(endpoint.num_losses(), 1);

        // DSACK covering [1001,1101) below the current ack (1101).
        let mut sack_bytes = Vec::new();
        sack_bytes.extend_from_slice(&1001u32.to_be_bytes());
        sack_bytes.extend_from_slice(&1101u32.to_be_bytes());
        let mut ack = pkt(0, 0, 1101, TcpFlags::ACK, 3, 3000);
        ack.tcp.options.push(crate::tcp::TcpOption {
            kind: crate::tcp::options::KIND_SACK,
            bytes: sack_bytes,
        });
        endpoint.process_ack(&ack);

        assert_eq!(endpoint.num_losses(), 0);
    }

    #[test]
    fn sequence_wraparound_advances_seq_next() {
        let isn = u32::MAX - 999;
        let mut endpoint = TcpEndpoint::new(&pkt(isn, 0, 0, TcpFlags::SYN, 0, 0), true);
        endpoint.add_packet(pkt(isn, 0, 0, TcpFlags::SYN, 0, 0), true);

        // 10 packets of 100 bytes each, straddling the wrap at u32::MAX.
        let mut seq = crate::seq::add_offset(isn, 1);
        for i in 0..10u64 {
            endpoint.add_packet(
                pkt(seq, 100, 0, TcpFlags::ACK, i + 1, (i as i64 + 1) * 1000),
                true,
            );
            seq = crate::seq::add_offset(seq, 100);
        }

        assert_eq!(endpoint.num_losses(), 0);
        assert_eq!(endpoint.packets.len(), 11);
        let last = endpoint.packets.last().unwrap();
        assert_eq!(last.seq_end, seq);
        assert!(last.previous_packet.is_some());
    }

    #[test]
    fn passed_bytes_exclude_lost_packets() {
        let mut endpoint = TcpEndpoint::new(&pkt(1000, 0, 0, TcpFlags::SYN, 0, 0), true);
        endpoint.add_packet(pkt(1000, 0, 0, TcpFlags::SYN, 0, 0), true);
        endpoint.add_packet(pkt(1001, 100, 0, TcpFlags::ACK, 1, 1000), true);
        endpoint.add_packet(pkt(1001, 100, 0, TcpFlags::ACK, 2, 2000), true); // rtx of above
        endpoint.add_packet(pkt(1201, 50, 0, TcpFlags::ACK, 3, 3000), true);

        endpoint.set_passed_bytes_for_packets();
        assert_eq!(endpoint.packets[0].bytes_passed, 0);
        assert_eq!(endpoint.packets[1].bytes_passed, 0); // lost, doesn't count
        assert_eq!(endpoint.packets[2].bytes_passed, 0); // rtx itself counted once it passes (not lost)
        assert_eq!(endpoint.packets[3].bytes_passed, 100);
    }
}
