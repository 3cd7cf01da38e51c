//! The annotated packet: a single on-the-wire TCP segment enriched with the
//! timing and cross-reference metadata the rest of the pipeline accumulates
//! as it reconstructs a flow.
//!
//! Cross-links (`rtx`, `previous_tx`, `previous_packet`) are indices into the
//! owning endpoint's `packets` vector rather than owned references — the
//! back-reference graph is cyclic in spirit (a retransmission points back at
//! the packet it retransmits, which then points forward at it) and Rust has
//! no good way to own a cycle. See `endpoint::TcpEndpoint`.

use std::net::Ipv4Addr;

use crate::tcp::TcpOption;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const ACK: u8 = 0x10;

    pub fn is_fin(&self) -> bool {
        self.0 & Self::FIN != 0
    }
    pub fn is_syn(&self) -> bool {
        self.0 & Self::SYN != 0
    }
    pub fn is_rst(&self) -> bool {
        self.0 & Self::RST != 0
    }
    pub fn is_ack(&self) -> bool {
        self.0 & Self::ACK != 0
    }
}

/// The mutable TCP view carried by an `AnnotatedPacket`. Kept separate from
/// the immutable capture metadata so that jumbo-splitting (which rewrites
/// `seq`/payload) never has to touch capture-time fields.
#[derive(Debug, Clone)]
pub struct ParsedTcp {
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: TcpFlags,
    pub window: u16,
    pub options: Vec<TcpOption>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AnnotatedPacket {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub tcp: ParsedTcp,

    /// Capture timestamp in microseconds.
    pub ts_us: i64,
    /// Monotonic index assigned by the capture driver (only frames
    /// successfully dispatched to a flow advance it).
    pub index: u64,

    pub data_len: u32,
    pub seq: u32,
    pub seq_end: u32,
    pub ack: u32,

    /// Filled in by the owning endpoint once initial sequence numbers are
    /// known; `-1` until then.
    pub seq_relative: i64,
    pub ack_relative: i64,

    /// Index, within the owning endpoint's `packets` vector, of this
    /// packet's retransmission (the packet that retransmits *this* one).
    pub rtx: Option<usize>,
    pub rtx_is_spurious: bool,
    /// Index of the prior transmission of the same range, if this packet is
    /// itself a retransmission.
    pub previous_tx: Option<usize>,
    /// Index of the immediately-prior packet transmitted by the same
    /// endpoint.
    pub previous_packet: Option<usize>,

    /// Global capture index of the packet that ACKed this one; `-1` until
    /// ACKed.
    pub ack_index: i64,
    /// Delay in milliseconds between this packet's transmission and its ACK;
    /// `-1.0` until ACKed.
    pub ack_delay_ms: f64,

    /// Running count of bytes delivered before this packet; `-1` until
    /// post-processing.
    pub bytes_passed: i64,
}

impl AnnotatedPacket {
    pub fn is_lost(&self) -> bool {
        self.rtx.is_some() && !self.rtx_is_spurious
    }

    pub fn has_data(&self) -> bool {
        self.seq_end != self.seq
    }
}

/// Splits a packet whose payload may exceed the on-the-wire MSS (e.g. a TSO
/// "jumbo" frame captured before segmentation offload) into one or more
/// wire-sized packets with contiguous sequence ranges. Returns a single
/// clone of `packet` unchanged if `mss <= 0` or the payload already fits.
pub fn tcp_wire_packets(packet: &AnnotatedPacket, mss: i32) -> Vec<AnnotatedPacket> {
    if mss <= 0 || packet.data_len <= mss as u32 {
        return vec![packet.clone()];
    }
    let mss = mss as u32;
    let mut out = Vec::with_capacity(((packet.data_len + mss - 1) / mss) as usize);
    let mut offset = 0u32;
    while offset < packet.data_len {
        let chunk_len = mss.min(packet.data_len - offset);
        let mut chunk = packet.clone();
        chunk.data_len = chunk_len;
        chunk.seq = crate::seq::add_offset(packet.seq, offset);
        chunk.seq_end = crate::seq::add_offset(chunk.seq, chunk_len);
        let start = offset as usize;
        let end = ((offset + chunk_len) as usize).min(chunk.tcp.payload.len());
        chunk.tcp.payload = if start >= chunk.tcp.payload.len() {
            Vec::new()
        } else {
            chunk.tcp.payload[start..end].to_vec()
        };
        out.push(chunk);
        offset += chunk_len;
    }
    out
}
