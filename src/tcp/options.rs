//! TCP option parsing and the field helpers derived from them.
//!
//! Options are kept as an ordered list of raw `(kind, bytes)` pairs rather
//! than decoded into a fixed struct, since the detector only ever needs to
//! re-scan for a handful of kinds (MSS, SACK, Timestamp) and a generic list
//! survives malformed/unknown options without losing the rest of the packet.

pub const KIND_EOL: u8 = 0;
pub const KIND_NOP: u8 = 1;
pub const KIND_MSS: u8 = 2;
pub const KIND_SACK: u8 = 5;
pub const KIND_TIMESTAMP: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOption {
    pub kind: u8,
    pub bytes: Vec<u8>,
}

/// Walks a raw TCP options buffer (the variable-length tail of the TCP
/// header, `(data_offset - 5) * 4` bytes) into an ordered list of
/// `(kind, bytes)` pairs. `bytes` holds only the option's value, not its
/// kind/length header bytes. Malformed trailing bytes are dropped silently;
/// options parsed before the malformed tail are kept.
pub fn parse_options(raw: &[u8]) -> Vec<TcpOption> {
    let mut options = Vec::new();
    let mut i = 0usize;
    while i < raw.len() {
        let kind = raw[i];
        match kind {
            KIND_EOL => break,
            KIND_NOP => {
                options.push(TcpOption {
                    kind,
                    bytes: Vec::new(),
                });
                i += 1;
            }
            _ => {
                if i + 1 >= raw.len() {
                    break;
                }
                let len = raw[i + 1] as usize;
                if len < 2 || i + len > raw.len() {
                    break;
                }
                options.push(TcpOption {
                    kind,
                    bytes: raw[i + 2..i + len].to_vec(),
                });
                i += len;
            }
        }
    }
    options
}

/// Returns the TCP payload length: `ip.total_len - (ip.ihl + tcp.data_off) * 4`.
pub fn tcp_data_len(ip_total_len: u16, ip_ihl_words: u8, tcp_data_offset_words: u8) -> u16 {
    let header_bytes = (ip_ihl_words as u16 + tcp_data_offset_words as u16) * 4;
    ip_total_len.saturating_sub(header_bytes)
}

/// Returns the MSS advertised in the options, or -1 if absent. If a
/// Timestamp option is also present, the value is reduced by 12 to account
/// for the options overhead consumed by every segment on this connection.
pub fn tcp_mss(options: &[TcpOption]) -> i32 {
    let mut mss: i32 = -1;
    let mut timestamp_ok = false;
    for option in options {
        match option.kind {
            KIND_MSS if option.bytes.len() == 2 => {
                mss = u16::from_be_bytes([option.bytes[0], option.bytes[1]]) as i32;
            }
            KIND_TIMESTAMP => timestamp_ok = true,
            _ => {}
        }
    }
    if timestamp_ok && mss > 0 {
        mss -= 12;
    }
    mss
}

/// Estimates the MSS assuming the sender transmitted `data_len` bytes as a
/// multiple of the on-the-wire MSS (used for offloaded "jumbo" captures
/// where the SYN's MSS option could not be observed).
pub fn tcp_mss_estimate(data_len: u32) -> i32 {
    if data_len <= 500 {
        return -1;
    }
    if data_len <= 1460 {
        return data_len as i32;
    }
    for multiplier in 2..10u32 {
        if data_len % multiplier == 0 {
            let candidate = data_len / multiplier;
            if candidate <= 1460 {
                return candidate as i32;
            }
        }
    }
    -1
}

/// Extracts SACK/DSACK ranges carried in a SACK option. An option whose
/// length is not a multiple of 8 yields an empty list — the feature is
/// disabled for this packet but the packet is otherwise kept.
pub fn get_sacks(options: &[TcpOption]) -> Vec<(u32, u32)> {
    for option in options {
        if option.kind == KIND_SACK {
            if option.bytes.len() % 8 != 0 {
                log::warn!(
                    "malformed SACK option: length {} is not a multiple of 8",
                    option.bytes.len()
                );
                return Vec::new();
            }
            let mut sacks = Vec::with_capacity(option.bytes.len() / 8);
            for chunk in option.bytes.chunks_exact(8) {
                let start = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let end = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                sacks.push((start, end));
            }
            return sacks;
        }
    }
    Vec::new()
}
