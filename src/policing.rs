//! Token-bucket policing detection: estimates whether a policer is shaping
//! an endpoint's observed throughput, and if so, its rate and burst size.
//!
//! Transcribed from the reference detector's four-stage algorithm (loss
//! window detection, goodput/rate estimation, token-bucket simulation,
//! seven-code verdict), generalized onto the index-based packet/endpoint
//! model in `endpoint`/`packet` rather than the reference's
//! object-identity-based packet comparisons.

use crate::endpoint::TcpEndpoint;
use crate::stats::{mean, median, percentile};

const MIN_NUM_SAMPLES: usize = 15;
const MIN_NUM_SLICES_WITH_LOSS: u32 = 3;
const LATE_LOSS_THRESHOLD: i64 = 2_000_000;

const ZERO_THRESHOLD_LOSS_RTT_MULTIPLIER: f64 = 2.00;
const ZERO_THRESHOLD_PASS_RTT_MULTIPLIER: f64 = 0.75;

const ZERO_THRESHOLD_LOSS_OUT_OF_RANGE: f64 = 0.10;
const ZERO_THRESHOLD_PASS_OUT_OF_RANGE: f64 = 0.03;

const INFLATED_RTT_PERCENTILE: f64 = 10.0;
const INFLATED_RTT_THRESHOLD: f64 = 1.3;
const INFLATED_RTT_TOLERANCE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResultCode {
    Ok = 0,
    InsufficientLoss = 1,
    LateLoss = 2,
    NegativeFill = 3,
    HigherFillOnLoss = 4,
    LossFillOutOfRange = 5,
    PassFillOutOfRange = 6,
    InflatedRtt = 7,
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PolicingParams {
    pub result_code: ResultCode,
    pub policing_rate_bps: f64,
    pub burst_size: u64,
}

impl PolicingParams {
    fn code(result_code: ResultCode) -> Self {
        PolicingParams {
            result_code,
            policing_rate_bps: 0.0,
            burst_size: 0,
        }
    }
}

impl std::fmt::Display for PolicingParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.result_code == ResultCode::Ok {
            write!(
                f,
                "[code {}, {} bps, {} bytes burst]",
                self.result_code as u8, self.policing_rate_bps as i64, self.burst_size
            )
        } else {
            write!(f, "[code {}, null, null]", self.result_code as u8)
        }
    }
}

/// Computes the policing parameters affecting the data transmitted by
/// `endpoint`, skipping `cutoff` lost packets at each end of the loss
/// window when choosing the detection boundaries.
pub fn get_policing_params_for_endpoint(
    endpoint: &mut TcpEndpoint,
    cutoff: usize,
) -> PolicingParams {
    // 1. Detect first and last loss, skipping `cutoff` losses at each end.
    let mut first_loss_no_skip: Option<usize> = None;
    let mut first_loss: Option<usize> = None;
    let mut skipped = 0usize;
    for (i, packet) in endpoint.packets.iter().enumerate() {
        if packet.is_lost() {
            if first_loss_no_skip.is_none() {
                first_loss_no_skip = Some(i);
            }
            if cutoff == skipped {
                first_loss = Some(i);
                break;
            } else {
                skipped += 1;
            }
        }
    }
    let first_loss = match first_loss {
        Some(i) => i,
        None => return PolicingParams::code(ResultCode::InsufficientLoss),
    };

    let mut last_loss: Option<usize> = None;
    skipped = 0;
    for i in (0..endpoint.packets.len()).rev() {
        if i == first_loss {
            break;
        }
        if endpoint.packets[i].is_lost() {
            if cutoff == skipped {
                last_loss = Some(i);
                break;
            } else {
                skipped += 1;
            }
        }
    }
    let last_loss = match last_loss {
        Some(i) => i,
        None => return PolicingParams::code(ResultCode::InsufficientLoss),
    };

    if endpoint.packets[first_loss].seq_relative > LATE_LOSS_THRESHOLD {
        return PolicingParams::code(ResultCode::LateLoss);
    }

    // 2. Compute goodput between first and last loss (the policing rate).
    let policing_rate_bps = goodput_for_range(endpoint, first_loss, last_loss);

    // 2a. Compute the token bucket's initial fill (y-intercept), which must
    // not be too negative.
    let median_rtt_us = match endpoint.median_rtt_ms(false) {
        Some(rtt) => rtt * 1000.0,
        None => return PolicingParams::code(ResultCode::InsufficientLoss),
    };
    let loss_zero_threshold =
        ZERO_THRESHOLD_LOSS_RTT_MULTIPLIER * median_rtt_us * policing_rate_bps / 8e6;
    let pass_zero_threshold =
        ZERO_THRESHOLD_PASS_RTT_MULTIPLIER * median_rtt_us * policing_rate_bps / 8e6;

    let first_loss_seq_relative = endpoint.packets[first_loss].seq_relative as f64;
    let first_loss_ts = endpoint.packets[first_loss].ts_us;
    let origin_ts = endpoint.packets[0].ts_us;
    let y_intercept =
        first_loss_seq_relative - (policing_rate_bps * (first_loss_ts - origin_ts) as f64 / 8e6);
    if y_intercept < -pass_zero_threshold {
        return PolicingParams::code(ResultCode::NegativeFill);
    }

    // 3. Simulate a policer starting with an empty bucket from `first_loss`
    // onward, tracking token availability at each packet.
    let mut tokens_used: f64 = 0.0;
    let mut tokens_on_loss: Vec<f64> = Vec::new();
    let mut tokens_on_pass: Vec<f64> = Vec::new();

    let mut seen_first = false;
    let mut seen_first_no_skip = false;
    let mut burst_size: u64 = 0;
    let mut inflated_rtt_count: u32 = 0;
    let mut all_rtt_count: u32 = 0;
    let mut rtts: Vec<f64> = Vec::new();

    let mut slices_with_loss: u32 = 1;
    let mut slice_end = first_loss_ts + median_rtt_us as i64;

    let mut ignore_index: i64 = -1;

    for (i, packet) in endpoint.packets.iter().enumerate() {
        if packet.rtx.is_some() {
            ignore_index = ignore_index.max(packet.ack_index);
        }
        if packet.rtx.is_none() && packet.ack_delay_ms != -1.0 && packet.index as i64 > ignore_index
        {
            rtts.push(packet.ack_delay_ms);
        }

        if i == first_loss {
            seen_first = true;
        }
        if Some(i) == first_loss_no_skip {
            seen_first_no_skip = true;
        }
        if !seen_first_no_skip {
            burst_size += packet.data_len as u64;
        }
        if !seen_first {
            continue;
        }

        let tokens_produced =
            policing_rate_bps * (packet.ts_us - first_loss_ts) as f64 / 1e6 / 8.0;
        let tokens_available = tokens_produced - tokens_used;

        if packet.is_lost() {
            tokens_on_loss.push(tokens_available);
            if rtts.len() > 1
                && rtts[rtts.len() - 2] >= median(&rtts).unwrap_or(0.0)
                && rtts[rtts.len() - 2]
                    > INFLATED_RTT_THRESHOLD * percentile(&rtts, INFLATED_RTT_PERCENTILE).unwrap_or(0.0)
                && rtts[rtts.len() - 2] >= 20.0
            {
                inflated_rtt_count += 1;
            }
            all_rtt_count += 1;
            if packet.ts_us > slice_end {
                slice_end = packet.ts_us + median_rtt_us as i64;
                slices_with_loss += 1;
            }
        } else {
            tokens_on_pass.push(tokens_available);
            tokens_used += packet.data_len as f64;
        }
    }

    if slices_with_loss < MIN_NUM_SLICES_WITH_LOSS {
        return PolicingParams::code(ResultCode::InsufficientLoss);
    }
    if tokens_on_loss.len() < MIN_NUM_SAMPLES || tokens_on_pass.len() < MIN_NUM_SAMPLES {
        return PolicingParams::code(ResultCode::InsufficientLoss);
    }

    // 4. Match observations against expected policing behavior.
    let mean_loss = mean(&tokens_on_loss).unwrap();
    let mean_pass = mean(&tokens_on_pass).unwrap();
    let median_loss = median(&tokens_on_loss).unwrap();
    let median_pass = median(&tokens_on_pass).unwrap();
    if mean_loss >= mean_pass || median_loss >= median_pass {
        return PolicingParams::code(ResultCode::HigherFillOnLoss);
    }

    let median_tokens_on_loss = median_loss;
    let out_of_range_loss = tokens_on_loss
        .iter()
        .filter(|&&tokens| (tokens - median_tokens_on_loss).abs() > loss_zero_threshold)
        .count();
    if (tokens_on_loss.len() as f64 * ZERO_THRESHOLD_LOSS_OUT_OF_RANGE) < out_of_range_loss as f64 {
        return PolicingParams::code(ResultCode::LossFillOutOfRange);
    }

    let out_of_range_pass = tokens_on_pass
        .iter()
        .filter(|&&tokens| tokens - median_tokens_on_loss < -pass_zero_threshold)
        .count();
    if (tokens_on_pass.len() as f64 * ZERO_THRESHOLD_PASS_OUT_OF_RANGE) < out_of_range_pass as f64 {
        return PolicingParams::code(ResultCode::PassFillOutOfRange);
    }

    let rtt_threshold = INFLATED_RTT_TOLERANCE * all_rtt_count as f64;
    if inflated_rtt_count as f64 > rtt_threshold {
        return PolicingParams::code(ResultCode::InflatedRtt);
    }

    PolicingParams {
        result_code: ResultCode::Ok,
        policing_rate_bps,
        burst_size,
    }
}

/// Computes the goodput (in bits per second) achieved between two packets
/// in `endpoint.packets`, identified by index. Excludes `last_index`'s own
/// contribution to the byte count but includes its timestamp in the
/// elapsed-time denominator, matching the reference implementation.
pub fn goodput_for_range(endpoint: &TcpEndpoint, first_index: usize, last_index: usize) -> f64 {
    let first = &endpoint.packets[first_index];
    let last = &endpoint.packets[last_index];
    if first_index == last_index || first.ts_us == last.ts_us {
        return 0.0;
    }

    let mut byte_count: u64 = 0;
    let mut seen_first = false;
    for (i, packet) in endpoint.packets.iter().enumerate() {
        if i == last_index {
            break;
        }
        if i == first_index {
            seen_first = true;
        }
        if !seen_first {
            continue;
        }
        if !packet.is_lost() {
            byte_count += packet.data_len as u64;
        }
    }

    let time_us = (last.ts_us - first.ts_us) as f64;
    byte_count as f64 * 8.0 * 1e6 / time_us
}
