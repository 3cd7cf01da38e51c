//! Orchestrates the whole pipeline: read a capture file into flows, split
//! each flow into request/response segments, run policing detection on
//! every segment in both directions and at every configured cutoff, and
//! write one output line per (segment, direction) pair.
//!
//! Restructured as a library function from the reference driver's top-level
//! script (`process_pcap.py`), with the flow-dispatch loop itself living in
//! `capture::read_flows`.

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::output::{format_row, DetectionRow, Direction};
use crate::policing::get_policing_params_for_endpoint;
use crate::segment::split_flow_into_segments;

pub struct DriverConfig<'a> {
    pub capture_path: &'a Path,
    pub max_num_packets: Option<u64>,
    pub cutoffs: &'a [usize],
}

/// Runs the full detection pipeline and writes CSV rows to `out`. Returns
/// the number of rows written.
pub fn run(config: &DriverConfig, out: &mut dyn Write) -> Result<u64> {
    let input_filename = config
        .capture_path
        .to_str()
        .unwrap_or("<non-utf8 path>")
        .to_string();

    let mut flows = crate::capture::read_flows(config.capture_path, config.max_num_packets)?;
    log::info!("reconstructed {} flow(s) from {}", flows.len(), input_filename);

    let mut rows_written = 0u64;
    let mut flow_index = 0usize;
    for (_key, flow) in flows.iter_mut() {
        flow.post_process();
        let segments = split_flow_into_segments(flow);

        for (segment_index, mut segment) in segments.into_iter().enumerate() {
            for direction in [Direction::AtoB, Direction::BtoA] {
                let mut results = Vec::with_capacity(config.cutoffs.len());
                for &cutoff in config.cutoffs {
                    let endpoint = match direction {
                        Direction::AtoB => &mut segment.endpoint_a,
                        Direction::BtoA => &mut segment.endpoint_b,
                    };
                    let params = get_policing_params_for_endpoint(endpoint, cutoff);
                    results.push((cutoff, params));
                }

                let endpoint = match direction {
                    Direction::AtoB => &segment.endpoint_a,
                    Direction::BtoA => &segment.endpoint_b,
                };
                let row = DetectionRow {
                    input_filename: &input_filename,
                    flow_index,
                    segment_index,
                    direction,
                    num_data_packets: endpoint.num_data_packets,
                    num_losses: endpoint.num_losses(),
                    results: &results,
                };
                writeln!(out, "{}", format_row(&row))?;
                rows_written += 1;
            }
        }

        flow_index += 1;
    }

    Ok(rows_written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_capture_path_produces_no_rows_on_bad_file() {
        let config = DriverConfig {
            capture_path: Path::new("/nonexistent/path/to/capture.pcap"),
            max_num_packets: None,
            cutoffs: &[0, 2],
        };
        let mut buf = Vec::new();
        let result = run(&config, &mut buf);
        assert!(result.is_err());
    }
}
