//! CSV-line serialization of one detection result.
//!
//! The output line format carries no field that needs quoting (the input
//! filename is the only string, and commas there would already corrupt a
//! downstream CSV reader the same way the reference tool's own
//! `%s` formatting would) — so this writes the line directly with `write!`
//! rather than pulling in a CSV-writing crate.

use std::fmt::Write as _;

use crate::policing::{PolicingParams, ResultCode};

pub struct DetectionRow<'a> {
    pub input_filename: &'a str,
    pub flow_index: usize,
    pub segment_index: usize,
    pub direction: Direction,
    pub num_data_packets: u64,
    pub num_losses: u64,
    /// One `(cutoff, params)` pair per cutoff value the driver evaluated,
    /// in the order they should appear on the line.
    pub results: &'a [(usize, PolicingParams)],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AtoB,
    BtoA,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::AtoB => write!(f, "a2b"),
            Direction::BtoA => write!(f, "b2a"),
        }
    }
}

/// Renders one detection row as
/// `<file>,<flow>,<segment>,<direction>,<data packets>,<losses>,<is_policed>,<params>...`.
pub fn format_row(row: &DetectionRow) -> String {
    let mut line = String::new();
    write!(
        line,
        "{},{},{},{},{},{}",
        row.input_filename,
        row.flow_index,
        row.segment_index,
        row.direction,
        row.num_data_packets,
        row.num_losses,
    )
    .expect("writing to a String never fails");

    for (_, params) in row.results {
        let verdict = if params.result_code == ResultCode::Ok {
            "True"
        } else {
            "False"
        };
        write!(line, ",{},{}", verdict, params).unwrap();
    }

    line
}
