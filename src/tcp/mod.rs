pub mod options;

pub use options::{get_sacks, tcp_data_len, tcp_mss, tcp_mss_estimate, parse_options, TcpOption};
