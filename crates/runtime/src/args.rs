//! Command line options forwarded by the gateway host.

use clap::Parser;
use std::net::SocketAddr;

/// Runtime options of the device control core.
///
/// The host process forwards its argv; unknown host options should be
/// stripped before parsing.
#[derive(Parser, Debug, Clone)]
#[command(name = "zigbridge")]
#[command(version, about = "Zigbee gateway device control core", long_about = None)]
pub struct RuntimeArgs {
    /// Enable the managed control path for applicable devices
    /// (non-zero enables; devices keep legacy handling otherwise).
    #[arg(long = "dev-managed", default_value_t = 0)]
    pub dev_managed: i64,

    /// Log level filter (RUST_LOG takes precedence).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Prometheus metrics listen address, e.g. 127.0.0.1:9090.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl RuntimeArgs {
    /// The process-wide managed gate, captured once at startup.
    pub fn managed(&self) -> bool {
        self.dev_managed != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_gate_follows_the_numeric_argument() {
        let args = RuntimeArgs::parse_from(["zigbridge"]);
        assert!(!args.managed());

        let args = RuntimeArgs::parse_from(["zigbridge", "--dev-managed", "1"]);
        assert!(args.managed());

        let args = RuntimeArgs::parse_from(["zigbridge", "--dev-managed", "0"]);
        assert!(!args.managed());
    }

    #[test]
    fn metrics_addr_is_optional() {
        let args =
            RuntimeArgs::parse_from(["zigbridge", "--metrics-addr", "127.0.0.1:9090"]);
        assert!(args.metrics_addr.is_some());
    }
}
