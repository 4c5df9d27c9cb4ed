//! Command line definition

use clap::{Args, Parser, Subcommand};

use modbuster::config::{Settings, SettingsError};
use modbuster::diag::DisruptiveOp;

const EXAMPLES: &str = "\
Examples:
    modbuster read -s 1 127.0.0.1 400001 10
    modbuster write 127.0.0.1 400231 11 22 33 44 55
    modbuster getfunctions 127.0.0.1
    modbuster diag --clear-counter 127.0.0.1";

#[derive(Debug, Parser)]
#[command(
    name = "modbuster",
    version,
    about = "Busting ICS/SCADA over modbus",
    after_help = EXAMPLES
)]
pub struct Cli {
    /// Slave ID (default: 0)
    #[arg(short, long, global = true, env = "MODBUSTER_UNIT_ID")]
    pub slave: Option<u8>,

    /// Port to connect to (default: 502)
    #[arg(short, long, global = true, env = "MODBUSTER_PORT")]
    pub port: Option<u16>,

    /// Receive timeout per request in milliseconds (default: 2000)
    #[arg(long, global = true, env = "MODBUSTER_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read registers or coils
    Read {
        /// Modbus server host (IP address or hostname)
        host: String,
        /// Modbus address to read from (e.g. 400001)
        #[arg(allow_negative_numbers = true)]
        address: i64,
        /// Number of registers/coils to read
        count: usize,
    },
    /// Write holding registers or coils
    Write {
        /// Modbus server host (IP address or hostname)
        host: String,
        /// Modbus address to write to (e.g. 400001)
        #[arg(allow_negative_numbers = true)]
        address: i64,
        /// Values to write
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        values: Vec<String>,
    },
    /// Get supported Modbus function codes
    Getfunctions {
        /// Modbus server host (IP address or hostname)
        host: String,
    },
    /// Run serial line diagnostics
    Diag {
        /// Modbus server host (IP address or hostname)
        host: String,
        #[command(flatten)]
        flags: DangerousFlags,
    },
}

/// Disruptive operations; any of these skips the regular diagnostics
#[derive(Debug, Args)]
pub struct DangerousFlags {
    /// Restart communications and clear the event log
    #[arg(long)]
    pub restart_comm: bool,
    /// Force the device into listen-only mode
    #[arg(long)]
    pub force_listen_only: bool,
    /// Clear counters and the diagnostic register
    #[arg(long)]
    pub clear_counter: bool,
    /// Clear the overrun counter and flag
    #[arg(long)]
    pub clear_overrun: bool,
    /// Get/clear Modbus Plus statistics
    #[arg(long)]
    pub getclear_res: bool,
}

impl DangerousFlags {
    pub fn selected(&self) -> Vec<DisruptiveOp> {
        [
            (self.restart_comm, DisruptiveOp::RestartComm),
            (self.force_listen_only, DisruptiveOp::ForceListenOnly),
            (self.clear_counter, DisruptiveOp::ClearCounters),
            (self.clear_overrun, DisruptiveOp::ClearOverrun),
            (self.getclear_res, DisruptiveOp::GetClearModbusPlus),
        ]
        .into_iter()
        .filter_map(|(set, op)| set.then_some(op))
        .collect()
    }
}

impl Cli {
    /// Apply command line overrides on top of loaded settings
    pub fn apply(&self, mut settings: Settings) -> Result<Settings, SettingsError> {
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(slave) = self.slave {
            settings.unit_id = slave;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.timeout_ms = timeout_ms;
        }
        settings.validate()
    }
}
