use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::coordinator::{OverflowPolicy, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat relay, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Messages buffered per client before the overflow policy applies.
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    pub outbox_capacity: u32,

    /// What to do when a client's outbox is full.
    #[arg(long, value_enum, default_value_t = OverflowArg::Block)]
    pub overflow: OverflowArg,
}

/// Command-line spelling of [`OverflowPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverflowArg {
    /// Wait for a full outbox to drain. One stalled client stalls every broadcast.
    Block,
    /// Skip the message for a client whose outbox is full.
    Drop,
}

impl From<OverflowArg> for OverflowPolicy {
    fn from(arg: OverflowArg) -> Self {
        match arg {
            OverflowArg::Block => OverflowPolicy::Block,
            OverflowArg::Drop => OverflowPolicy::Drop,
        }
    }
}

impl ServerArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            outbox_capacity: self.outbox_capacity as usize,
            overflow: self.overflow.into(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: SocketAddr,
}
