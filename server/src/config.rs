use clap::{ArgEnum, Parser};
use joblib::{BroadcastConfig, OverflowPolicy, SupervisorConfig};
use std::{net::SocketAddr, time::Duration};

/// Run commands for remote clients and stream their output over gRPC
#[derive(Debug, Parser)]
#[clap(name = "jobserver")]
pub struct ServerConfig {
    /// Address to listen on
    #[clap(long, env = "JOBSERVER_LISTEN", default_value = "[::1]:50051")]
    pub listen: SocketAddr,

    /// Output chunks buffered per stream subscriber
    #[clap(long, env = "JOBSERVER_SUBSCRIBER_CAPACITY", default_value_t = 64)]
    pub subscriber_capacity: usize,

    /// What to do with a subscriber whose buffer is full
    #[clap(long, arg_enum, env = "JOBSERVER_OVERFLOW", default_value = "disconnect")]
    pub overflow: Overflow,

    /// How long to wait for a finished job's output pipes to close, in milliseconds
    #[clap(long, env = "JOBSERVER_DRAIN_GRACE_MS", default_value_t = 2000)]
    pub drain_grace_ms: u64,

    /// Log filter, e.g. "info" or "joblib=debug,jobserver=info"
    #[clap(long, env = "JOBSERVER_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum)]
pub enum Overflow {
    /// disconnect subscribers that fall behind
    Disconnect,
    /// make the job wait for slow subscribers
    Block,
}

impl ServerConfig {
    pub fn supervisor(&self) -> SupervisorConfig {
        let overflow = match self.overflow {
            Overflow::Disconnect => OverflowPolicy::Disconnect,
            Overflow::Block => OverflowPolicy::Block,
        };
        SupervisorConfig {
            broadcast: BroadcastConfig {
                subscriber_capacity: self.subscriber_capacity.max(1),
                overflow,
            },
            drain_grace: Duration::from_millis(self.drain_grace_ms),
        }
    }
}
