use clap::{Parser, Subcommand};

/// Talk to a jobserver over gRPC
#[derive(Debug, Parser)]
#[clap(name = "jobctl")]
pub struct ArgParser {
    /// The address of the server
    #[clap(
        short = 's',
        long = "server",
        env = "JOBCTL_SERVER",
        default_value = "http://[::1]:50051"
    )]
    pub server: String,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Subcommand)]
pub enum SubCommand {
    /// start a new job
    Create {
        /// unique name for the job
        name: String,

        /// name of the command to run
        command: String,

        #[clap(long, default_value = "", allow_hyphen_values = true)]
        /// space-delimited args to the command
        args: String,

        #[clap(long)]
        /// seconds before the job is killed
        timeout: u64,
    },
    /// kill a job if it is running and forget it
    Delete {
        name: String,
    },
    /// kill a running job
    Kill {
        name: String,
    },
    /// show a job's status and details
    Status {
        name: String,
    },
    /// list all jobs
    List,
    /// print everything a job has written so far
    Output {
        name: String,
    },
    /// follow a job's output until it finishes
    Stream {
        name: String,

        #[clap(long)]
        /// print output written before the stream was opened too
        from_start: bool,
    },
    /// check that the server is up
    Health,
}
