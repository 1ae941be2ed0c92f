mod arg_parser;
mod client_cli;

use arg_parser::{ArgParser, SubCommand};
use client_cli::ClientCli;

use clap::Parser;
use std::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn error::Error>> {
    let args = ArgParser::parse();
    let mut client = ClientCli::connect(&args.server).await?;

    match args.sub_command {
        SubCommand::Create {
            name,
            command,
            args,
            timeout,
        } => {
            client.create_job(&name, &command, &args, timeout).await?;
        }
        SubCommand::Delete { name } => {
            client.delete_job(&name).await?;
        }
        SubCommand::Kill { name } => {
            client.kill_job(&name).await?;
        }
        SubCommand::Status { name } => {
            client.query_status(&name).await?;
        }
        SubCommand::List => {
            client.list_jobs().await?;
        }
        SubCommand::Output { name } => {
            client.output(&name).await?;
        }
        SubCommand::Stream { name, from_start } => {
            client.stream_output(&name, from_start).await?;
        }
        SubCommand::Health => {
            client.health().await?;
        }
    }

    Ok(())
}
