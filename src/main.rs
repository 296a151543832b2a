use std::process::ExitCode;

use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    sumac_lib::run(sumac_lib::Cli::parse()).await
}
