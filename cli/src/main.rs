//! kforward binary
//!
//! Reconciles one port-forward and prints the result document on stdout.
//! Exits with status 1 when the document reports a failure.

#![allow(unused_crate_dependencies)]

use clap::Parser;
use cli::Cli;
use kforward_core::utils::init_tracing;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if cli.print_schema {
        match cli::arguments_schema() {
            Ok(schema) => println!("{}", schema),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = init_tracing(&cli.log_level) {
        eprintln!("kforward: {}", e);
    }

    let output = cli::execute(&cli).await;

    match serde_json::to_string(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to serialize result: {}", e);
            std::process::exit(1);
        }
    }

    if output.is_failure() {
        std::process::exit(1);
    }
}
