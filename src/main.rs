mod cli;
mod config;
mod engine;
mod error;
mod factorio;
mod inventory;
mod logging;
mod merger;
mod portal;
mod scanner;
mod setup;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
