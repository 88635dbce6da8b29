mod cli;
mod config;
mod feed;
mod harvest;
mod http;
mod imagery;
mod logging;
mod model;
mod publish;
mod storage;

use std::process;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
