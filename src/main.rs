mod actions;
mod cli;
mod compare;
mod config;
mod cross_seed;
mod database;
mod error;
mod hash;
mod hash_cache;
mod orphans;
mod remote;
mod reports;
mod retention;
mod scanner;
mod schema;
mod utils;

use log::error;

use crate::cli::Cli;

fn main() {
    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
