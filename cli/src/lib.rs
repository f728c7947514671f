//! `rbutils`: administrative commands for REDCap Booster
//!
//! ## Commands
//!
//! - `rbutils list-services` - Show configured services and their kinds
//! - `rbutils id-gen ...` - Manage identifier pools (see [`idgen_cmd`])

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod idgen_cmd;
pub mod logging;
pub mod services_cmd;

pub use idgen_cmd::{IdGenCli, exit_codes};
pub use services_cmd::ListServicesArgs;

#[derive(Debug, Parser)]
#[command(name = "rbutils", version, about = "REDCap Booster utilities")]
pub struct Cli {
    /// Configuration file (defaults to $BOOSTER_CONFIG or
    /// ~/.config/redcap-booster/booster.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Also write an info-level log to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List configured services
    ListServices(ListServicesArgs),

    /// Manage identifier pools
    #[command(name = "id-gen")]
    IdGen(IdGenCli),
}

impl Cli {
    pub fn run(self) -> i32 {
        let config = self.config.as_deref();
        match self.command {
            Command::ListServices(args) => services_cmd::run_list_services(args, config),
            Command::IdGen(cli) => cli.run(config),
        }
    }
}
