//! `rbutils list-services`

use std::path::Path;

use booster_service::BoosterConfig;
use clap::Args;
use serde::Serialize;

use crate::exit_codes;

#[derive(Debug, Args)]
pub struct ListServicesArgs {
    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ServiceSummary<'a> {
    name: &'a str,
    kind: &'static str,
    projects: Vec<&'a str>,
}

pub fn run_list_services(args: ListServicesArgs, config_path: Option<&Path>) -> i32 {
    let config = match BoosterConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return exit_codes::ENVIRONMENT_ERROR;
        }
    };

    let services: Vec<ServiceSummary<'_>> = config
        .services
        .iter()
        .map(|(name, service)| ServiceSummary {
            name: name.as_str(),
            kind: service.kind.as_str(),
            projects: service.projects.keys().map(String::as_str).collect(),
        })
        .collect();

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&services).unwrap_or_default()
        );
    } else if services.is_empty() {
        println!("No services configured");
    } else {
        for s in &services {
            println!("{}\t{}\t{}", s.name, s.kind, s.projects.join(","));
        }
    }
    exit_codes::SUCCESS
}
