use booster_cli::Cli;
use booster_cli::exit_codes;
use clap::Parser;

fn main() {
    let cli = Cli::parse();

    let guard = match booster_cli::logging::init(cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            std::process::exit(exit_codes::ENVIRONMENT_ERROR);
        }
    };

    let code = cli.run();
    // process::exit skips destructors; flush the file log first.
    drop(guard);
    std::process::exit(code);
}
