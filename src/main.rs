// src/main.rs

use avocado::{cli, exit_codes, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    // Runners write status messages on stdout and keep stderr quiet.
    let default_level = if args.command.is_runner() {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    let sink = match logging::init_logging(args.log_level, default_level) {
        Ok(sink) => sink,
        Err(err) => {
            eprintln!("avocado error: {err:?}");
            std::process::exit(exit_codes::GENERIC_CRASH);
        }
    };

    let code = match run(args, sink).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("avocado error: {err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}
