use std::error::Error;
use std::process::ExitCode;

use apipie_client::cli::{bootstrap_command, build_commands, config_from_matches, dispatch, CliConfig};
use apipie_client::{Api, CliError};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let config = CliConfig::new("apipie", "Call any Apipie-described API");

    // The command tree depends on the apidoc, so the connection flags are
    // parsed on their own first.
    let mut bootstrap_cmd = bootstrap_command(&config);
    let bootstrap = bootstrap_cmd.clone().get_matches();
    if bootstrap.get_one::<String>("uri").is_none() {
        println!("{}", bootstrap_cmd.render_help());
        if bootstrap.get_flag("help") {
            return Ok(());
        }
        return Err(CliError::MissingArgument("uri"));
    }
    let api = Api::new(config_from_matches(&bootstrap)?)?;
    let doc = api.apidoc()?;

    let matches = build_commands(&config, &doc).get_matches();

    if let Some(result) = dispatch(&api, &matches)? {
        let pretty = serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
        println!("{pretty}");
    }
    Ok(())
}
