use std::path::PathBuf;

use clap::{Arg, Command};
use packmirror_cli::{exec_subcommand, get_subcommands};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let matches = get_command().get_matches();
    let config_path = PathBuf::from(matches.get_one::<String>("config").unwrap());
    let (cmd, args) = matches
        .subcommand()
        .ok_or_else(|| anyhow::anyhow!("missing subcommand; try `packmirror --help`"))?;

    if let Err(e) = exec_subcommand(&config_path, cmd, args).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn get_command() -> Command {
    Command::new("packmirror")
        .about("Offline package repository mirror")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .default_value("packmirror.yaml")
                .help("Path to the root configuration file"),
        )
        .subcommands(get_subcommands())
}
