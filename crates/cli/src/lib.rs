pub mod app;
pub mod subcommands;
mod transport;

use clap::{ArgMatches, Command};

pub use app::App;

pub fn get_subcommands() -> Vec<Command> {
    vec![
        subcommands::repository::cli(),
        subcommands::snapshot::cli(),
        subcommands::view::cli(),
        subcommands::publish::cli(),
        subcommands::pool::cli(),
        subcommands::database::cli(),
    ]
}

pub async fn exec_subcommand(config_path: &std::path::Path, cmd: &str, args: &ArgMatches) -> anyhow::Result<()> {
    match cmd {
        "repository" => subcommands::repository::exec(config_path, args).await,
        "snapshot" => subcommands::snapshot::exec(config_path, args).await,
        "view" => subcommands::view::exec(config_path, args).await,
        "publish" => subcommands::publish::exec(config_path, args).await,
        "pool" => subcommands::pool::exec(config_path, args).await,
        "database" => subcommands::database::exec(config_path, args).await,
        unknown => Err(anyhow::anyhow!("invalid subcommand: {unknown}")),
    }
}
