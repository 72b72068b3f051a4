//! `packmirror database ...`: schema lifecycle and a few aggregate
//! stats that don't belong to any one repository.

use clap::{ArgMatches, Command};

use crate::App;

pub fn cli() -> Command {
    Command::new("database")
        .about("Manage the metadata database")
        .subcommand_required(true)
        .subcommand(Command::new("init").about("Open the database, creating it and its schema if needed"))
        .subcommand(Command::new("upgrade").about("Apply any pending schema migrations"))
        .subcommand(Command::new("status").about("Show the current schema version and repository count"))
        .subcommand(Command::new("stats").about("Show aggregate counts across repositories, content items, and snapshots"))
}

pub async fn exec(config_path: &std::path::Path, args: &ArgMatches) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    match args.subcommand() {
        Some(("init", _)) => init(&app),
        Some(("upgrade", _)) => upgrade(&app),
        Some(("status", _)) => status(&app),
        Some(("stats", _)) => stats(&app),
        _ => Err(anyhow::anyhow!("missing subcommand; try `packmirror database --help`")),
    }
}

fn init(app: &App) -> anyhow::Result<()> {
    let version = app.metastore.schema_version()?;
    println!("database ready at schema version {version}");
    Ok(())
}

fn upgrade(app: &App) -> anyhow::Result<()> {
    let before = app.metastore.schema_version()?;
    let after = app.metastore.upgrade_schema()?;
    if after > before {
        println!("upgraded schema from version {before} to {after}");
    } else {
        println!("schema already at version {after}; nothing to do");
    }
    Ok(())
}

fn status(app: &App) -> anyhow::Result<()> {
    let version = app.metastore.schema_version()?;
    let repos = app.metastore.list_repositories()?;
    println!("schema version: {version}");
    println!("repositories:    {}", repos.len());
    Ok(())
}

fn stats(app: &App) -> anyhow::Result<()> {
    let repos = app.metastore.list_repositories()?;
    let mut content_items = 0usize;
    let mut snapshots = 0usize;
    for repo in &repos {
        content_items += app.metastore.list_repository_content(&repo.id)?.len();
        snapshots += app.metastore.list_snapshots(&repo.id)?.len();
    }
    let live = app.metastore.live_sha256s()?;
    println!("repositories:      {}", repos.len());
    println!("linked items:      {content_items}");
    println!("snapshots:         {snapshots}");
    println!("live pool objects: {}", live.len());
    Ok(())
}
