//! `packmirror view ...`: views are named groupings of repositories
//! defined purely in config, used by `publish view` to publish several
//! repositories under one combined output tree.

use clap::{Arg, ArgMatches, Command};
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::App;

pub fn cli() -> Command {
    Command::new("view")
        .about("Inspect configured views")
        .subcommand_required(true)
        .subcommand(Command::new("list").about("List configured views"))
        .subcommand(
            Command::new("show")
                .about("Show a view's member repositories")
                .arg(Arg::new("name").required(true)),
        )
}

pub async fn exec(config_path: &std::path::Path, args: &ArgMatches) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    match args.subcommand() {
        Some(("list", _)) => list(&app),
        Some(("show", sub)) => show(&app, sub.get_one::<String>("name").unwrap()),
        _ => Err(anyhow::anyhow!("missing subcommand; try `packmirror view --help`")),
    }
}

#[derive(Tabled)]
struct ViewRow {
    name: String,
    #[tabled(rename = "repository count")]
    repo_count: usize,
}

fn list(app: &App) -> anyhow::Result<()> {
    if app.config.views.is_empty() {
        println!("No views configured.");
        return Ok(());
    }
    let rows: Vec<ViewRow> = app
        .config
        .views
        .iter()
        .map(|v| ViewRow {
            name: v.name.clone(),
            repo_count: v.repos.len(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::psql()).with(Modify::new(Columns::first()).with(Alignment::left()));
    println!("{table}");
    Ok(())
}

fn show(app: &App, name: &str) -> anyhow::Result<()> {
    let view = app
        .config
        .views
        .iter()
        .find(|v| v.name == name)
        .ok_or_else(|| anyhow::anyhow!("no view configured with name {name:?}"))?;
    println!("name: {}", view.name);
    println!("members:");
    for repo_id in &view.repos {
        let marker = if app.config.repositories.iter().any(|r| &r.id == repo_id) {
            ""
        } else {
            " (not configured!)"
        };
        println!("  - {repo_id}{marker}");
    }
    Ok(())
}
