//! `packmirror snapshot ...`: freeze, inspect, copy and delete named
//! snapshots of a repository's current linked content.

use clap::{Arg, ArgMatches, Command};
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::App;

pub fn cli() -> Command {
    Command::new("snapshot")
        .about("Manage named snapshots of a repository's content")
        .subcommand_required(true)
        .subcommand(
            Command::new("create")
                .about("Freeze a repository's currently linked content into a named snapshot")
                .arg(Arg::new("repo").required(true))
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("description").long("description").short('d')),
        )
        .subcommand(
            Command::new("list")
                .about("List snapshots for a repository")
                .arg(Arg::new("repo").required(true)),
        )
        .subcommand(
            Command::new("show")
                .about("Show a snapshot and its content")
                .arg(Arg::new("repo").required(true))
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("diff")
                .about("Diff two snapshots of the same repository")
                .arg(Arg::new("repo").required(true))
                .arg(Arg::new("a").required(true))
                .arg(Arg::new("b").required(true)),
        )
        .subcommand(
            Command::new("copy")
                .about("Copy a snapshot to a new name")
                .arg(Arg::new("repo").required(true))
                .arg(Arg::new("src").required(true))
                .arg(Arg::new("dst").required(true)),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a named snapshot")
                .arg(Arg::new("repo").required(true))
                .arg(Arg::new("name").required(true)),
        )
}

pub async fn exec(config_path: &std::path::Path, args: &ArgMatches) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    match args.subcommand() {
        Some(("create", sub)) => create(&app, sub),
        Some(("list", sub)) => list(&app, sub.get_one::<String>("repo").unwrap()),
        Some(("show", sub)) => show(&app, sub.get_one::<String>("repo").unwrap(), sub.get_one::<String>("name").unwrap()),
        Some(("diff", sub)) => diff(
            &app,
            sub.get_one::<String>("repo").unwrap(),
            sub.get_one::<String>("a").unwrap(),
            sub.get_one::<String>("b").unwrap(),
        ),
        Some(("copy", sub)) => copy(
            &app,
            sub.get_one::<String>("repo").unwrap(),
            sub.get_one::<String>("src").unwrap(),
            sub.get_one::<String>("dst").unwrap(),
        ),
        Some(("delete", sub)) => delete(&app, sub.get_one::<String>("repo").unwrap(), sub.get_one::<String>("name").unwrap()),
        _ => Err(anyhow::anyhow!("missing subcommand; try `packmirror snapshot --help`")),
    }
}

fn create(app: &App, sub: &ArgMatches) -> anyhow::Result<()> {
    let repo = sub.get_one::<String>("repo").unwrap();
    let name = sub.get_one::<String>("name").unwrap();
    let description = sub.get_one::<String>("description").map(|s| s.as_str());
    let snap = app.snapshot_manager.create(repo, name, description)?;
    println!(
        "created snapshot {:?} for {repo} ({} items, {} bytes)",
        snap.name, snap.package_count, snap.total_size_bytes
    );
    Ok(())
}

#[derive(Tabled)]
struct SnapshotRow {
    name: String,
    created: String,
    items: i64,
    bytes: i64,
}

fn list(app: &App, repo: &str) -> anyhow::Result<()> {
    let snapshots = app.snapshot_manager.list(repo)?;
    if snapshots.is_empty() {
        println!("No snapshots recorded for {repo}.");
        return Ok(());
    }
    let rows: Vec<SnapshotRow> = snapshots
        .into_iter()
        .map(|s| SnapshotRow {
            name: s.name,
            created: s.created_at.to_rfc3339(),
            items: s.package_count,
            bytes: s.total_size_bytes,
        })
        .collect();
    print_table(rows);
    Ok(())
}

#[derive(Tabled)]
struct ContentRow {
    name: String,
    version: String,
    filename: String,
    sha256: String,
}

fn show(app: &App, repo: &str, name: &str) -> anyhow::Result<()> {
    let snap = app
        .snapshot_manager
        .get(repo, name)?
        .ok_or_else(|| anyhow::anyhow!("no snapshot {name:?} for repository {repo:?}"))?;
    println!("name:        {}", snap.name);
    println!("repository:  {}", snap.repository_id);
    println!("created:     {}", snap.created_at.to_rfc3339());
    println!("items:       {}", snap.package_count);
    println!("total bytes: {}", snap.total_size_bytes);
    if let Some(d) = &snap.description {
        println!("description: {d}");
    }
    let content = app.snapshot_manager.content(snap.id)?;
    let rows: Vec<ContentRow> = content
        .into_iter()
        .map(|c| ContentRow {
            name: c.name,
            version: c.version,
            filename: c.filename,
            sha256: c.sha256.chars().take(12).collect(),
        })
        .collect();
    print_table(rows);
    Ok(())
}

fn diff(app: &App, repo: &str, a: &str, b: &str) -> anyhow::Result<()> {
    let snap_a = app
        .snapshot_manager
        .get(repo, a)?
        .ok_or_else(|| anyhow::anyhow!("no snapshot {a:?} for repository {repo:?}"))?;
    let snap_b = app
        .snapshot_manager
        .get(repo, b)?
        .ok_or_else(|| anyhow::anyhow!("no snapshot {b:?} for repository {repo:?}"))?;
    let d = app.snapshot_manager.diff(snap_a.id, snap_b.id)?;
    for name in &d.added {
        println!("+ {name}");
    }
    for name in &d.removed {
        println!("- {name}");
    }
    for (name, from, to) in &d.updated {
        println!("~ {name}: {from} -> {to}");
    }
    if d.added.is_empty() && d.removed.is_empty() && d.updated.is_empty() {
        println!("{a} and {b} are identical.");
    }
    Ok(())
}

fn copy(app: &App, repo: &str, src: &str, dst: &str) -> anyhow::Result<()> {
    let snap = app.snapshot_manager.copy(repo, src, dst)?;
    println!("copied {src:?} to {dst:?} ({} items)", snap.package_count);
    Ok(())
}

fn delete(app: &App, repo: &str, name: &str) -> anyhow::Result<()> {
    app.snapshot_manager.delete(repo, name)?;
    println!("deleted snapshot {name:?} for {repo:?}");
    Ok(())
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::psql()).with(Modify::new(Columns::first()).with(Alignment::left()));
    println!("{table}");
}
