//! `packmirror repository ...`: inspect configured repositories, run a
//! sync, preview what a sync would do, and review past sync runs.

use clap::{Arg, ArgMatches, Command};
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::App;

pub fn cli() -> Command {
    Command::new("repository")
        .about("Inspect and sync configured repositories")
        .subcommand_required(true)
        .subcommand(Command::new("list").about("List configured repositories"))
        .subcommand(
            Command::new("show")
                .about("Show a repository's detail and linked item count")
                .arg(Arg::new("id").required(true)),
        )
        .subcommand(
            Command::new("sync")
                .about("Sync a repository against its upstream feed")
                .arg(Arg::new("id").required(true)),
        )
        .subcommand(
            Command::new("check-updates")
                .about("Diff upstream against what is linked, without downloading anything")
                .arg(Arg::new("id").required(true)),
        )
        .subcommand(
            Command::new("history")
                .about("List past sync runs for a repository")
                .arg(Arg::new("id").required(true)),
        )
}

pub async fn exec(config_path: &std::path::Path, args: &ArgMatches) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    match args.subcommand() {
        Some(("list", _)) => list(&app),
        Some(("show", sub)) => show(&app, sub.get_one::<String>("id").unwrap()),
        Some(("sync", sub)) => sync(&app, sub.get_one::<String>("id").unwrap()).await,
        Some(("check-updates", sub)) => check_updates(&app, sub.get_one::<String>("id").unwrap()).await,
        Some(("history", sub)) => history(&app, sub.get_one::<String>("id").unwrap()),
        _ => Err(anyhow::anyhow!("missing subcommand; try `packmirror repository --help`")),
    }
}

#[derive(Tabled)]
struct RepoRow {
    id: String,
    #[tabled(rename = "type")]
    repo_type: String,
    feed: String,
    mode: String,
    enabled: bool,
    #[tabled(rename = "last sync")]
    last_sync: String,
}

fn list(app: &App) -> anyhow::Result<()> {
    let repos = app.metastore.list_repositories()?;
    if repos.is_empty() {
        println!("No repositories configured.");
        return Ok(());
    }
    let rows: Vec<RepoRow> = repos
        .into_iter()
        .map(|r| RepoRow {
            id: r.id,
            repo_type: r.repo_type,
            feed: r.feed_url,
            mode: r.mode.as_str().to_string(),
            enabled: r.enabled,
            last_sync: r.last_sync_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    print_table(rows);
    Ok(())
}

fn show(app: &App, id: &str) -> anyhow::Result<()> {
    let repo = app
        .metastore
        .get_repository(id)?
        .ok_or_else(|| anyhow::anyhow!("no repository {id:?} in the database; run sync at least once or check the config"))?;
    let items = app.metastore.list_repository_content(id)?;
    println!("id:          {}", repo.id);
    println!("type:        {}", repo.repo_type);
    println!("feed:        {}", repo.feed_url);
    println!("mode:        {}", repo.mode.as_str());
    println!("enabled:     {}", repo.enabled);
    println!(
        "last sync:   {}",
        repo.last_sync_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
    );
    println!("linked items: {}", items.len());
    Ok(())
}

async fn sync(app: &App, id: &str) -> anyhow::Result<()> {
    let repo = app.repository(id)?.clone();
    app.metastore.upsert_repository(&packmirror_metastore::Repository {
        id: repo.id.clone(),
        name: repo.id.clone(),
        repo_type: repo.repo_type.clone(),
        feed_url: repo.feed.clone(),
        enabled: repo.enabled,
        mode: if repo.is_mirror() {
            packmirror_metastore::RepoMode::Mirror
        } else {
            packmirror_metastore::RepoMode::Filtered
        },
        last_sync_at: None,
    })?;

    let plugin = app.build_plugin(&repo)?;
    let sync_config = app.sync_repo_config(&repo);
    let cancel = tokio_util::sync::CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        })
    };

    let summary = app
        .sync_engine
        .sync_repository(plugin.as_ref(), &sync_config, &cancel)
        .await?;
    ctrl_c.abort();

    println!("{summary}");
    for failure in &summary.failures {
        println!("  failed: {failure}");
    }
    if !summary.failures.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

#[derive(Tabled)]
struct NeededRow {
    name: String,
    version: String,
    arch: String,
}

async fn check_updates(app: &App, id: &str) -> anyhow::Result<()> {
    let repo = app.repository(id)?.clone();
    let plugin = app.build_plugin(&repo)?;
    let sync_config = app.sync_repo_config(&repo);

    let plan = app.sync_engine.check_updates(plugin.as_ref(), &sync_config).await?;
    println!(
        "present={} pool_hits={} needed={}",
        plan.present,
        plan.pool_hits,
        plan.needed.len()
    );
    if !plan.needed.is_empty() {
        let rows: Vec<NeededRow> = plan
            .needed
            .into_iter()
            .map(|c| NeededRow {
                name: c.name,
                version: c.version,
                arch: c.arch.unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        print_table(rows);
    }
    Ok(())
}

#[derive(Tabled)]
struct SyncRunRow {
    id: i64,
    started: String,
    status: String,
    downloaded: i64,
    skipped: i64,
    failed: i64,
    bytes: i64,
}

fn history(app: &App, id: &str) -> anyhow::Result<()> {
    let runs = app.metastore.list_sync_runs(id)?;
    if runs.is_empty() {
        println!("No sync runs recorded for {id}.");
        return Ok(());
    }
    let rows: Vec<SyncRunRow> = runs
        .into_iter()
        .map(|r| SyncRunRow {
            id: r.id,
            started: r.started_at.to_rfc3339(),
            status: r.status.as_str().to_string(),
            downloaded: r.downloaded,
            skipped: r.skipped,
            failed: r.failed,
            bytes: r.bytes_transferred,
        })
        .collect();
    print_table(rows);
    Ok(())
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::psql()).with(Modify::new(Columns::first()).with(Alignment::left()));
    println!("{table}");
}
