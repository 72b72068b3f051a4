//! `packmirror publish ...`: materialize a repository, snapshot, view,
//! or view-snapshot onto disk under `storage.published_path`.

use std::path::PathBuf;

use clap::{Arg, ArgMatches, Command};
use packmirror_publish::PluginRegistry;

use crate::App;

pub fn cli() -> Command {
    Command::new("publish")
        .about("Materialize repository content onto disk")
        .subcommand_required(true)
        .subcommand(
            Command::new("repo")
                .about("Publish a repository's currently linked content")
                .arg(Arg::new("id").required(true))
                .arg(Arg::new("out").long("out").short('o')),
        )
        .subcommand(
            Command::new("snapshot")
                .about("Publish a named snapshot of a repository")
                .arg(Arg::new("id").required(true))
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("out").long("out").short('o')),
        )
        .subcommand(
            Command::new("view")
                .about("Publish every member repository of a view")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("out").long("out").short('o')),
        )
}

pub async fn exec(config_path: &std::path::Path, args: &ArgMatches) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    match args.subcommand() {
        Some(("repo", sub)) => publish_repo(&app, sub).await,
        Some(("snapshot", sub)) => publish_snapshot(&app, sub).await,
        Some(("view", sub)) => publish_view(&app, sub).await,
        _ => Err(anyhow::anyhow!("missing subcommand; try `packmirror publish --help`")),
    }
}

async fn publish_repo(app: &App, sub: &ArgMatches) -> anyhow::Result<()> {
    let id = sub.get_one::<String>("id").unwrap();
    let repo = app.repository(id)?.clone();
    let target = resolve_out(app, sub, id);

    let plugin = app.build_plugin(&repo)?;
    let mut registry = PluginRegistry::new();
    registry.register(plugin.as_ref());

    app.publisher.publish_repository(id, &target, &registry).await?;
    println!("published {id} to {}", target.display());
    Ok(())
}

async fn publish_snapshot(app: &App, sub: &ArgMatches) -> anyhow::Result<()> {
    let id = sub.get_one::<String>("id").unwrap();
    let name = sub.get_one::<String>("name").unwrap();
    let repo = app.repository(id)?.clone();
    let target = resolve_out(app, sub, &format!("{id}-{name}"));

    let plugin = app.build_plugin(&repo)?;
    let mut registry = PluginRegistry::new();
    registry.register(plugin.as_ref());

    app.publisher.publish_snapshot(id, name, &target, &registry).await?;
    println!("published snapshot {name:?} of {id} to {}", target.display());
    Ok(())
}

async fn publish_view(app: &App, sub: &ArgMatches) -> anyhow::Result<()> {
    let name = sub.get_one::<String>("name").unwrap();
    let view = app
        .config
        .views
        .iter()
        .find(|v| &v.name == name)
        .ok_or_else(|| anyhow::anyhow!("no view configured with name {name:?}"))?
        .clone();
    let target = resolve_out(app, sub, name);

    let plugins: Vec<_> = view
        .repos
        .iter()
        .map(|repo_id| app.build_plugin(app.repository(repo_id)?))
        .collect::<anyhow::Result<_>>()?;
    let mut registry = PluginRegistry::new();
    for plugin in &plugins {
        registry.register(plugin.as_ref());
    }

    app.publisher.publish_view(&view.repos, &target, &registry).await?;
    println!("published view {name} ({} members) to {}", view.repos.len(), target.display());
    Ok(())
}

fn resolve_out(app: &App, sub: &ArgMatches, default_name: &str) -> PathBuf {
    match sub.get_one::<String>("out") {
        Some(out) => PathBuf::from(out),
        None => app.config.storage.published_path().join(default_name),
    }
}
