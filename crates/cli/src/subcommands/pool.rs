//! `packmirror pool ...`: inspect and maintain the content-addressed
//! byte store that backs every repository, snapshot and view.

use clap::{ArgMatches, Command};

use crate::App;

pub fn cli() -> Command {
    Command::new("pool")
        .about("Inspect and maintain the content pool")
        .subcommand_required(true)
        .subcommand(Command::new("stats").about("Show pool root and live object count"))
        .subcommand(Command::new("verify").about("Recompute every pool object's checksum"))
        .subcommand(Command::new("cleanup").about("Remove pool objects no longer referenced by any repository, snapshot, or view"))
}

pub async fn exec(config_path: &std::path::Path, args: &ArgMatches) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    match args.subcommand() {
        Some(("stats", _)) => stats(&app),
        Some(("verify", _)) => verify(&app),
        Some(("cleanup", _)) => cleanup(&app),
        _ => Err(anyhow::anyhow!("missing subcommand; try `packmirror pool --help`")),
    }
}

fn stats(app: &App) -> anyhow::Result<()> {
    let live = app.metastore.live_sha256s()?;
    println!("root:           {}", app.pool.root().display());
    println!("live objects:   {}", live.len());
    Ok(())
}

fn verify(app: &App) -> anyhow::Result<()> {
    let report = app.pool.verify()?;
    println!("checked: {}", report.checked);
    if report.mismatches.is_empty() {
        println!("no checksum mismatches found.");
    } else {
        println!("{} checksum mismatch(es):", report.mismatches.len());
        for path in &report.mismatches {
            println!("  {}", path.display());
        }
        std::process::exit(1);
    }
    Ok(())
}

fn cleanup(app: &App) -> anyhow::Result<()> {
    let live = app.metastore.live_sha256s()?;
    let report = app.pool.cleanup(&live)?;
    println!(
        "removed {} object(s), reclaimed {} bytes",
        report.removed.len(),
        report.bytes_reclaimed
    );
    Ok(())
}
