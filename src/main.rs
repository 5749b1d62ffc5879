//! bucketsync - directory sync and object assembly for S3-compatible storage

use anyhow::{bail, Context};
use bucketsync::cli::{
    Cli, Commands, ConfigArgs, DuArgs, LsArgs, MergeArgs, MultipartCommand, PutArgs, SyncArgs,
};
use bucketsync::config::Config;
use bucketsync::format::{format_age, format_duration_secs, format_size};
use bucketsync::listing;
use bucketsync::merge::MergeEngine;
use bucketsync::multipart::{self, CleanAction};
use bucketsync::progress;
use bucketsync::put::{self, Uploader};
use bucketsync::storage::{ObjectStore, S3Store};
use bucketsync::sync::SyncEngine;
use bucketsync::uri::{Locator, ObjectRef};
use bucketsync::usage;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json);

    let shutdown = setup_shutdown_handler();

    let result = match &cli.command {
        Commands::Config(args) => handle_config_command(args, &cli),
        command => {
            let config = cli.load_config().context("loading configuration")?;
            let store: Arc<dyn ObjectStore> = Arc::new(S3Store::from_config(&config).await?);

            match command {
                Commands::Sync(args) => run_sync(args, &config, store).await,
                Commands::Ls(args) => run_ls(args, &config, store).await,
                Commands::Put(args) => run_put(args, &config, store).await,
                Commands::Merge(args) => run_merge(args, &config, store).await,
                Commands::Multipart(args) => run_multipart(&args.action, store).await,
                Commands::Du(args) => run_du(args, &config, store).await,
                Commands::Config(_) => Ok(()),
            }
        }
    };

    drop(shutdown);
    result
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::new("bucketsync=info"),
        1 => EnvFilter::new("bucketsync=debug"),
        2 => EnvFilter::new("bucketsync=trace"),
        _ => EnvFilter::new("trace"),
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

/// Ctrl+C ends the process; an interrupted merge leaves its session open
fn setup_shutdown_handler() -> tokio::sync::oneshot::Sender<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Received Ctrl+C, terminating");
                std::process::exit(130);
            }
            _ = rx => {}
        }
    });

    tx
}

fn parse_remote(s: &str) -> anyhow::Result<ObjectRef> {
    match Locator::parse(s)? {
        Locator::Remote(obj) => Ok(obj),
        Locator::Local(_) => bail!("{} is not an s3:// location", s),
    }
}

async fn run_sync(args: &SyncArgs, config: &Config, store: Arc<dyn ObjectStore>) -> anyhow::Result<()> {
    let source = Locator::parse(&args.source)?;
    let dest = Locator::parse(&args.destination)?;
    let options = args.to_options(config);

    tracing::info!(
        source = %source,
        destination = %dest,
        dry_run = options.dry_run,
        delete = options.delete,
        parallelism = options.parallelism,
        "Starting sync"
    );

    let engine = SyncEngine::new(store, options);
    let report = engine.run(&source, &dest).await?;

    if report.dry_run {
        progress::print_dry_run_summary(&report);
        return Ok(());
    }

    progress::print_sync_summary(&report);
    if report.has_failures() {
        bail!("{} item(s) failed", report.stats.errors);
    }
    if !report.complete_listing {
        bail!("listing was incomplete");
    }
    Ok(())
}

async fn run_ls(args: &LsArgs, config: &Config, store: Arc<dyn ObjectStore>) -> anyhow::Result<()> {
    let mut incomplete = 0;
    for target in &args.targets {
        let root = parse_remote(target)?;
        let found = listing::list(store.as_ref(), &root, args.recursive, config.page_size).await;

        for prefix in &found.prefixes {
            println!("{:>10}  s3://{}/{}", "DIR", root.bucket, prefix);
        }
        for object in &found.objects {
            if args.long {
                println!(
                    "{:>14}  {}  {:>10}  s3://{}/{}",
                    object.size,
                    object.etag,
                    format_age(object.last_modified),
                    root.bucket,
                    object.key
                );
            } else {
                println!("{:>10}  s3://{}/{}", format_size(object.size), root.bucket, object.key);
            }
        }
        if !found.complete {
            incomplete += 1;
        }
    }

    if incomplete > 0 {
        bail!("{} listing(s) stopped early", incomplete);
    }
    Ok(())
}

async fn run_put(args: &PutArgs, config: &Config, store: Arc<dyn ObjectStore>) -> anyhow::Result<()> {
    let dest = parse_remote(&args.destination)?;
    let uploader = Uploader::new(store, args.to_options(config)?)?;

    let mut failed = 0;
    for (source, object) in put::destinations(&args.sources, &dest)? {
        match uploader.put_file(&source, &object).await {
            Ok(report) => println!(
                "{} => {} ({}, {} part(s), {})",
                source.display(),
                object,
                format_size(report.bytes),
                report.parts.len(),
                format_duration_secs(report.duration_secs)
            ),
            Err(e) => {
                tracing::error!(source = %source.display(), dest = %object, error = %e, "Upload failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} file(s) failed to upload", failed);
    }
    Ok(())
}

async fn run_merge(args: &MergeArgs, config: &Config, store: Arc<dyn ObjectStore>) -> anyhow::Result<()> {
    let dest = Locator::parse(&args.destination)?;
    let sources = args
        .sources
        .iter()
        .map(|s| Locator::parse(s))
        .collect::<Result<Vec<_>, _>>()?;
    let options = args.to_options(config)?;

    tracing::info!(destination = %dest, sources = sources.len(), dry_run = options.dry_run, "Starting merge");

    let engine = MergeEngine::new(store, options);
    let report = engine.merge(&sources, &dest).await?;
    progress::print_merge_report(&report);
    Ok(())
}

async fn run_multipart(action: &MultipartCommand, store: Arc<dyn ObjectStore>) -> anyhow::Result<()> {
    match action {
        MultipartCommand::List {
            targets,
            recursive,
            long,
        } => {
            for target in targets {
                let root = parse_remote(target)?;
                let listing = multipart::list_sessions(store.as_ref(), &root, *recursive).await?;

                for prefix in &listing.prefixes {
                    println!("DIR  s3://{}/{}", root.bucket, prefix);
                }
                for info in &listing.sessions {
                    let object = info.session.object();
                    if *long {
                        println!(
                            "{}  {}  {}",
                            object,
                            info.session.upload_id,
                            format_age(info.initiated)
                        );
                        for part in &info.parts {
                            println!("  part[{}]: ETag={} Size={}", part.part_number, part.etag, part.size);
                        }
                        println!("  current size: {}", format_size(info.total_size()));
                    } else {
                        println!("{}", object);
                    }
                }
            }
            Ok(())
        }
        MultipartCommand::Clean {
            targets,
            recursive,
            id,
            complete,
        } => {
            let action = if *complete {
                CleanAction::Complete
            } else {
                CleanAction::Abort
            };
            let mut failed = 0;
            for target in targets {
                let root = parse_remote(target)?;
                let report =
                    multipart::clean_sessions(store.as_ref(), &root, *recursive, id.as_deref(), action)
                        .await?;
                println!(
                    "{}: aborted {}, completed {}, failed {}",
                    root, report.aborted, report.completed, report.failed
                );
                failed += report.failed;
            }
            if failed > 0 {
                bail!("{} upload(s) could not be cleaned", failed);
            }
            Ok(())
        }
    }
}

async fn run_du(args: &DuArgs, config: &Config, store: Arc<dyn ObjectStore>) -> anyhow::Result<()> {
    let locators = args
        .targets
        .iter()
        .map(|t| Locator::parse(t))
        .collect::<Result<Vec<_>, _>>()?;

    let report = usage::disk_usage(store.as_ref(), &locators, config.page_size).await?;
    for prefix in &report.prefixes {
        let marker = if prefix.complete { "" } else { " (incomplete)" };
        println!(
            "{:>12} {:>8} {}{}",
            format_size(prefix.bytes),
            prefix.objects,
            prefix.root,
            marker
        );
    }
    if report.prefixes.len() > 1 {
        println!(
            "{:>12} {:>8} total",
            format_size(report.total_bytes()),
            report.total_objects()
        );
    }
    Ok(())
}

fn handle_config_command(args: &ConfigArgs, cli: &Cli) -> anyhow::Result<()> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };

    if args.path {
        println!("{}", path.display());
    } else if args.init {
        Config::default().save_to(&path)?;
        println!("Created default configuration at {}", path.display());
    } else {
        let config = cli.load_config()?;
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
