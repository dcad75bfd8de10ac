use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use stratum::{config, defaults, oci};
use stratum_core::{CancelToken, IndexReport, IndexState};
use stratum_indexer::{Indexer, LayerArena};
use stratum_matcher::MatchingEngine;
use stratum_store::{FileLocks, Store};
use stratum_updater::{ManagerConfig, UpdateManager, UpdaterConfigs};

#[derive(Parser)]
#[command(name = "stratum", version, about = "Container-image vulnerability analysis")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a saved image tarball into an inventory report
    Index {
        /// Image tarball from `docker save` or an OCI layout
        image: PathBuf,
        /// Directory to keep realized layers in; a temp dir otherwise
        #[arg(long)]
        arena: Option<PathBuf>,
        /// Write the report here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Run the vulnerability updaters against a store
    Update {
        /// Path of the vulnerability database
        #[arg(long)]
        db: PathBuf,
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Keep running on the configured interval
        #[arg(long)]
        watch: bool,
    },
    /// Match an index report against the store
    Report {
        /// IndexReport JSON produced by `stratum index`
        index_report: PathBuf,
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show what changed between two update operations
    Diff {
        #[arg(long)]
        db: PathBuf,
        /// Older operation; omitted means "diff against empty"
        #[arg(long)]
        prev: Option<Uuid>,
        #[arg(long)]
        cur: Uuid,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    match Cli::parse().command {
        Command::Index {
            image,
            arena,
            output,
        } => index(&cancel, image, arena, output),
        Command::Update { db, config, watch } => update(&cancel, db, config, watch),
        Command::Report {
            index_report,
            db,
            config,
        } => report(&cancel, index_report, db, config),
        Command::Diff { db, prev, cur } => diff(db, prev, cur),
    }
}

fn agent(timeout: Option<Duration>) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout.unwrap_or(Duration::from_secs(300))))
        .build();
    ureq::Agent::new_with_config(config)
}

fn index(
    cancel: &CancelToken,
    image: PathBuf,
    arena: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let workdir = tempfile::TempDir::new().context("failed to create working directory")?;
    let manifest = oci::load_image(&image, &workdir.path().join("blobs"))?;
    info!(manifest = %manifest.hash, layers = manifest.layers.len(), "image loaded");

    let arena_dir = arena.unwrap_or_else(|| workdir.path().join("arena"));
    let indexer = Indexer::new(
        LayerArena::new(arena_dir, agent(None))?,
        Arc::new(defaults::registry()),
    );
    let report = indexer.index(cancel, &manifest);
    emit(&report, output.as_deref())?;
    if report.state == IndexState::IndexError {
        bail!(
            "indexing failed: {}",
            report.err.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

fn update(
    cancel: &CancelToken,
    db: PathBuf,
    config: Option<PathBuf>,
    watch: bool,
) -> Result<()> {
    let cfg = config::load(config.as_deref())?;
    let store = Arc::new(Store::open(&db)?);
    // lock files live beside the database so replicas sharing it share
    // the single-flight domain too
    let lock_dir = db
        .parent()
        .map(|p| p.join("stratum-locks"))
        .unwrap_or_else(|| PathBuf::from("stratum-locks"));
    let locks = Arc::new(FileLocks::new(lock_dir)?);

    let mut manager_cfg = ManagerConfig::default();
    if let Some(n) = cfg.update_workers {
        manager_cfg.batch_size = n;
    }
    if let Some(d) = cfg.update_interval {
        manager_cfg.period = d;
    }
    if let Some(r) = cfg.update_retention {
        manager_cfg.retention = r;
    }

    let mut manager = UpdateManager::new(store, locks, manager_cfg);
    for factory in defaults::factories(&cfg.updater_sets) {
        manager.add_factory(factory);
    }
    manager.configure(
        &UpdaterConfigs::new(cfg.updater_configs.clone()),
        &agent(cfg.http_timeout),
    )?;

    if watch && !cfg.disable_background_updates {
        manager.start(cancel)
    } else {
        manager.run(cancel)
    }
}

fn report(
    cancel: &CancelToken,
    index_report: PathBuf,
    db: PathBuf,
    config: Option<PathBuf>,
) -> Result<()> {
    let cfg = config::load(config.as_deref())?;
    let data = std::fs::read_to_string(&index_report)
        .with_context(|| format!("failed to read {}", index_report.display()))?;
    let index: IndexReport =
        serde_json::from_str(&data).context("failed to parse index report")?;
    if index.state != IndexState::IndexFinished {
        bail!("index report is not in a successful terminal state");
    }

    let store = Store::open(&db)?;
    let engine = MatchingEngine::new(
        defaults::matchers(&cfg.matcher_names),
        vec![],
        defaults::enrichers(),
    );
    let report = engine.match_report(cancel, &store, &index)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn diff(db: PathBuf, prev: Option<Uuid>, cur: Uuid) -> Result<()> {
    let store = Store::open(&db)?;
    let diff = store.get_update_diff(prev, cur)?;
    println!("{}", serde_json::to_string_pretty(&diff)?);
    Ok(())
}

fn emit(report: &IndexReport, output: Option<&std::path::Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}
