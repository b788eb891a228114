//! Subcommand handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use smartdl_core::{
    Aria2Client, CancellationCoordinator, Config, Database, EngineDriver, ExtractorSet, Job,
    JobId, JobRepository, JobService, JobState, JobStore, LogNotifier, LogUploadSink, Scheduler,
    SchedulerSettings,
};

pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).context("Failed to load configuration")
}

async fn open_store(config: &Config) -> Result<Arc<dyn JobRepository>> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let db = Database::new(path)
        .await
        .with_context(|| format!("Failed to open database '{}'", path.display()))?;
    Ok(Arc::new(JobStore::new(db)))
}

fn coordinator(config: &Config, store: &Arc<dyn JobRepository>) -> Arc<CancellationCoordinator> {
    Arc::new(CancellationCoordinator::new(
        Arc::clone(store),
        config.poll_interval(),
    ))
}

async fn open_service(config: &Config) -> Result<JobService> {
    let store = open_store(config).await?;
    let cancellation = coordinator(config, &store);
    Ok(JobService::new(store, cancellation))
}

pub(crate) async fn run_scheduler(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let cancellation = coordinator(config, &store);
    let extractors =
        ExtractorSet::from_config(config).context("Failed to build extractors")?;

    let aria2 = Aria2Client::new(
        config.engine.rpc_url.clone(),
        config.engine.secret.clone(),
        config.rpc_timeout(),
    )
    .context("Failed to build aria2 client")?
    .with_options(config.aria2_options());
    match aria2.version().await {
        Ok(version) => info!(
            version = %version,
            rpc_url = %config.engine.rpc_url,
            "aria2 reachable"
        ),
        Err(err) => warn!(
            error = %err,
            rpc_url = %config.engine.rpc_url,
            "aria2 not reachable yet; downloads will retry"
        ),
    }

    tokio::fs::create_dir_all(&config.download.dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create download directory '{}'",
                config.download.dir.display()
            )
        })?;
    let driver = EngineDriver::new(Arc::new(aria2), config.download.dir.clone());

    let scheduler = Scheduler::new(
        store,
        extractors,
        driver,
        cancellation,
        Arc::new(LogUploadSink),
        Arc::new(LogNotifier),
        SchedulerSettings::from_config(config),
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current step");
        }
        signal.cancel();
    });

    scheduler
        .run(shutdown)
        .await
        .context("Scheduler failed to start")
}

pub(crate) async fn run_add(config: &Config, locators: &[String]) -> Result<()> {
    let service = open_service(config).await?;
    for locator in locators {
        let id = service
            .enqueue(locator)
            .await
            .with_context(|| format!("Failed to queue '{locator}'"))?;
        println!("queued job {id}: {}", locator.trim());
    }
    Ok(())
}

pub(crate) async fn run_status(config: &Config, id: JobId) -> Result<()> {
    let service = open_service(config).await?;
    let job = service.get_job(id).await?;
    print!("{}", render_status(&job));
    Ok(())
}

pub(crate) async fn run_list(config: &Config, state: Option<JobState>) -> Result<()> {
    let service = open_service(config).await?;
    let jobs = match state {
        Some(state) => service.list_by_state(state).await?,
        None => service.list_all().await?,
    };
    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }
    for job in &jobs {
        println!("{}", render_row(job));
    }
    Ok(())
}

pub(crate) async fn run_cancel(config: &Config, id: JobId) -> Result<()> {
    let service = open_service(config).await?;
    service.request_cancel(id).await?;
    let job = service.get_job(id).await?;
    if job.state().is_terminal() {
        println!("job {id} already {}", job.state());
    } else {
        println!("cancellation requested for job {id}");
    }
    Ok(())
}

pub(crate) async fn run_summary(config: &Config) -> Result<()> {
    let service = open_service(config).await?;
    let summary = service.summary().await?;
    for (state, count) in &summary.counts {
        println!("{:<18} {count}", state.as_str());
    }
    println!("{:<18} {}", "total", summary.total());
    Ok(())
}

fn render_row(job: &Job) -> String {
    let kind = job.kind().map_or("-", |kind| kind.as_str());
    format!(
        "{:>5}  {:<18} {:<13} {:>5.1}%  {}",
        job.id,
        job.state().as_str(),
        kind,
        job.percent,
        job.locator
    )
}

fn render_status(job: &Job) -> String {
    let progress = job.progress();
    let mut out = format!(
        "job {}\n  locator:  {}\n  state:    {}\n  kind:     {}\n",
        job.id,
        job.locator,
        job.state(),
        job.kind().map_or("-", |kind| kind.as_str()),
    );
    if let Some(resource) = job.resource() {
        out.push_str(&format!("  title:    {}\n", resource.title));
        if let Some(size) = resource.declared_size {
            out.push_str(&format!("  size:     {size} bytes\n"));
        }
    }
    out.push_str(&format!(
        "  progress: {:.1}% ({} bytes, {} B/s)\n",
        progress.percent, progress.bytes_downloaded, progress.speed_bytes_per_sec
    ));
    if job.retry_count > 0 {
        out.push_str(&format!("  retries:  {}\n", job.retry_count));
    }
    if job.cancel_requested {
        out.push_str("  cancel:   requested\n");
    }
    if let Some(path) = &job.file_path {
        out.push_str(&format!("  file:     {path}\n"));
    }
    if let Some(error) = &job.error {
        out.push_str(&format!("  error:    {error}\n"));
    }
    out
}
