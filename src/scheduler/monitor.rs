//! Poll loop for one download attempt.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::engine::{DownloadError, EngineDriver, PollReading, Transfer};
use crate::job::{JobId, JobRepository, ResourceDescriptor};
use crate::retry::CancelSignal;

/// Inputs of one monitored attempt.
pub(crate) struct AttemptContext<'a> {
    pub driver: &'a EngineDriver,
    pub store: &'a dyn JobRepository,
    pub cancel: &'a dyn CancelSignal,
    pub job_id: JobId,
    pub resource: &'a ResourceDescriptor,
    pub poll_interval: Duration,
    pub max_poll_errors: u32,
    /// Highest byte count persisted during this stage, across attempts.
    pub bytes_floor: &'a AtomicU64,
}

/// Submits the resource and polls until it finishes, fails or is cancelled.
///
/// Every tick checks cancellation first; once it is observed the transfer is
/// removed from the engine and nothing more is written.
#[instrument(skip(ctx), fields(job_id = ctx.job_id))]
pub(crate) async fn run_attempt(
    ctx: &AttemptContext<'_>,
    attempt: u32,
) -> Result<PathBuf, DownloadError> {
    if ctx.cancel.is_cancelled().await {
        return Err(DownloadError::Cancelled);
    }

    let mut transfer = ctx.driver.submit(ctx.resource).await?;
    transfer.raise_floor(ctx.bytes_floor.load(Ordering::Relaxed));
    let mut poll_errors = 0u32;

    loop {
        if ctx.cancel.is_cancelled().await {
            return Err(abort(ctx, &transfer).await);
        }

        match ctx.driver.poll(&mut transfer).await {
            Ok(PollReading::Finished(path)) => return Ok(path),
            Ok(PollReading::Running(progress)) => {
                poll_errors = 0;
                if ctx.cancel.is_cancelled().await {
                    return Err(abort(ctx, &transfer).await);
                }
                match ctx.store.update_progress(ctx.job_id, &progress).await {
                    Ok(true) => {
                        ctx.bytes_floor
                            .fetch_max(progress.bytes_downloaded, Ordering::Relaxed);
                    }
                    Ok(false) => {
                        debug!("progress write declined; job no longer downloading");
                        return Err(abort(ctx, &transfer).await);
                    }
                    Err(err) => warn!(error = %err, "failed to persist progress"),
                }
            }
            Err(DownloadError::Rpc(err)) => {
                poll_errors += 1;
                if poll_errors >= ctx.max_poll_errors {
                    ctx.driver.abort(&transfer).await;
                    return Err(DownloadError::Rpc(err));
                }
                warn!(error = %err, poll_errors, "engine status unavailable");
            }
            Err(err) => {
                ctx.driver.abort(&transfer).await;
                return Err(err);
            }
        }

        if ctx.cancel.wait_or_cancel(ctx.poll_interval).await {
            return Err(abort(ctx, &transfer).await);
        }
    }
}

async fn abort(ctx: &AttemptContext<'_>, transfer: &Transfer) -> DownloadError {
    debug!(gid = %transfer.handle(), "cancelling transfer");
    ctx.driver.abort(transfer).await;
    DownloadError::Cancelled
}
