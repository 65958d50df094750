//! Batch orchestration.
//!
//! Entries run on a dedicated rayon pool sized by `queue_concurrency`. The
//! indexed parallel iterator writes each result into the slot of its input
//! entry, so the returned vector is in input order whatever the completion
//! order was. A failed entry is just a `Failed` slot; siblings keep going.

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::info;

use crate::downloader::{download, DownloadContext};
use crate::models::{BatchEntry, DownloadResult};
use crate::progress::BatchProgress;

pub fn run_batch(
    ctx: &DownloadContext<'_>,
    entries: &[BatchEntry],
    title: &str,
) -> Result<Vec<DownloadResult>> {
    let workers = ctx.settings.queue_concurrency.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("download-{}", i))
        .build()
        .context("Failed to build download pool")?;

    info!(entries = entries.len(), workers, "Starting batch: {}", title);
    let progress = BatchProgress::new(entries.len() as u64, title);

    let results: Vec<DownloadResult> = pool.install(|| {
        entries
            .par_iter()
            .map(|entry| {
                let result = download(ctx, entry);
                progress.record(&result);
                result
            })
            .collect()
    });

    progress.finish();
    Ok(results)
}
