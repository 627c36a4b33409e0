use crate::client::{ConvertOptions, ProgressCallback, WorkerClient};
use crate::config::Batching;
use crate::error::WorkerError;
use crate::protocol::{ConvertOutput, Progress};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub first_page: u32, // 1-based inclusive
    pub last_page: u32,  // 1-based inclusive
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPlan {
    pub first_page: u32,
    pub last_page: u32,
    pub batches: Vec<PageRange>,
}

impl BatchPlan {
    pub fn single(first_page: u32, last_page: u32) -> BatchPlan {
        BatchPlan {
            first_page,
            last_page,
            batches: vec![PageRange {
                first_page,
                last_page,
            }],
        }
    }

    pub fn from_range(cfg: &Batching, first_page: u32, last_page: u32) -> BatchPlan {
        let first_page = first_page.max(1);
        if cfg.pages_per_batch == 0 || last_page <= first_page {
            return BatchPlan::single(first_page, last_page.max(first_page));
        }
        let size = cfg.pages_per_batch;
        let minp = cfg.min_pages_per_batch.max(1).min(size);

        let mut batches = Vec::new();
        let mut p = first_page;
        while p <= last_page {
            let mut end = p.saturating_add(size - 1).min(last_page);
            let remaining = last_page - end;
            if remaining > 0 && remaining < minp {
                end = last_page;
            }
            batches.push(PageRange {
                first_page: p,
                last_page: end,
            });
            p = end + 1;
        }

        BatchPlan {
            first_page,
            last_page,
            batches,
        }
    }
}

/// Rasterizes a document as a sequence of page-range conversions.
///
/// Without batching configured, or when the engine reports no page count,
/// this is a single unrestricted `convert`. Progress is reported against the
/// whole requested range.
pub async fn convert_in_batches(
    client: &WorkerClient,
    document: Vec<u8>,
    options: ConvertOptions,
    cfg: &Batching,
) -> Result<ConvertOutput, WorkerError> {
    if cfg.pages_per_batch == 0 {
        return client.convert(document, options).await;
    }

    let page_count = client.analyze(document.clone(), None).await?;
    if page_count == 0 {
        info!("page count unknown; converting in one pass");
        return client.convert(document, options).await;
    }

    let first = options.first_page.filter(|p| *p > 0).unwrap_or(1);
    let last = options
        .last_page
        .filter(|p| *p > 0)
        .unwrap_or(page_count)
        .min(page_count);
    let plan = BatchPlan::from_range(cfg, first, last);
    info!(
        "converting pages {}-{} in {} batches",
        plan.first_page,
        plan.last_page,
        plan.batches.len()
    );

    let total = plan.last_page + 1 - plan.first_page;
    let mut images = Vec::new();
    let mut last_page = plan.first_page.saturating_sub(1);
    for batch in &plan.batches {
        let on_progress = options.on_progress.clone().map(|cb| {
            let done = batch.first_page - plan.first_page;
            let offset = plan.first_page - 1;
            Arc::new(move |p: Progress| {
                let current = if p.current == 0 {
                    done
                } else {
                    p.current.saturating_sub(offset).min(total)
                };
                cb(Progress { current, total })
            }) as ProgressCallback
        });
        let out = client
            .convert(
                document.clone(),
                ConvertOptions {
                    first_page: Some(batch.first_page),
                    last_page: Some(batch.last_page),
                    on_progress,
                    ..options.clone()
                },
            )
            .await?;
        last_page = out.last_page;
        images.extend(out.images);
    }

    Ok(ConvertOutput {
        images,
        first_page: plan.first_page,
        last_page,
    })
}
