use std::collections::BTreeSet;
use std::time::Instant;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::EtlError;
use crate::storage::BlobStore;
use crate::workflow::{ItemOutcome, ItemProcessor, ProgressSink, WorkflowOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFilter {
    pub prefix: String,
    pub extension: String,
    #[serde(default)]
    pub name_prefix: Option<String>,
}

impl SourceFilter {
    pub fn matches(&self, name: &str) -> bool {
        if !name.starts_with(&self.prefix) || !name.ends_with(&self.extension) {
            return false;
        }
        let file_name = name.rsplit('/').next().unwrap_or(name);
        self.name_prefix
            .as_deref()
            .map(|prefix| file_name.starts_with(prefix))
            .unwrap_or(true)
    }
}

pub fn discover_sources<S: BlobStore + ?Sized>(
    store: &S,
    filter: &SourceFilter,
) -> Result<Vec<String>, EtlError> {
    let urls = store
        .list(&filter.prefix)?
        .into_iter()
        .filter(|name| filter.matches(name))
        .map(|name| store.href(&name))
        .collect::<BTreeSet<_>>();
    Ok(urls.into_iter().collect())
}

/// Source URLs from a newline-separated list, skipping blanks, `#` comments and
/// repeats.
pub fn parse_url_list(content: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(*line))
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBounds {
    pub minimum: usize,
    pub maximum: usize,
}

impl PoolBounds {
    pub fn new(minimum: usize, maximum: usize) -> Result<Self, EtlError> {
        if minimum == 0 {
            return Err(EtlError::InvalidConfig(
                "worker pool minimum must be at least 1".to_string(),
            ));
        }
        if minimum > maximum {
            return Err(EtlError::InvalidConfig(format!(
                "worker pool minimum {minimum} exceeds maximum {maximum}"
            )));
        }
        Ok(Self { minimum, maximum })
    }

    pub fn workers_for(&self, pending: usize) -> usize {
        pending.clamp(self.minimum, self.maximum)
    }
}

impl Default for PoolBounds {
    fn default() -> Self {
        Self {
            minimum: 1,
            maximum: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub workers: usize,
    pub succeeded: Vec<ItemOutcome>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn failed_urls(&self) -> Vec<&str> {
        self.failed.iter().map(|failure| failure.url.as_str()).collect()
    }

    pub fn succeeded_urls(&self) -> Vec<&str> {
        self.succeeded
            .iter()
            .map(|outcome| outcome.url.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchDriver {
    bounds: PoolBounds,
}

impl BatchDriver {
    pub fn new(bounds: PoolBounds) -> Self {
        Self { bounds }
    }

    pub fn run<P: ItemProcessor + ?Sized>(
        &self,
        processor: &P,
        urls: &[String],
        options: WorkflowOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, EtlError> {
        let workers = self.bounds.workers_for(urls.len());
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("etl-worker-{index}"))
            .build()
            .map_err(|err| EtlError::InvalidConfig(format!("worker pool: {err}")))?;
        info!(items = urls.len(), workers, "submitting batch");

        let start = Instant::now();
        let results = pool.install(|| {
            urls.par_iter()
                .map(|url| {
                    let result = processor.process(url, options, sink);
                    if let Err(err) = &result {
                        error!(url = url.as_str(), error = %err, "error in item");
                    }
                    (url.clone(), result)
                })
                .collect::<Vec<_>>()
        });

        let mut report = BatchReport {
            workers,
            ..BatchReport::default()
        };
        for (url, result) in results {
            match result {
                Ok(outcome) => report.succeeded.push(outcome),
                Err(err) => report.failed.push(BatchFailure {
                    url,
                    error: err.to_string(),
                }),
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_bounds_clamp_pending_work() {
        let bounds = PoolBounds::new(2, 8).unwrap();
        assert_eq!(bounds.workers_for(0), 2);
        assert_eq!(bounds.workers_for(5), 5);
        assert_eq!(bounds.workers_for(500), 8);
    }

    #[test]
    fn pool_bounds_validated() {
        assert!(PoolBounds::new(0, 4).is_err());
        assert!(PoolBounds::new(5, 4).is_err());
    }

    #[test]
    fn url_list_drops_comments_and_repeats() {
        let urls = parse_url_list("# floods\nhttps://a/x.nc\n\n  https://a/y.nc \nhttps://a/x.nc\n");
        assert_eq!(urls, vec!["https://a/x.nc".to_string(), "https://a/y.nc".to_string()]);
    }

    #[test]
    fn filter_by_extension_and_name_prefix() {
        let filter = SourceFilter {
            prefix: "v2021.06/global/".to_string(),
            extension: ".nc".to_string(),
            name_prefix: Some("GFM_global_".to_string()),
        };
        assert!(filter.matches("v2021.06/global/LIDAR/5km/GFM_global_LIDAR5km_2018slr_rp0000.nc"));
        assert!(!filter.matches("v2021.06/global/LIDAR/5km/readme.nc"));
        assert!(!filter.matches("v2021.06/global/LIDAR/5km/GFM_global_LIDAR5km_2018slr_rp0000.json"));
        assert!(!filter.matches("v2020/GFM_global_LIDAR5km_2018slr_rp0000.nc"));
    }
}
