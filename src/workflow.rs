use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::create_item;
use crate::dataset::DatasetReader;
use crate::domain::{ItemId, UrlParser};
use crate::error::EtlError;
use crate::fetch::SourceFetcher;
use crate::naming::{ArtifactKind, ArtifactLayout};
use crate::references::ReferenceBuilder;
use crate::storage::BlobStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowOptions {
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStage {
    Fetching,
    CheckingRefs,
    BuildingRefs,
    SkippingRefs,
    UploadingRefs,
    CheckingStac,
    BuildingStac,
    SkippingStac,
    UploadingStac,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub url: String,
    pub stage: WorkflowStage,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactAction {
    Built,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub url: String,
    pub item_id: ItemId,
    pub references_path: String,
    pub stac_item_path: String,
    pub references: ArtifactAction,
    pub stac_item: ArtifactAction,
}

pub trait ItemProcessor: Sync {
    fn process(
        &self,
        url: &str,
        options: WorkflowOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ItemOutcome, EtlError>;
}

pub struct Pipeline<S: BlobStore, F: SourceFetcher, D: DatasetReader, R: ReferenceBuilder> {
    store: S,
    fetcher: F,
    reader: D,
    references: R,
    parser: UrlParser,
    layout: ArtifactLayout,
    scratch_root: Option<PathBuf>,
}

impl<S: BlobStore, F: SourceFetcher, D: DatasetReader, R: ReferenceBuilder> Pipeline<S, F, D, R> {
    pub fn new(
        store: S,
        fetcher: F,
        reader: D,
        references: R,
        parser: UrlParser,
        layout: ArtifactLayout,
    ) -> Self {
        Self {
            store,
            fetcher,
            reader,
            references,
            parser,
            layout,
            scratch_root: None,
        }
    }

    pub fn with_scratch_root(mut self, root: PathBuf) -> Self {
        self.scratch_root = Some(root);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn references(&self) -> &R {
        &self.references
    }

    fn run(
        &self,
        url: &str,
        options: WorkflowOptions,
        sink: &dyn ProgressSink,
        start: Instant,
    ) -> Result<ItemOutcome, EtlError> {
        let stage = |stage: WorkflowStage| {
            sink.event(ProgressEvent {
                url: url.to_string(),
                stage,
                elapsed: Some(start.elapsed()),
            })
        };

        let record = self.parser.parse(url)?;
        let item_id = record.item_id();

        stage(WorkflowStage::Fetching);
        let scratch = self.scratch_dir()?;
        let local_path = scratch.path().join(scratch_file_name(url));
        let bytes = self.fetcher.download(url, &local_path)?;
        debug!(item = %item_id, bytes, "fetched source file");

        let dataset = self.reader.open(&local_path)?;
        let mut item = create_item(&self.parser, &dataset, url, None)?;
        let references_path = self.layout.path(&item_id, ArtifactKind::References);
        let stac_item_path = self.layout.path(&item_id, ArtifactKind::StacItem);

        stage(WorkflowStage::CheckingRefs);
        let references_existed = self.store.exists(&references_path)?;
        let references_bytes = if options.overwrite || !references_existed {
            stage(WorkflowStage::BuildingRefs);
            let manifest = self.references.build(&local_path, url)?;
            Some(manifest.to_bytes()?)
        } else {
            stage(WorkflowStage::SkippingRefs);
            None
        };

        item.set_references(&self.store.href(&references_path));
        let item_bytes = item.to_bytes()?;

        if let Some(content) = &references_bytes {
            stage(WorkflowStage::UploadingRefs);
            self.store.put(
                &references_path,
                content,
                ArtifactKind::References.content_type(),
                true,
            )?;
            info!(item = %item_id, path = %references_path, "uploaded references");
        }

        stage(WorkflowStage::CheckingStac);
        let created_references = references_bytes.is_some() && !references_existed;
        let stac_exists = match self.store.exists(&stac_item_path) {
            Ok(exists) => exists,
            Err(err) => {
                self.rollback_references(&item_id, &references_path, created_references);
                return Err(err);
            }
        };

        let stac_item = if options.overwrite || !stac_exists {
            stage(WorkflowStage::BuildingStac);
            stage(WorkflowStage::UploadingStac);
            let uploaded = self.store.put(
                &stac_item_path,
                &item_bytes,
                ArtifactKind::StacItem.content_type(),
                true,
            );
            if let Err(err) = uploaded {
                self.rollback_references(
                    &item_id,
                    &references_path,
                    created_references && !stac_exists,
                );
                return Err(err);
            }
            info!(item = %item_id, path = %stac_item_path, "uploaded stac item");
            ArtifactAction::Built
        } else {
            stage(WorkflowStage::SkippingStac);
            ArtifactAction::Skipped
        };

        Ok(ItemOutcome {
            url: url.to_string(),
            item_id,
            references_path,
            stac_item_path,
            references: if references_bytes.is_some() {
                ArtifactAction::Built
            } else {
                ArtifactAction::Skipped
            },
            stac_item,
        })
    }

    // Only a manifest this invocation created may be removed; an existing one
    // can already be referenced by a published item.
    fn rollback_references(&self, item_id: &ItemId, references_path: &str, created: bool) {
        if !created {
            return;
        }
        if let Err(err) = self.store.delete(references_path) {
            warn!(item = %item_id, path = references_path, error = %err, "failed to remove orphaned references");
        }
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, EtlError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("deltares-etl");
        match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|err| EtlError::Filesystem(err.to_string()))
    }
}

impl<S: BlobStore, F: SourceFetcher, D: DatasetReader, R: ReferenceBuilder> ItemProcessor
    for Pipeline<S, F, D, R>
{
    fn process(
        &self,
        url: &str,
        options: WorkflowOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ItemOutcome, EtlError> {
        let start = Instant::now();
        let result = self.run(url, options, sink, start);
        let stage = match &result {
            Ok(_) => WorkflowStage::Done,
            Err(err) => {
                warn!(url, error = %err, "item failed");
                WorkflowStage::Failed
            }
        };
        sink.event(ProgressEvent {
            url: url.to_string(),
            stage,
            elapsed: Some(start.elapsed()),
        });
        result
    }
}

fn scratch_file_name(url: &str) -> String {
    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("source.nc");
    Path::new(name)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "source.nc".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_name_strips_query() {
        assert_eq!(
            scratch_file_name("https://a.blob/x/reservoirs_BOM.nc?sv=1&sig=2"),
            "reservoirs_BOM.nc"
        );
        assert_eq!(scratch_file_name("https://a.blob/x/"), "source.nc");
    }
}
