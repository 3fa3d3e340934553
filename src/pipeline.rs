use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::comicinfo;
use crate::domain::{ProcessResult, is_archive_name};
use crate::error::RepackError;
use crate::extract::{ArchiveExtractor, find_inner_archives};
use crate::inspect;
use crate::metadata::{MangaMetadata, MetadataResolver};
use crate::naming::NameNormalizer;
use crate::pack::{PackOutcome, pack_container};
use crate::progress::{CompletedSet, ProgressTracker, SessionStatus};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub progress_path: Utf8PathBuf,
    /// Optional minimal tracker alongside the detailed document. Files it
    /// records as done are skipped even when the detailed document is gone.
    pub completed_set_path: Option<Utf8PathBuf>,
    /// Progress document is flushed after this many processed files, and
    /// always at the end of the run.
    pub save_interval: usize,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Run-level summary, printed as JSON by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub containers: usize,
    pub metadata_found: usize,
    pub metadata_missing: usize,
    pub interrupted: bool,
    pub results: Vec<ProcessResult>,
}

/// Drives the whole batch: skip-check, extract, repack, sidecar, progress.
/// Strictly sequential; one source archive is in flight at a time so peak
/// scratch usage stays bounded.
pub struct BatchCoordinator {
    config: PipelineConfig,
    normalizer: NameNormalizer,
    extractor: ArchiveExtractor,
    resolver: Option<MetadataResolver>,
    cancel: Arc<AtomicBool>,
}

impl BatchCoordinator {
    pub fn new(
        config: PipelineConfig,
        resolver: Option<MetadataResolver>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, RepackError> {
        fs::create_dir_all(&config.output_dir)
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        let extractor = ArchiveExtractor::new(config.temp_dir.clone())?;
        Ok(Self {
            config,
            normalizer: NameNormalizer::new(),
            extractor,
            resolver,
            cancel,
        })
    }

    pub fn run(
        &self,
        files: &[PathBuf],
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, RepackError> {
        let mut tracker = ProgressTracker::open(self.config.progress_path.clone())?;
        let mut completed_set = match &self.config.completed_set_path {
            Some(path) => Some(CompletedSet::open(path.clone())?),
            None => None,
        };
        tracker.start_session(files.len(), None);

        let keys: Vec<String> = files
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        tracker.add_files(keys.iter().map(|key| key.as_str()));
        if let Err(err) = tracker.save() {
            warn!(error = %err, "initial progress save failed");
        }

        let mut report = RunReport {
            total: files.len(),
            processed: 0,
            skipped: 0,
            failed: 0,
            containers: 0,
            metadata_found: 0,
            metadata_missing: 0,
            interrupted: false,
            results: Vec::new(),
        };
        let mut since_save = 0usize;

        for (path, key) in files.iter().zip(&keys) {
            if self.cancel.load(Ordering::SeqCst) {
                report.interrupted = true;
                break;
            }

            let already_done = tracker.is_file_processed(key)
                || completed_set
                    .as_ref()
                    .is_some_and(|set| set.is_completed(key));
            if already_done {
                sink.event(ProgressEvent {
                    message: format!("skip; already completed {key}"),
                });
                report.skipped += 1;
                continue;
            }
            if let Some(file) = tracker.file(key) {
                if file.retry_count >= self.config.max_retries {
                    warn!(file = %key, retries = file.retry_count, "retry budget exhausted, skipping");
                    report.skipped += 1;
                    continue;
                }
            }

            tracker.start_processing(key);
            sink.event(ProgressEvent {
                message: format!("processing {key}"),
            });

            let started = Instant::now();
            let result = match self.process_file(path, sink) {
                Ok(result) => result,
                Err(err) => ProcessResult {
                    original_path: key.clone(),
                    series_name: String::new(),
                    output_files: Vec::new(),
                    metadata_found: false,
                    metadata_source: None,
                    success: false,
                    error: Some(err.to_string()),
                    processing_secs: started.elapsed().as_secs_f64(),
                },
            };

            if result.success {
                tracker.mark_completed(key, result.output_files.clone());
                if let Some(set) = completed_set.as_mut() {
                    if let Err(err) = set.mark_completed(key) {
                        warn!(error = %err, "completed-set save failed");
                    }
                }
                report.processed += 1;
                report.containers += result.output_files.len();
            } else {
                let message = result.error.as_deref().unwrap_or("unknown error");
                warn!(file = %key, error = message, "file failed");
                tracker.mark_failed(key, message);
                report.failed += 1;
            }
            if self.resolver.is_some() {
                if result.metadata_found {
                    report.metadata_found += 1;
                } else {
                    report.metadata_missing += 1;
                }
            }
            report.results.push(result);

            since_save += 1;
            if since_save >= self.config.save_interval {
                since_save = 0;
                if let Err(err) = tracker.save() {
                    // A failed periodic flush costs resumability, not
                    // correctness; keep processing.
                    warn!(error = %err, "periodic progress save failed");
                }
            }
        }

        let status = if report.interrupted {
            SessionStatus::Interrupted
        } else if report.failed > 0 {
            SessionStatus::Error
        } else {
            SessionStatus::Completed
        };
        tracker.end_session(status);
        if let Err(err) = tracker.save() {
            warn!(error = %err, "final progress save failed");
        }

        info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            containers = report.containers,
            "run finished"
        );
        Ok(report)
    }

    /// Processes one source archive end to end. Returns a failed result
    /// only through the error path; a successful return always carries at
    /// least one output container.
    fn process_file(
        &self,
        path: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<ProcessResult, RepackError> {
        let started = Instant::now();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| RepackError::InvalidInput(path.to_path_buf()))?;

        let normalized = self.normalizer.normalize(file_name);
        if normalized.series.is_empty() {
            return Err(RepackError::InvalidInput(path.to_path_buf()));
        }

        let metadata = self
            .resolver
            .as_ref()
            .and_then(|resolver| resolver.resolve(&normalized.series));
        let series = metadata
            .as_ref()
            .map(|meta| meta.preferred_title().to_string())
            .unwrap_or_else(|| normalized.series.clone());

        let inspection = inspect::inspect(path)?;
        let output_files = if inspection.is_nested {
            self.process_nested(path, &series, metadata.as_ref(), sink)?
        } else {
            self.process_flat(path, &series, normalized.volume, metadata.as_ref())?
        };

        if output_files.is_empty() {
            return Err(RepackError::Extraction(format!(
                "no image content found in {}",
                path.display()
            )));
        }

        Ok(ProcessResult {
            original_path: path.display().to_string(),
            series_name: series,
            output_files,
            metadata_found: metadata.is_some(),
            metadata_source: metadata.map(|meta| meta.source),
            success: true,
            error: None,
            processing_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// Nested source: expand the outer container once, then repack each
    /// inner archive into its own volume container. Inner workspaces are
    /// dropped as soon as their container is written.
    fn process_nested(
        &self,
        path: &Path,
        series: &str,
        metadata: Option<&MangaMetadata>,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<String>, RepackError> {
        let outer = self.extractor.extract_outer(path)?;
        let inner_archives = find_inner_archives(outer.path())?;
        let mut outputs = Vec::new();

        for (index, inner_path) in inner_archives.iter().enumerate() {
            let inner_name = inner_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            sink.event(ProgressEvent {
                message: format!("inner {}/{} {inner_name}", index + 1, inner_archives.len()),
            });

            let volume = self.normalizer.extract_volume(inner_name);
            let container_name = match volume {
                Some(volume) => self.normalizer.container_name(series, Some(volume)),
                None => self.normalizer.positional_container_name(series, index + 1),
            };
            let target = self.config.output_dir.join(&container_name);

            let workspace = self.extractor.extract_inner(inner_path)?;
            match pack_container(workspace.path(), &target)? {
                PackOutcome::Packed { entries } => {
                    info!(container = %container_name, entries, "packed");
                    self.embed_sidecar(&target, metadata, volume);
                    outputs.push(container_name);
                }
                PackOutcome::NoContent => {
                    warn!(inner = inner_name, "inner archive had no image content");
                }
            }
        }

        Ok(outputs)
    }

    fn process_flat(
        &self,
        path: &Path,
        series: &str,
        volume: Option<u32>,
        metadata: Option<&MangaMetadata>,
    ) -> Result<Vec<String>, RepackError> {
        let workspace = self.extractor.extract_flat(path)?;
        let container_name = self.normalizer.container_name(series, volume);
        let target = self.config.output_dir.join(&container_name);

        match pack_container(workspace.path(), &target)? {
            PackOutcome::Packed { entries } => {
                info!(container = %container_name, entries, "packed");
                self.embed_sidecar(&target, metadata, volume);
                Ok(vec![container_name])
            }
            PackOutcome::NoContent => Ok(Vec::new()),
        }
    }

    /// Sidecar embedding is best-effort: the container is already complete
    /// and a failed embed never fails the file.
    fn embed_sidecar(&self, target: &Path, metadata: Option<&MangaMetadata>, volume: Option<u32>) {
        let Some(metadata) = metadata else {
            return;
        };
        let xml = comicinfo::generate(metadata, volume);
        if let Err(err) = comicinfo::embed(target, &xml) {
            warn!(container = %target.display(), error = %err, "sidecar embed failed");
        }
    }
}

/// Archive files directly under `input_dir`, sorted by name so batch order
/// is stable between runs.
pub fn discover_archives(input_dir: &Path) -> Result<Vec<PathBuf>, RepackError> {
    if !input_dir.is_dir() {
        return Err(RepackError::InvalidInput(input_dir.to_path_buf()));
    }
    let mut found = Vec::new();
    let entries =
        fs::read_dir(input_dir).map_err(|err| RepackError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| RepackError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .map(is_archive_name)
                .unwrap_or(false)
        {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
