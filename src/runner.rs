use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::annotations::AnnotationIndex;
use crate::artifacts::{self, feature_artifact_path};
use crate::backbone::{check_feature_shape, FeatureExtractor};
use crate::config::ExtractConfig;
use crate::error::{Error, Result};
use crate::preprocessing;

pub const PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, Clone)]
pub struct RunSummary
{
    pub images_processed: usize,
    pub captions_indexed: usize,
    pub index_path: PathBuf,
    pub elapsed: Duration,
}

/// Extracts and writes the features of every image in the index, in index order,
/// then writes the index itself.
///
/// The first image that fails to load or extract aborts the run. Artifacts from
/// earlier runs are overwritten unconditionally.
pub fn run_extraction<E: FeatureExtractor>(
        index: &AnnotationIndex,
        extractor: &E,
        config: &ExtractConfig
    ) -> Result<RunSummary>
{
    let now = Instant::now();
    let total = index.len();
    info!("Extracting features for {} images into {:?}", total, config.feature_dir);

    std::fs::create_dir_all(&config.feature_dir).map_err(Error::artifact(&config.feature_dir))?;

    for (processed, entry) in index.iter().enumerate() {
        let image_path = config.image_dir.join(&entry.file_name);
        let input = preprocessing::load_and_normalize(&image_path)?;

        let features = extractor.extract(input)?;
        check_feature_shape(&features, config.feature_shape)?;

        let artifact_path = feature_artifact_path(&config.feature_dir, &entry.file_name);
        artifacts::write_feature_artifact(&artifact_path, &features)?;
        debug!("Wrote {:?} for image {}", artifact_path, entry.image_id);

        if (processed + 1) % PROGRESS_INTERVAL == 0 {
            info!("Processed {}/{} images ({:?} elapsed)", processed + 1, total, now.elapsed());
        }
    }

    artifacts::write_index_artifact(&config.index_path, index)?;
    info!("Wrote caption index for {} images to {:?}", total, config.index_path);

    let elapsed = now.elapsed();
    info!("Extraction took {:?}", elapsed);

    Ok(RunSummary {
        images_processed: total,
        captions_indexed: index.caption_count(),
        index_path: config.index_path.clone(),
        elapsed,
    })
}

#[derive(Debug, Default)]
pub struct VerifyReport
{
    pub images_checked: usize,
    /// Feature artifacts that could not be opened or decoded.
    pub unreadable: Vec<(PathBuf, String)>,
    /// Feature artifacts whose shape differs from the expected one.
    pub wrong_shape: Vec<(PathBuf, Vec<usize>)>,
    /// `Some(false)` when the index artifact disagrees with the descriptor.
    pub index_matches_descriptor: Option<bool>,
}

impl VerifyReport
{
    pub fn is_ok(&self) -> bool
    {
        self.unreadable.is_empty()
            && self.wrong_shape.is_empty()
            && self.index_matches_descriptor != Some(false)
    }

    pub fn summary(&self) -> String
    {
        let mut summary = format!(
            "{} unreadable and {} misshapen artifacts out of {}",
            self.unreadable.len(), self.wrong_shape.len(), self.images_checked
        );
        match self.index_matches_descriptor {
            Some(true) => summary.push_str("; index matches the descriptor"),
            Some(false) => summary.push_str("; index does NOT match the descriptor"),
            None => {},
        }
        summary
    }
}

/// Checks the output of a previous run: the index artifact must decode, and every image
/// it lists must have a readable feature artifact of the expected shape.
/// If `descriptor_index` is given, the index artifact must equal it exactly.
///
/// Problems with individual feature artifacts are collected, not returned as errors.
pub fn verify_artifacts(config: &ExtractConfig, descriptor_index: Option<&AnnotationIndex>) -> Result<VerifyReport>
{
    let index = artifacts::read_index_artifact(&config.index_path)?;
    info!("Verifying {} feature artifacts in {:?}", index.len(), config.feature_dir);

    let index_matches_descriptor = descriptor_index.map(|expected| *expected == index);
    if index_matches_descriptor == Some(false) {
        warn!("Index artifact {:?} does not match the descriptor", config.index_path);
    }

    let paths: Vec<PathBuf> = index
        .iter()
        .map(|entry| feature_artifact_path(&config.feature_dir, &entry.file_name))
        .collect();

    // Load the artifacts in parallel
    let results: Vec<(PathBuf, std::result::Result<Vec<usize>, String>)> = paths
        .into_par_iter()
        .map(|path| {
            let shape = artifacts::read_feature_artifact(&path)
                .map(|features| features.shape().to_vec())
                .map_err(|e| e.to_string());
            (path, shape)
        })
        .collect();

    let mut report = VerifyReport {
        images_checked: results.len(),
        index_matches_descriptor,
        ..Default::default()
    };

    for (path, shape) in results {
        match shape {
            Ok(shape) if shape == config.feature_shape => {},
            Ok(shape) => {
                warn!("Artifact {:?} has shape {:?}, expected {:?}", path, shape, config.feature_shape);
                report.wrong_shape.push((path, shape));
            },
            Err(e) => {
                warn!("Artifact {:?} is unreadable: {}", path, e);
                report.unreadable.push((path, e));
            },
        }
    }

    Ok(report)
}
