use anyhow::Context;
use caption_features::annotations::AnnotationIndex;
use caption_features::backbone::{FeatureExtractor, OnnxBackbone};
use caption_features::config::{Cli, Command, ExtractArgs, VerifyArgs};
use caption_features::runner;
use clap::Parser;
use log::{error, info, LevelFilter};

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

fn main() -> anyhow::Result<()> {
    // RUST_LOG, when set, overrides the build's default level.
    env_logger::Builder::new()
        .filter_level(LOG_LEVEL)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Extract(args) => extract(args),
        Command::Verify(args) => verify(args),
    }
}

fn extract(args: ExtractArgs) -> anyhow::Result<()> {
    let config = args.output.to_config(args.image_dir.clone())?;

    info!("Indexing captions from {:?}...", args.descriptor);
    let now = std::time::Instant::now();
    let index = AnnotationIndex::from_descriptor_file(&args.descriptor)
        .with_context(|| format!("Unable to index captions from {:?}", args.descriptor))?;
    info!("Indexed {} images and {} captions in {:?}", index.len(), index.caption_count(), now.elapsed());

    let backbone = OnnxBackbone::new(&args.model, &args.backbone_options()?)
        .with_context(|| format!("Unable to load backbone {:?}", args.model))?;
    info!("Backbone feature shape: {:?}", backbone.feature_shape());

    let summary = runner::run_extraction(&index, &backbone, &config).context("Feature extraction failed")?;
    info!(
        "Done: {} images, {} captions, index at {:?}, took {:?}",
        summary.images_processed, summary.captions_indexed, summary.index_path, summary.elapsed
    );

    Ok(())
}

fn verify(args: VerifyArgs) -> anyhow::Result<()> {
    let config = args.output.to_config(Default::default())?;

    let descriptor_index = match &args.descriptor {
        Some(path) => Some(
            AnnotationIndex::from_descriptor_file(path)
                .with_context(|| format!("Unable to index captions from {:?}", path))?
        ),
        None => None,
    };

    let report = runner::verify_artifacts(&config, descriptor_index.as_ref())
        .with_context(|| format!("Unable to verify artifacts in {:?}", config.feature_dir))?;

    if !report.is_ok() {
        error!("{}", report.summary());
        return Err(anyhow::anyhow!("Verification of {:?} failed", config.feature_dir));
    }

    info!("Verified: {}", report.summary());
    Ok(())
}
