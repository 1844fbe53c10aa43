use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::artifacts::INDEX_FILE_NAME;
use crate::backbone::{BackboneOptions, FeatureShape, DEFAULT_FEATURE_SHAPE, DEFAULT_INTRA_THREADS};

pub const DEFAULT_OUTPUT_DIR: &str = "features";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli
{
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command
{
    /// Extract one feature artifact per image, then write the caption index
    Extract(ExtractArgs),
    /// Check the artifacts of a previous run
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
pub struct ExtractArgs
{
    /// Caption descriptor (COCO captions JSON)
    #[arg(long, env = "CAPTION_FEATURES_DESCRIPTOR")]
    pub descriptor: PathBuf,

    /// Directory holding the images named in the descriptor
    #[arg(long, env = "CAPTION_FEATURES_IMAGE_DIR")]
    pub image_dir: PathBuf,

    /// ONNX export of the truncated backbone
    #[arg(long, env = "CAPTION_FEATURES_MODEL")]
    pub model: PathBuf,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Graph output to read features from; defaults to the model's first output
    #[arg(long, env = "CAPTION_FEATURES_OUTPUT_NAME")]
    pub output_name: Option<String>,

    #[arg(long, env = "CAPTION_FEATURES_INTRA_THREADS", default_value_t = DEFAULT_INTRA_THREADS)]
    pub intra_threads: usize,
}

#[derive(Args, Debug)]
pub struct VerifyArgs
{
    #[command(flatten)]
    pub output: OutputArgs,

    /// Also check the index artifact against this descriptor
    #[arg(long, env = "CAPTION_FEATURES_DESCRIPTOR")]
    pub descriptor: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct OutputArgs
{
    /// Directory the feature artifacts are written to
    #[arg(long, env = "CAPTION_FEATURES_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Consolidated index artifact; defaults to <output-dir>/captions_index.bin.gz
    #[arg(long, env = "CAPTION_FEATURES_INDEX_PATH")]
    pub index_path: Option<PathBuf>,

    /// Expected feature shape as height,width,channels
    #[arg(long, env = "CAPTION_FEATURES_FEATURE_SHAPE", value_delimiter = ',', default_values_t = DEFAULT_FEATURE_SHAPE)]
    pub feature_shape: Vec<usize>,
}

/// Where a run reads from and writes to.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractConfig
{
    pub image_dir: PathBuf,
    pub feature_dir: PathBuf,
    pub index_path: PathBuf,
    pub feature_shape: FeatureShape,
}

impl ExtractConfig
{
    /// Index artifact placed next to the feature artifacts.
    pub fn new(image_dir: PathBuf, feature_dir: PathBuf, feature_shape: FeatureShape) -> Self
    {
        let index_path = feature_dir.join(INDEX_FILE_NAME);
        ExtractConfig { image_dir, feature_dir, index_path, feature_shape }
    }

    pub fn with_index_path(mut self, index_path: PathBuf) -> Self
    {
        self.index_path = index_path;
        self
    }
}

impl OutputArgs
{
    pub fn feature_shape(&self) -> anyhow::Result<FeatureShape>
    {
        match self.feature_shape.as_slice() {
            &[height, width, channels] => Ok([height, width, channels]),
            other => Err(anyhow::anyhow!("Feature shape needs three dimensions, got {:?}", other)),
        }
    }

    fn index_path(&self) -> PathBuf
    {
        self.index_path.clone().unwrap_or_else(|| self.output_dir.join(INDEX_FILE_NAME))
    }

    /// The run configuration for the given image directory.
    pub fn to_config(&self, image_dir: PathBuf) -> anyhow::Result<ExtractConfig>
    {
        Ok(ExtractConfig::new(image_dir, self.output_dir.clone(), self.feature_shape()?)
            .with_index_path(self.index_path()))
    }
}

impl ExtractArgs
{
    pub fn backbone_options(&self) -> anyhow::Result<BackboneOptions>
    {
        Ok(BackboneOptions {
            intra_threads: self.intra_threads,
            output_name: self.output_name.clone(),
            feature_shape: self.output.feature_shape()?,
        })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_extract_defaults()
    {
        let cli = Cli::try_parse_from([
            "caption-features", "extract",
            "--descriptor", "captions_train2014.json",
            "--image-dir", "train2014",
            "--model", "resnet101_conv.onnx",
        ]).unwrap();

        let Command::Extract(args) = cli.command else {
            panic!("Expected the extract subcommand");
        };
        let config = args.output.to_config(args.image_dir.clone()).unwrap();

        assert_eq!(config.feature_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(config.index_path, PathBuf::from(DEFAULT_OUTPUT_DIR).join(INDEX_FILE_NAME));
        assert_eq!(config.feature_shape, [7, 7, 2048]);
        assert_eq!(args.backbone_options().unwrap().intra_threads, DEFAULT_INTRA_THREADS);
    }

    #[test]
    fn test_verify_with_custom_shape_and_index()
    {
        let cli = Cli::try_parse_from([
            "caption-features", "verify",
            "--output-dir", "out",
            "--index-path", "index.bin.gz",
            "--feature-shape", "14,14,512",
        ]).unwrap();

        let Command::Verify(args) = cli.command else {
            panic!("Expected the verify subcommand");
        };
        let config = args.output.to_config(PathBuf::new()).unwrap();

        assert_eq!(config.index_path, PathBuf::from("index.bin.gz"));
        assert_eq!(config.feature_shape, [14, 14, 512]);
        assert!(args.descriptor.is_none());
    }

    #[test]
    fn test_feature_shape_needs_three_dimensions()
    {
        let cli = Cli::try_parse_from([
            "caption-features", "verify", "--feature-shape", "7,7",
        ]).unwrap();

        let Command::Verify(args) = cli.command else {
            panic!("Expected the verify subcommand");
        };
        assert!(args.output.to_config(PathBuf::new()).is_err());
    }
}
