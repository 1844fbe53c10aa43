use std::path::Path;

use log::info;
use ndarray::{Array3, Array4, ArrayViewD, Axis, Ix4};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, ValueType};

use crate::error::{Error, Result};

/// (height, width, channels) of one image's feature map.
pub type FeatureShape = [usize; 3];

/// Final convolutional stage of a ResNet-style backbone at 224x224 input.
pub const DEFAULT_FEATURE_SHAPE: FeatureShape = [7, 7, 2048];
pub const DEFAULT_INTRA_THREADS: usize = 4;

/// Maps one normalized image to its feature map.
///
/// Implementations are frozen: the same input always yields the same output.
pub trait FeatureExtractor
{
    fn feature_shape(&self) -> FeatureShape;

    /// `image` is a batch of one, shaped (1, 3, H, W).
    /// Returns the feature map shaped (height, width, channels).
    fn extract(&self, image: Array4<f32>) -> Result<Array3<f32>>;
}

#[derive(Debug, Clone)]
pub struct BackboneOptions
{
    pub intra_threads: usize,
    /// Graph output holding the feature map. Defaults to the first output.
    pub output_name: Option<String>,
    pub feature_shape: FeatureShape,
}

impl Default for BackboneOptions
{
    fn default() -> Self
    {
        BackboneOptions {
            intra_threads: DEFAULT_INTRA_THREADS,
            output_name: None,
            feature_shape: DEFAULT_FEATURE_SHAPE,
        }
    }
}

/// A pretrained image classification backbone truncated to its last convolutional stage,
/// executed with ONNX Runtime.
///
/// The ONNX graph is expected to take a (1, 3, 224, 224) input and return a (1, C, H, W)
/// feature map. Running through ONNX Runtime is inference only; there are no gradients
/// and the weights never change.
pub struct OnnxBackbone
{
    session: Session,
    output_name: String,
    feature_shape: FeatureShape,
}

impl OnnxBackbone
{
    pub fn new(model_path: &Path, options: &BackboneOptions) -> Result<Self>
    {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(options.intra_threads)?
            .with_execution_providers([CPUExecutionProvider::default().build()])?
            .commit_from_file(model_path)?;

        let declared: Vec<String> = session.outputs.iter().map(|output| output.name.clone()).collect();
        let output_name = resolve_output_name(options.output_name.as_deref(), &declared)
            .map_err(|e| Error::MalformedModel(format!("{:?}: {}", model_path, e)))?;

        let output = session.outputs.iter().find(|output| output.name == output_name);
        if let Some(ValueType::Tensor { dimensions, .. }) = output.map(|output| &output.output_type) {
            check_declared_shape(dimensions, options.feature_shape)
                .map_err(|e| Error::MalformedModel(format!("{:?}: {}", model_path, e)))?;
        }

        info!("Loaded backbone {:?}, reading output {:?}", model_path, output_name);

        Ok(OnnxBackbone { session, output_name, feature_shape: options.feature_shape })
    }
}

impl FeatureExtractor for OnnxBackbone
{
    fn feature_shape(&self) -> FeatureShape
    {
        self.feature_shape
    }

    fn extract(&self, image: Array4<f32>) -> Result<Array3<f32>>
    {
        let input = Tensor::from_array(image)?;
        let outputs = self.session.run(ort::inputs![input]?)?;

        let output = outputs.get(self.output_name.as_str())
            .ok_or_else(|| Error::MalformedModel(format!("no output named {:?}", self.output_name)))?
            .try_extract_tensor::<f32>()?;

        feature_map_to_hwc(output)
    }
}

/// Drops the batch axis of a (1, C, H, W) feature map and reorders it to (H, W, C).
/// The result is in standard (row-major) layout.
pub fn feature_map_to_hwc(feature_map: ArrayViewD<f32>) -> Result<Array3<f32>>
{
    let feature_map = feature_map.into_dimensionality::<Ix4>()?;

    if feature_map.len_of(Axis(0)) != 1 {
        let actual = feature_map.shape().to_vec();
        let mut expected = actual.clone();
        expected[0] = 1;
        return Err(Error::FeatureShape { expected, actual });
    }

    let hwc = feature_map.index_axis_move(Axis(0), 0).permuted_axes([1, 2, 0]);
    Ok(hwc.as_standard_layout().into_owned())
}

/// Picks the graph output to read. A requested name must be one the model declares;
/// otherwise the first declared output is used.
pub fn resolve_output_name(requested: Option<&str>, declared: &[String]) -> std::result::Result<String, String>
{
    match requested {
        Some(name) if declared.iter().any(|d| d == name) => Ok(name.to_string()),
        Some(name) => Err(format!("no output named {:?}, the model declares {:?}", name, declared)),
        None => declared.first().cloned().ok_or_else(|| "the model declares no outputs".to_string()),
    }
}

/// Compares the dims a model declares for its output, (1, C, H, W), with the expected
/// (H, W, C). Dynamic dims (negative) match anything.
pub fn check_declared_shape(dimensions: &[i64], expected: FeatureShape) -> std::result::Result<(), String>
{
    let [height, width, channels] = expected;
    let expected_nchw = [1, channels as i64, height as i64, width as i64];
    let matches = dimensions.len() == 4
        && dimensions.iter().zip(expected_nchw.iter()).all(|(&declared, &want)| declared < 0 || declared == want);
    if !matches {
        return Err(format!("declared output dims {:?} do not match (1, C, H, W) = {:?}", dimensions, expected_nchw));
    }
    Ok(())
}

pub fn check_feature_shape(features: &Array3<f32>, expected: FeatureShape) -> Result<()>
{
    if features.shape() != &expected[..] {
        return Err(Error::FeatureShape {
            expected: expected.to_vec(),
            actual: features.shape().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use ndarray::{Array, IxDyn};

    use super::*;

    #[test]
    fn test_feature_map_reordered_to_hwc()
    {
        // Value encodes its own (c, h, w) position.
        let nchw = Array::from_shape_fn(IxDyn(&[1, 4, 2, 3]), |idx| {
            (idx[1] * 100 + idx[2] * 10 + idx[3]) as f32
        });

        let hwc = feature_map_to_hwc(nchw.view()).unwrap();

        assert_eq!(hwc.shape(), &[2, 3, 4]);
        assert_eq!(hwc[[1, 2, 3]], 312.0);
        assert_eq!(hwc[[0, 1, 2]], 201.0);
        assert!(hwc.is_standard_layout());
    }

    #[test]
    fn test_feature_map_with_wrong_rank_fails()
    {
        let flat = Array::<f32, _>::zeros(IxDyn(&[1, 2048]));
        assert!(matches!(feature_map_to_hwc(flat.view()), Err(Error::Shape(_))));
    }

    #[test]
    fn test_feature_map_with_batch_fails()
    {
        let batch = Array::<f32, _>::zeros(IxDyn(&[2, 8, 7, 7]));
        let result = feature_map_to_hwc(batch.view());
        assert!(matches!(result, Err(Error::FeatureShape { .. })));
    }

    #[test]
    fn test_output_name_defaults_to_first()
    {
        let declared = vec!["features".to_string(), "logits".to_string()];
        assert_eq!(resolve_output_name(None, &declared).unwrap(), "features");
        assert_eq!(resolve_output_name(Some("logits"), &declared).unwrap(), "logits");
    }

    #[test]
    fn test_unknown_output_name_is_rejected()
    {
        let declared = vec!["features".to_string()];
        assert!(resolve_output_name(Some("nope"), &declared).is_err());
        assert!(resolve_output_name(None, &[]).is_err());
    }

    #[test]
    fn test_declared_dims_checked_against_feature_shape()
    {
        assert!(check_declared_shape(&[1, 2048, 7, 7], DEFAULT_FEATURE_SHAPE).is_ok());
        // Symbolic batch and spatial dims are accepted.
        assert!(check_declared_shape(&[-1, 2048, -1, -1], DEFAULT_FEATURE_SHAPE).is_ok());
        assert!(check_declared_shape(&[1, 512, 14, 14], DEFAULT_FEATURE_SHAPE).is_err());
        assert!(check_declared_shape(&[1, 1000], DEFAULT_FEATURE_SHAPE).is_err());
    }

    #[test]
    fn test_check_feature_shape()
    {
        let features = Array3::<f32>::zeros((7, 7, 2048));
        assert!(check_feature_shape(&features, DEFAULT_FEATURE_SHAPE).is_ok());
        assert!(matches!(
            check_feature_shape(&features, [14, 14, 512]),
            Err(Error::FeatureShape { .. })
        ));
    }
}
