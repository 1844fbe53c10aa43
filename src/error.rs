use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error(transparent)]
    Ort(#[from] ort::Error),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error("Error loading image {path:?}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Image {0:?} has a zero-sized dimension")]
    EmptyImage(PathBuf),
    #[error("Caption references image id {0}, which is not in the descriptor's image list")]
    UnknownImage(u64),
    #[error("Image id {0} appears more than once in the descriptor")]
    DuplicateImage(u64),
    #[error("Image file name {0:?} must be a relative path without `..` components")]
    UnsafeFileName(String),
    #[error("Images {first} and {second} share the file name {file_name:?}")]
    DuplicateFileName {
        file_name: String,
        first: u64,
        second: u64,
    },
    #[error("Expected a feature tensor of shape {expected:?}, got {actual:?}")]
    FeatureShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Error accessing artifact {path:?}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed model: {0}")]
    MalformedModel(String),
    #[error("Malformed index artifact: {0}")]
    MalformedIndex(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn artifact(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Artifact { path, source }
    }
}
