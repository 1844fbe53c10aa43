/// On-disk formats for the extracted features and the consolidated caption index.
///
/// Both are bincode-encoded and gzip-compressed. The gzip header is written
/// without a timestamp, so identical inputs produce identical bytes.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array3;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::annotations::AnnotationIndex;
use crate::error::{Error, Result};

pub const FEATURE_EXTENSION: &str = "feat";
pub const INDEX_FILE_NAME: &str = "captions_index.bin.gz";

/// `<feature_dir>/<file_name>.feat`
pub fn feature_artifact_path(feature_dir: &Path, file_name: &str) -> PathBuf
{
    feature_dir.join(format!("{}.{}", file_name, FEATURE_EXTENSION))
}

pub fn write_feature_artifact(path: &Path, features: &Array3<f32>) -> Result<()>
{
    write_compressed(path, features)
}

pub fn read_feature_artifact(path: &Path) -> Result<Array3<f32>>
{
    read_compressed(path)
}

pub fn write_index_artifact(path: &Path, index: &AnnotationIndex) -> Result<()>
{
    write_compressed(path, index)
}

pub fn read_index_artifact(path: &Path) -> Result<AnnotationIndex>
{
    read_compressed(path)
}

fn write_compressed<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()>
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(Error::artifact(parent))?;
    }

    // Overwrites whatever a previous run left behind.
    let file = File::create(path).map_err(Error::artifact(path))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    bincode::serialize_into(&mut encoder, value)?;
    let mut writer = encoder.finish().map_err(Error::artifact(path))?;
    writer.flush().map_err(Error::artifact(path))?;
    Ok(())
}

fn read_compressed<T: DeserializeOwned>(path: &Path) -> Result<T>
{
    let file = File::open(path).map_err(Error::artifact(path))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    Ok(bincode::deserialize_from(decoder)?)
}
