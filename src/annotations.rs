/// Builds the caption index from a COCO-style caption descriptor.
///
/// The descriptor lists images (`id`, `file_name`) and caption annotations
/// (`image_id`, `caption`). The index maps each image id to its filename and
/// its captions, in the order they appear in the descriptor.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct CaptionDescriptor
{
    pub images: Vec<ImageRecord>,
    pub annotations: Vec<CaptionRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ImageRecord
{
    pub id: u64,
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CaptionRecord
{
    pub image_id: u64,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry
{
    pub image_id: u64,
    pub file_name: String,
    pub captions: Vec<String>,
}

impl IndexEntry
{
    /// The entry as the downstream consumer sees it: the filename followed by every caption.
    pub fn sequence(&self) -> Vec<String>
    {
        std::iter::once(self.file_name.clone())
            .chain(self.captions.iter().cloned())
            .collect()
    }
}

/// Image id -> filename and captions.
/// Iterates in insertion order; `positions` gives constant-time lookup by id.
/// File names are unique and relative, since each names its own feature artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(u64, Vec<String>)>", into = "Vec<(u64, Vec<String>)>")]
pub struct AnnotationIndex
{
    entries: Vec<IndexEntry>,
    positions: FxHashMap<u64, usize>,
    file_names: FxHashMap<String, u64>,
}

impl AnnotationIndex
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn from_descriptor_file(path: &Path) -> Result<Self>
    {
        let file = File::open(path).map_err(Error::artifact(path))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self>
    {
        let descriptor: CaptionDescriptor = serde_json::from_reader(reader)?;
        Self::from_descriptor(descriptor)
    }

    pub fn from_descriptor(descriptor: CaptionDescriptor) -> Result<Self>
    {
        let mut index = Self::new();
        for image in descriptor.images {
            index.insert_image(image.id, image.file_name)?;
        }
        for annotation in descriptor.annotations {
            index.add_caption(annotation.image_id, annotation.caption)?;
        }
        Ok(index)
    }

    pub fn insert_image(&mut self, image_id: u64, file_name: String) -> Result<()>
    {
        if self.positions.contains_key(&image_id) {
            return Err(Error::DuplicateImage(image_id));
        }
        if !is_contained(&file_name) {
            return Err(Error::UnsafeFileName(file_name));
        }
        if let Some(&first) = self.file_names.get(&file_name) {
            return Err(Error::DuplicateFileName { file_name, first, second: image_id });
        }
        self.file_names.insert(file_name.clone(), image_id);
        self.positions.insert(image_id, self.entries.len());
        self.entries.push(IndexEntry { image_id, file_name, captions: Vec::new() });
        Ok(())
    }

    pub fn add_caption(&mut self, image_id: u64, caption: String) -> Result<()>
    {
        let position = *self.positions.get(&image_id).ok_or(Error::UnknownImage(image_id))?;
        self.entries[position].captions.push(caption);
        Ok(())
    }

    pub fn get(&self, image_id: u64) -> Option<&IndexEntry>
    {
        self.positions.get(&image_id).map(|&position| &self.entries[position])
    }

    pub fn sequence(&self, image_id: u64) -> Option<Vec<String>>
    {
        self.get(image_id).map(IndexEntry::sequence)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry>
    {
        self.entries.iter()
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    pub fn caption_count(&self) -> usize
    {
        self.entries.iter().map(|entry| entry.captions.len()).sum()
    }
}

// Only plain relative components, so joining onto a directory stays inside it.
fn is_contained(file_name: &str) -> bool
{
    !file_name.is_empty()
        && Path::new(file_name).components().all(|component| matches!(component, Component::Normal(_)))
}

impl From<AnnotationIndex> for Vec<(u64, Vec<String>)>
{
    fn from(index: AnnotationIndex) -> Self
    {
        index.entries.iter().map(|entry| (entry.image_id, entry.sequence())).collect()
    }
}

impl TryFrom<Vec<(u64, Vec<String>)>> for AnnotationIndex
{
    type Error = Error;

    fn try_from(sequences: Vec<(u64, Vec<String>)>) -> Result<Self>
    {
        let mut index = AnnotationIndex::new();
        for (image_id, sequence) in sequences {
            let mut sequence = sequence.into_iter();
            let file_name = sequence
                .next()
                .ok_or_else(|| Error::MalformedIndex(format!("entry {} has no filename", image_id)))?;
            index.insert_image(image_id, file_name)?;
            for caption in sequence {
                index.add_caption(image_id, caption)?;
            }
        }
        Ok(index)
    }
}
