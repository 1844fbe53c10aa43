/// Preprocessing functions for input images to the feature extraction backbone.
/// The constants match the regime the backbone was trained under;
/// changing them silently degrades the features.

use std::path::Path;
use image::{imageops::{self, FilterType}, DynamicImage, RgbImage};
use ndarray::{Array, Dim};

use crate::error::{Error, Result};

pub const RESIZE_SHORTER_SIDE: u32 = 256;
pub const CROP_SIZE: u32 = 224;
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub fn load_image(path: &Path) -> Result<RgbImage>
{
	let img = image::open(path).map_err(|source| Error::ImageLoad { path: path.to_path_buf(), source })?;
	to_rgb(img, path)
}

/// Gray, alpha and 16-bit images all become 8-bit RGB; alpha is dropped.
pub fn to_rgb(img: DynamicImage, path: &Path) -> Result<RgbImage>
{
	let img = img.to_rgb8();
	if img.width() == 0 || img.height() == 0 {
		return Err(Error::EmptyImage(path.to_path_buf()));
	}
	Ok(img)
}

/// Resizes so the shorter side equals `target`, preserving the aspect ratio.
/// The longer side is truncated, not rounded.
pub fn resize_shorter_side(img: &RgbImage, target: u32) -> RgbImage
{
	let (width, height) = img.dimensions();
	let (new_width, new_height) = if width <= height {
		(target, (target as u64 * height as u64 / width as u64) as u32)
	} else {
		((target as u64 * width as u64 / height as u64) as u32, target)
	};
	imageops::resize(img, new_width, new_height, FilterType::Triangle)
}

pub fn center_crop(img: &RgbImage, size: u32) -> RgbImage
{
	let (width, height) = img.dimensions();
	let left = (width.saturating_sub(size) as f64 / 2.0).round() as u32;
	let top = (height.saturating_sub(size) as f64 / 2.0).round() as u32;
	imageops::crop_imm(img, left, top, size, size).to_image()
}

// Convert the image to the 4D NCHW array the backbone expects, as a batch of one.
pub fn image_to_backbone_format(img: &RgbImage) -> Array<f32, Dim<[usize; 4]>>
{
	let (width, height) = img.dimensions();
	let mut image_input = Array::zeros((1, 3, height as usize, width as usize));
	for (x, y, pixel) in img.enumerate_pixels() {
		let (x, y) = (x as usize, y as usize);
		for (channel, value) in pixel.0.iter().enumerate() {
			image_input[[0, channel, y, x]] =
				((*value as f32) / 255. - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
		}
	}

	image_input
}

pub fn load_and_normalize(path: &Path) -> Result<Array<f32, Dim<[usize; 4]>>>
{
	let img = load_image(path)?;
	let img = resize_shorter_side(&img, RESIZE_SHORTER_SIDE);
	let img = center_crop(&img, CROP_SIZE);
	Ok(image_to_backbone_format(&img))
}
