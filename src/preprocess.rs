use image::{imageops::FilterType, ImageReader};
use ndarray::{Array, Ix4};
use std::io::Cursor;
use thiserror::Error;

/// Side length of the square input the network was trained on.
pub const INPUT_SIZE: usize = 128;
pub const INPUT_CHANNELS: usize = 3;

const CHANNEL_MEAN: [f32; INPUT_CHANNELS] = [0.5, 0.5, 0.5];
const CHANNEL_STD: [f32; INPUT_CHANNELS] = [0.5, 0.5, 0.5];

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Empty image payload")]
    Empty,
    #[error("Error reading image: {0}")]
    Read(#[from] std::io::Error),
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decodes raw upload bytes into a normalized `1x3x128x128` tensor.
pub fn image_to_tensor(image_data: &[u8]) -> Result<Array<f32, Ix4>, PreprocessError> {
    if image_data.is_empty() {
        return Err(PreprocessError::Empty);
    }

    let original_img = ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()?
        .decode()?;

    let rgb = original_img.to_rgb8();
    let side = INPUT_SIZE as u32;
    let img = image::imageops::resize(&rgb, side, side, FilterType::Triangle);

    let mut input = Array::zeros((1, INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE));
    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for (channel, value) in pixel.0.iter().enumerate() {
            let scaled = *value as f32 / 255.;
            input[[0, channel, y, x]] = (scaled - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
        }
    }

    Ok(input)
}
