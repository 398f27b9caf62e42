//! Image normalization: raw upload bytes to a `(1, H, W, 3)` tensor.

use std::io::Cursor;

use image::ImageReader;
use ndarray::{Array3, Array4, Axis};

/// Model input: batch of one RGB image, `(1, height, width, 3)`, values 0-255.
pub type Tensor = Array4<u8>;

/// One unit of image input, as received from a transport.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub payload: Vec<u8>,
    pub filename: Option<String>,
}

impl ImageFrame {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("<unnamed>")
    }
}

/// The payload could not be decoded as a raster image.
#[derive(Debug, thiserror::Error)]
#[error("Cannot decode image {filename}")]
pub struct DecodeError {
    pub filename: String,
    #[source]
    pub source: image::ImageError,
}

/// Decode `frame` and lay its pixels out as a single-image RGB batch.
///
/// The format is sniffed from the bytes. Grayscale and alpha images are
/// converted to RGB; no resizing or scaling happens here.
pub fn normalize(frame: &ImageFrame) -> Result<Tensor, DecodeError> {
    let decode_error = |source| DecodeError {
        filename: frame.display_name().to_string(),
        source,
    };

    let image = ImageReader::new(Cursor::new(&frame.payload))
        .with_guessed_format()
        .map_err(|e| decode_error(image::ImageError::IoError(e)))?
        .decode()
        .map_err(decode_error)?;

    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let pixels = Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        rgb.get_pixel(x as u32, y as u32)[c]
    });

    Ok(pixels.insert_axis(Axis(0)))
}
