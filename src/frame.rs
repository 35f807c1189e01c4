use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat};

/// A decoded raster frame captured from the shared screen.
///
/// Clones share the underlying pixel buffer, so frames can be stashed,
/// forwarded through channels, and attached to generator requests without
/// copying image data.
#[derive(Clone)]
pub struct Frame {
    image: Arc<DynamicImage>,
}

impl Frame {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode as a base64 PNG data URL for embedding in a generator message.
    pub fn to_data_url(&self) -> Result<String, image::ImageError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(&buf)))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// One capture: a display-scaled frame for generator calls and the
/// non-scaled original for coordinate lookup and preview cropping.
#[derive(Debug, Clone)]
pub struct FramePair {
    pub scaled: Frame,
    pub full: Frame,
}

impl FramePair {
    /// Build a pair from a single frame (scaled == full).
    pub fn unscaled(frame: Frame) -> Self {
        Self {
            scaled: frame.clone(),
            full: frame,
        }
    }
}
