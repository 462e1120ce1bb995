use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::annotation::Annotation;
use crate::flatten;

/// An encoded raster (PNG bytes), cheap to clone and share across history
/// entries. Serialized as a base64 string; data-URL prefixes are accepted
/// on input.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData(Arc<[u8]>);

impl ImageData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.to_base64())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let payload = match encoded.split_once(',') {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => encoded,
        };
        let bytes = BASE64
            .decode(payload.trim())
            .context("cannot decode base64 image data")?;
        Ok(Self::new(bytes))
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.0).context("cannot decode raster image")
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageData({} bytes)", self.0.len())
    }
}

impl Serialize for ImageData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for ImageData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        ImageData::from_base64(&encoded).map_err(de::Error::custom)
    }
}

/// Backing bitmap pair: the base image and the current composite (base
/// with the annotation store rendered on top).
pub struct RasterSurface {
    base_encoded: ImageData,
    base: DynamicImage,
    rendered: DynamicImage,
}

impl RasterSurface {
    pub fn from_encoded(data: ImageData) -> Result<Self> {
        let base = data.decode()?;
        let rendered = base.clone();
        Ok(Self {
            base_encoded: data,
            base,
            rendered,
        })
    }

    pub fn width(&self) -> u32 {
        self.base.width()
    }

    pub fn height(&self) -> u32 {
        self.base.height()
    }

    pub fn base(&self) -> &DynamicImage {
        &self.base
    }

    pub fn base_encoded(&self) -> &ImageData {
        &self.base_encoded
    }

    pub fn rendered(&self) -> &DynamicImage {
        &self.rendered
    }

    /// Recomputes the composite from the base image and the given store.
    pub fn redraw(&mut self, annotations: &[Annotation]) -> Result<()> {
        self.rendered = flatten::flatten(&self.base, annotations)?;
        Ok(())
    }

    /// Encodes the current composite as PNG.
    pub fn export_png(&self) -> Result<ImageData> {
        flatten::encode_png(&self.rendered).map(ImageData::new)
    }

    /// Swaps in a new base image; the composite resets to the bare base
    /// until the next `redraw`.
    pub fn replace_base(&mut self, data: ImageData) -> Result<()> {
        let base = data.decode().context("cannot decode base image")?;
        self.rendered = base.clone();
        self.base = base;
        self.base_encoded = data;
        Ok(())
    }

    /// Restores the composite verbatim from an encoded bitmap, leaving the
    /// base image and dimensions untouched. Raster-only history fallback.
    pub fn restore_raster(&mut self, data: &ImageData) -> Result<()> {
        self.rendered = data.decode().context("cannot decode history bitmap")?;
        Ok(())
    }

    /// Extracts a region of the current composite as encoded PNG.
    pub fn crop_rendered(&self, x: u32, y: u32, width: u32, height: u32) -> Result<ImageData> {
        let region = self.rendered.crop_imm(x, y, width, height);
        flatten::encode_png(&region).map(ImageData::new)
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, RgbaImage};

    use super::{ImageData, RasterSurface};
    use crate::flatten;

    fn checker_png() -> ImageData {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            64,
            48,
            image::Rgba([200, 200, 200, 255]),
        ));
        ImageData::new(flatten::encode_png(&image).expect("encode"))
    }

    #[test]
    fn base64_round_trip() {
        let data = checker_png();
        let restored = ImageData::from_base64(&data.to_base64()).expect("decode");
        assert_eq!(data, restored);
    }

    #[test]
    fn data_url_prefix_is_accepted() {
        let data = checker_png();
        let restored = ImageData::from_base64(&data.to_data_url()).expect("decode");
        assert_eq!(data, restored);
    }

    #[test]
    fn malformed_base64_is_an_error() {
        assert!(ImageData::from_base64("not/base64!!").is_err());
    }

    #[test]
    fn surface_tracks_base_dimensions() {
        let surface = RasterSurface::from_encoded(checker_png()).expect("surface");
        assert_eq!(surface.width(), 64);
        assert_eq!(surface.height(), 48);
    }

    #[test]
    fn crop_rendered_shrinks_the_composite() {
        let surface = RasterSurface::from_encoded(checker_png()).expect("surface");
        let region = surface.crop_rendered(10, 10, 20, 15).expect("crop");
        let decoded = region.decode().expect("decode");
        assert_eq!(decoded.width(), 20);
        assert_eq!(decoded.height(), 15);
    }
}
