use crate::error::{Error, Result};
use crate::models::{NormalizedImage, PixelFormat, RawImage, RawSource, TargetSize, TensorLayout};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use std::borrow::Cow;

const RESIZE_FILTER: FilterType = FilterType::Triangle;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageNormalizer {
    target: TargetSize,
    layout: TensorLayout,
}

impl ImageNormalizer {
    pub fn new(target: TargetSize, layout: TensorLayout) -> Self {
        Self { target, layout }
    }

    pub fn target(&self) -> TargetSize {
        self.target
    }

    pub fn normalize(&self, image: &RawImage) -> Result<NormalizedImage> {
        let TargetSize { width: w, height: h } = self.target;
        if w == 0 || h == 0 {
            return Err(Error::Normalization(format!(
                "Invalid target size {w}x{h}"
            )));
        }
        let source = decode(image)?;
        if source.width() == 0 || source.height() == 0 {
            return Err(Error::Normalization(format!(
                "Source image has no pixels ({}x{})",
                source.width(),
                source.height()
            )));
        }

        // Distortion is accepted: the model input is fixed, no letterboxing.
        let resized = source.resize_exact(w, h, RESIZE_FILTER).to_rgb8();
        if resized.width() != w || resized.height() != h {
            return Err(Error::Normalization(format!(
                "Resize produced {}x{}, expected {w}x{h}",
                resized.width(),
                resized.height()
            )));
        }
        let data = match self.layout {
            TensorLayout::Nchw => rgb8_to_nchw(&resized, w, h),
            TensorLayout::Nhwc => rgb8_to_nhwc(&resized),
        };
        log::debug!(
            "Normalized {}x{} source to {w}x{h} ({:?})",
            source.width(),
            source.height(),
            self.layout
        );
        Ok(NormalizedImage {
            width: w,
            height: h,
            layout: self.layout,
            data,
        })
    }
}

pub fn normalize(image: &RawImage, target: TargetSize) -> Result<NormalizedImage> {
    ImageNormalizer::new(target, TensorLayout::Nchw).normalize(image)
}

fn decode(image: &RawImage) -> Result<Cow<'_, DynamicImage>> {
    match &image.source {
        RawSource::Decoded(img) => Ok(Cow::Borrowed(img)),
        RawSource::Encoded(bytes) => image::load_from_memory(bytes)
            .map(Cow::Owned)
            .map_err(|e| Error::Normalization(format!("Failed to decode image: {e}"))),
        RawSource::Pixels {
            width,
            height,
            format,
            data,
        } => from_pixels(*width, *height, *format, data).map(Cow::Owned),
    }
}

fn from_pixels(width: u32, height: u32, format: PixelFormat, data: &[u8]) -> Result<DynamicImage> {
    let expected = width as usize * height as usize * format.channels();
    if data.len() != expected {
        return Err(Error::Normalization(format!(
            "{format:?} buffer holds {} bytes, {width}x{height} needs {expected}",
            data.len()
        )));
    }
    let pixels = data.to_vec();
    let image = match format {
        PixelFormat::Luma8 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        PixelFormat::Rgb8 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        PixelFormat::Rgba8 => {
            RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8)
        }
    };
    image.ok_or_else(|| {
        Error::Normalization(format!("Cannot convert {format:?} buffer to RGB"))
    })
}

fn rgb8_to_nhwc(img: &RgbImage) -> Vec<f32> {
    let mut input: Vec<f32> = Vec::with_capacity((img.width() * img.height() * 3) as usize);
    for pixel in img.pixels() {
        input.extend_from_slice(&[
            pixel[0] as f32 / 255.0,
            pixel[1] as f32 / 255.0,
            pixel[2] as f32 / 255.0,
        ]);
    }
    input
}

fn rgb8_to_nchw(img: &RgbImage, w: u32, h: u32) -> Vec<f32> {
    let plane = (w * h) as usize;
    let mut input = vec![0.0; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = (y * w + x) as usize;
        input[idx] = pixel[0] as f32 / 255.0;
        input[idx + plane] = pixel[1] as f32 / 255.0;
        input[idx + plane * 2] = pixel[2] as f32 / 255.0;
    }
    input
}
