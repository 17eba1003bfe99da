//! Context images: a snapshot of the page window around a highlight.
//!
//! Each highlight that produced cards can carry an image of the pages it was
//! read from, so reviewing a card in Anki shows the original layout. Pages
//! are rasterised with pdfium, stacked top to bottom and saved as a small,
//! low-quality JPEG; legibility of the layout matters, not fidelity.
//!
//! Images are named after `(pdf_identity, page)`, so two highlights on the
//! same page share one file and reruns reuse what is already on disk.

use crate::error::HighlightError;
use crate::identity::PdfIdentity;
use crate::output::ContextRecord;
use crate::pipeline::extract::{bind_pdfium, classify_load_error};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, Rgb, RgbImage};
use pdfium_render::prelude::*;
use sha2::{Digest, Sha256};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Width each page is rendered at before stacking.
pub const PAGE_WIDTH_PX: u32 = 1000;

/// Produces a context image for a highlight and returns its file name
/// relative to the media directory.
#[async_trait]
pub trait ContextImager: Send + Sync {
    async fn context_image(&self, context: &ContextRecord) -> Result<String, HighlightError>;

    /// Directory the returned file names are relative to.
    fn media_dir(&self) -> &Path;
}

/// `context_<8 hex>.jpg`, stable for a given document page.
pub fn context_image_name(pdf: &PdfIdentity, page: usize) -> String {
    let digest = hex::encode(Sha256::digest(format!("{}_{}", pdf.as_str(), page)));
    format!("context_{}.jpg", &digest[..8])
}

/// Renders the context window of a highlight with pdfium.
#[derive(Debug, Clone)]
pub struct PageWindowImager {
    pdf_path: PathBuf,
    password: Option<String>,
    media_dir: PathBuf,
    grayscale: bool,
    quality: u8,
}

impl PageWindowImager {
    pub fn new(
        pdf_path: impl Into<PathBuf>,
        password: Option<String>,
        media_dir: impl Into<PathBuf>,
        grayscale: bool,
        quality: u8,
    ) -> Self {
        Self {
            pdf_path: pdf_path.into(),
            password,
            media_dir: media_dir.into(),
            grayscale,
            quality: quality.clamp(1, 100),
        }
    }
}

#[async_trait]
impl ContextImager for PageWindowImager {
    async fn context_image(&self, context: &ContextRecord) -> Result<String, HighlightError> {
        let page = context.highlight.page_number;
        let name = context_image_name(&context.highlight.pdf_identity, page);
        let target = self.media_dir.join(&name);
        if target.exists() {
            debug!("Page {}: reusing {}", page, name);
            return Ok(name);
        }

        let job = self.clone();
        let (first, last) = (context.first_page, context.last_page);
        tokio::task::spawn_blocking(move || job.render_blocking(first, last, &target))
            .await
            .map_err(|e| HighlightError::ContextImageFailed {
                page,
                detail: format!("render task panicked: {e}"),
            })?
            .map_err(|detail| HighlightError::ContextImageFailed { page, detail })?;

        debug!("Page {}: wrote {}", page, name);
        Ok(name)
    }

    fn media_dir(&self) -> &Path {
        &self.media_dir
    }
}

impl PageWindowImager {
    fn render_blocking(&self, first: usize, last: usize, target: &Path) -> Result<(), String> {
        let pdfium = bind_pdfium().map_err(|e| e.to_string())?;
        let document = pdfium
            .load_pdf_from_file(&self.pdf_path, self.password.as_deref())
            .map_err(|e| classify_load_error(e, &self.pdf_path, self.password.as_deref()).to_string())?;

        let render_config = PdfRenderConfig::new().set_target_width(PAGE_WIDTH_PX as i32);
        let pages = document.pages();
        let mut images = Vec::new();
        for page_number in first..=last {
            let index = u16::try_from(page_number.saturating_sub(1))
                .map_err(|_| format!("page {page_number} out of range"))?;
            let page = pages
                .get(index)
                .map_err(|e| format!("page {page_number}: {e:?}"))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| format!("page {page_number}: {e:?}"))?;
            images.push(bitmap.as_image());
        }

        let stacked = stack_vertically(&images);
        let stacked = if self.grayscale {
            stacked.grayscale()
        } else {
            stacked
        };
        write_jpeg(&stacked, self.quality, target)
    }
}

/// Stack images top to bottom on a white canvas as wide as the widest one.
pub fn stack_vertically(images: &[DynamicImage]) -> DynamicImage {
    let width = images.iter().map(|i| i.width()).max().unwrap_or(1).max(1);
    let height = images.iter().map(|i| i.height()).sum::<u32>().max(1);
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut y: i64 = 0;
    for img in images {
        imageops::overlay(&mut canvas, &img.to_rgb8(), 0, y);
        y += i64::from(img.height());
    }
    DynamicImage::ImageRgb8(canvas)
}

/// Encode as JPEG and move into place atomically.
fn write_jpeg(img: &DynamicImage, quality: u8, target: &Path) -> Result<(), String> {
    let dir = target
        .parent()
        .ok_or_else(|| format!("no parent directory for {}", target.display()))?;
    std::fs::create_dir_all(dir).map_err(|e| format!("{}: {e}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| e.to_string())?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
        img.write_with_encoder(encoder).map_err(|e| e.to_string())?;
    }
    tmp.persist(target).map_err(|e| e.error.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_name_is_stable_and_short() {
        let pdf = PdfIdentity::from_bytes(b"book");
        let a = context_image_name(&pdf, 5);
        assert_eq!(a, context_image_name(&pdf, 5));
        assert_ne!(a, context_image_name(&pdf, 6));
        assert!(a.starts_with("context_") && a.ends_with(".jpg"));
        assert_eq!(a.len(), "context_".len() + 8 + ".jpg".len());
    }

    #[test]
    fn stacking_sums_heights_and_takes_max_width() {
        let a = DynamicImage::ImageRgb8(RgbImage::new(10, 4));
        let b = DynamicImage::ImageRgb8(RgbImage::new(6, 3));
        let s = stack_vertically(&[a, b]);
        assert_eq!((s.width(), s.height()), (10, 7));
        // Area right of the narrower page stays white.
        assert_eq!(s.to_rgb8().get_pixel(8, 5), &Rgb([255, 255, 255]));
    }

    #[test]
    fn jpeg_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("media").join("x.jpg");
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])));
        write_jpeg(&img.grayscale(), 10, &target).unwrap();
        let bytes = std::fs::read(&target).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
