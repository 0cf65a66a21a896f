//! PDF page rasterizer shared by the native and scanned paths (spec §4.6
//! Stage 3/4, Scanned-path pipeline). Grounded on
//! `examples/other_examples/f45e0006_august99us-fetch__fetch-core-src-index-provider-pdf.rs.rs`'s
//! `page.render_with_config`/image-crate interop, with `pdfium-render` as the
//! concrete dependency per
//! `examples/other_examples/manifests/carles-abarca-docling-rs/Cargo.toml`.

use super::elements::BoundingBox;
use crate::error::{PartitionError, Result};
use image::{DynamicImage, GenericImageView};
use pdfium_render::prelude::{Pdfium, PdfRenderConfig};

fn bind_pdfium(page: u32) -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_system_library()
        .or_else(|_| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")))
        .map_err(|e| PartitionError::RenderFailed {
            page,
            reason: format!("no pdfium library available: {e}"),
        })?;
    Ok(Pdfium::new(bindings))
}

/// Renders `page_number` (1-indexed) of `pdf_bytes` at `dpi`, returning the
/// rasterized page alongside its dimensions in PDF points — needed to map a
/// PDF-space [`BoundingBox`] into the pixel space of the rendered bitmap.
fn render_page(pdf_bytes: &[u8], page_number: u32, dpi: u32) -> Result<(DynamicImage, f32, f32)> {
    let pdfium = bind_pdfium(page_number)?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf_bytes, None)
        .map_err(|e| PartitionError::RenderFailed {
            page: page_number,
            reason: e.to_string(),
        })?;
    let page = document
        .pages()
        .get((page_number.saturating_sub(1)) as u16)
        .map_err(|e| PartitionError::RenderFailed {
            page: page_number,
            reason: e.to_string(),
        })?;

    let width_pt = page.width().value;
    let height_pt = page.height().value;
    let target_width = ((width_pt / 72.0) * dpi as f32).round().max(1.0) as i32;

    let bitmap = page
        .render_with_config(&PdfRenderConfig::new().set_target_width(target_width))
        .map_err(|e| PartitionError::RenderFailed {
            page: page_number,
            reason: e.to_string(),
        })?;

    Ok((bitmap.as_image(), width_pt, height_pt))
}

fn encode_png(image: &DynamicImage, page_number: u32) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut bytes);
    image
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| PartitionError::RenderFailed {
            page: page_number,
            reason: e.to_string(),
        })?;
    Ok(bytes)
}

/// Crops a rendered page to a PDF-space bounding box (bottom-left origin)
/// by converting it into the rendered bitmap's top-left-origin pixel space.
fn crop_to_bbox(image: &DynamicImage, page_width_pt: f32, page_height_pt: f32, bbox: &BoundingBox) -> DynamicImage {
    let scale = if page_width_pt > 0.0 {
        image.width() as f32 / page_width_pt
    } else {
        1.0
    };

    let (img_w, img_h) = image.dimensions();
    let px_x = ((bbox.x * scale).max(0.0) as u32).min(img_w.saturating_sub(1));
    let px_y = (((page_height_pt - bbox.y - bbox.height) * scale).max(0.0) as u32).min(img_h.saturating_sub(1));
    let px_w = ((bbox.width * scale).max(1.0) as u32).min(img_w.saturating_sub(px_x)).max(1);
    let px_h = ((bbox.height * scale).max(1.0) as u32).min(img_h.saturating_sub(px_y)).max(1);

    image.crop_imm(px_x, px_y, px_w, px_h)
}

/// Renders the region of `page_number` covered by `bbox` to PNG bytes (C6
/// Stage 3: table element images).
pub fn render_table_crop(pdf_bytes: &[u8], page_number: u32, dpi: u32, bbox: &BoundingBox) -> Result<Vec<u8>> {
    let (page_image, page_width_pt, page_height_pt) = render_page(pdf_bytes, page_number, dpi)?;
    let cropped = crop_to_bbox(&page_image, page_width_pt, page_height_pt, bbox);
    encode_png(&cropped, page_number)
}

/// Renders the whole of `page_number` to PNG bytes (C6 Stage 4 full-page
/// images, and every page of the scanned path).
pub fn render_full_page(pdf_bytes: &[u8], page_number: u32, dpi: u32) -> Result<Vec<u8>> {
    let (image, _, _) = render_page(pdf_bytes, page_number, dpi)?;
    encode_png(&image, page_number)
}
