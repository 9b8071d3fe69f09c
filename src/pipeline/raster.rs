//! Raster images: wrap a single image in a one-page A4 PDF.
//!
//! Transparency is flattened onto white, since printers have no notion of
//! alpha. The image is scaled to fit inside the page margins, preserving its
//! aspect ratio, and centred.

use super::text::{MARGIN, PAGE_HEIGHT, PAGE_WIDTH};
use crate::error::PrintError;
use image::{ImageReader, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;
use tracing::debug;

/// Decode the image at `input` and write it as a single-page PDF to `out`.
pub fn image_to_pdf(input: &Path, out: &Path) -> Result<(), PrintError> {
    let failed = |detail: String| PrintError::ConversionFailed {
        path: input.to_path_buf(),
        detail,
    };

    let decoded = ImageReader::open(input)
        .map_err(|e| failed(format!("open image: {e}")))?
        .with_guessed_format()
        .map_err(|e| failed(format!("detect image format: {e}")))?
        .decode()
        .map_err(|e| failed(format!("decode image: {e}")))?;

    let rgb = flatten_on_white(&decoded);
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(failed("image has no pixels".into()));
    }
    let (draw_w, draw_h) = fit(width, height);
    let x = (PAGE_WIDTH - draw_w) / 2;
    let y = (PAGE_HEIGHT - draw_h) / 2;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width),
            "Height" => i64::from(height),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb.into_raw(),
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(draw_w),
                    0.into(),
                    0.into(),
                    Object::Integer(draw_h),
                    Object::Integer(x),
                    Object::Integer(y),
                ],
            ),
            Operation::new("Do", vec!["Im1".into()]),
            Operation::new("Q", vec![]),
        ],
    }
    .encode()
    .map_err(|e| failed(format!("encode page content: {e}")))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im1" => image_id },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(out)
        .map_err(|e| failed(format!("write {}: {e}", out.display())))?;

    debug!(
        "Wrapped {}x{} image into {} ({}x{} pt)",
        width,
        height,
        out.display(),
        draw_w,
        draw_h
    );
    Ok(())
}

fn flatten_on_white(img: &image::DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * a + 255 * (255 - a)) / 255) as u8;
        rgb.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    rgb
}

/// Size in points of an image scaled to fit inside the margins.
fn fit(width: u32, height: u32) -> (i64, i64) {
    let avail_w = (PAGE_WIDTH - 2 * MARGIN) as f64;
    let avail_h = (PAGE_HEIGHT - 2 * MARGIN) as f64;
    let scale = (avail_w / f64::from(width)).min(avail_h / f64::from(height));
    let w = (f64::from(width) * scale).round().max(1.0) as i64;
    let h = (f64::from(height) * scale).round().max(1.0) as i64;
    (w, h)
}
