//! Cropped preview synthesis for located coordinates.
//!
//! Given a full-resolution frame and a point in the locator's 0 to 999 space,
//! produce a small crop centered on that point with a pointer glyph overlaid
//! next to it. Pure image math; the only I/O in this module is the optional
//! cursor-asset read, which is bounded so it can never stall a generation
//! flow.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tokio::time::timeout;
use tracing::debug;

use crate::coords::Coordinate;

/// Rendered size of the pointer glyph, in output pixels.
const CURSOR_SIZE: u32 = 50;

/// Glyph offset from the target point: right and up.
const CURSOR_DX: f64 = 5.0;
const CURSOR_DY: f64 = -5.0;

/// How long an optional cursor asset may take to load before the built-in
/// glyph is used instead.
const CURSOR_LOAD_TIMEOUT: Duration = Duration::from_secs(2);

/// Crop tunables.
///
/// The crop height is `height_percent` of the source height; the crop width
/// is `height_percent * aspect` percent of the source width.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotOptions {
    pub height_percent: f64,
    pub aspect: f64,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            height_percent: 15.0,
            aspect: 2.5,
        }
    }
}

/// Crop the frame around a located point and overlay the pointer glyph.
///
/// Returns `None` for the negative "no location found" sentinel and for
/// sources too small to yield a non-empty crop. The target point is centered
/// except near edges, where the crop clamps to stay inside the source.
pub fn coordinate_snapshot(
    image: &DynamicImage,
    coord: Coordinate,
    opts: SnapshotOptions,
    cursor: &RgbaImage,
) -> Option<RgbaImage> {
    if coord.is_sentinel() {
        return None;
    }

    let width = f64::from(image.width());
    let height = f64::from(image.height());
    let out_w = (opts.height_percent * opts.aspect / 100.0 * width).round() as u32;
    let out_h = (opts.height_percent / 100.0 * height).round() as u32;
    if out_w == 0 || out_h == 0 {
        return None;
    }

    let target_x = f64::from(coord.x) / 999.0 * width;
    let target_y = f64::from(coord.y) / 999.0 * height;

    let crop_x = (target_x - f64::from(out_w) / 2.0)
        .min(width - f64::from(out_w))
        .max(0.0)
        .floor() as u32;
    let crop_y = (target_y - f64::from(out_h) / 2.0)
        .min(height - f64::from(out_h))
        .max(0.0)
        .floor() as u32;

    let mut canvas = image.crop_imm(crop_x, crop_y, out_w, out_h).to_rgba8();

    // Glyph position is relative to the crop, not the source.
    let cursor_x = (target_x - f64::from(crop_x) + CURSOR_DX).round() as i64;
    let cursor_y = (target_y - f64::from(crop_y) + CURSOR_DY).round() as i64;
    let resized;
    let glyph = if cursor.dimensions() == (CURSOR_SIZE, CURSOR_SIZE) {
        cursor
    } else {
        resized = image::imageops::resize(cursor, CURSOR_SIZE, CURSOR_SIZE, FilterType::Lanczos3);
        &resized
    };
    image::imageops::overlay(&mut canvas, glyph, cursor_x, cursor_y);

    Some(canvas)
}

/// Encode a preview for attachment to an instruction. Lossless.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Load a configured cursor asset, giving up after a bounded wait.
///
/// Any failure (missing file, bad image data, slow read) falls back to the
/// built-in glyph so preview synthesis never hangs on a decoration.
pub async fn load_cursor(path: &Path) -> RgbaImage {
    let read = timeout(CURSOR_LOAD_TIMEOUT, tokio::fs::read(path)).await;
    match read {
        Ok(Ok(bytes)) => match image::load_from_memory(&bytes) {
            Ok(img) => return img.to_rgba8(),
            Err(err) => debug!(path = %path.display(), %err, "cursor asset not decodable"),
        },
        Ok(Err(err)) => debug!(path = %path.display(), %err, "cursor asset not readable"),
        Err(_) => debug!(path = %path.display(), "cursor asset load timed out"),
    }
    builtin_cursor()
}

/// Built-in pointer glyph: a white arrow with a dark outline, tip at the
/// upper-left of its box.
pub fn builtin_cursor() -> RgbaImage {
    let mut img = RgbaImage::new(CURSOR_SIZE, CURSOR_SIZE);
    let outline = Rgba([25, 25, 25, 255]);
    let fill = Rgba([250, 250, 250, 255]);
    // Arrowhead.
    fill_triangle(&mut img, (4.0, 2.0), (4.0, 40.0), (30.0, 28.0), outline);
    fill_triangle(&mut img, (7.0, 9.0), (7.0, 33.0), (24.0, 25.0), fill);
    // Tail.
    stroke(&mut img, (16.0, 29.0), (24.0, 46.0), 7.0, outline);
    stroke(&mut img, (16.0, 29.0), (22.0, 42.0), 3.0, fill);
    img
}

fn fill_triangle(
    img: &mut RgbaImage,
    a: (f64, f64),
    b: (f64, f64),
    c: (f64, f64),
    color: Rgba<u8>,
) {
    let area =
        |p: (f64, f64), q: (f64, f64), r: (f64, f64)| -> f64 {
            ((p.0 * (q.1 - r.1) + q.0 * (r.1 - p.1) + r.0 * (p.1 - q.1)) / 2.0).abs()
        };
    let total = area(a, b, c);
    if total <= f64::EPSILON {
        return;
    }
    for y in 0..img.height() {
        for x in 0..img.width() {
            let p = (f64::from(x) + 0.5, f64::from(y) + 0.5);
            let sum = area(p, b, c) + area(a, p, c) + area(a, b, p);
            if (sum - total).abs() <= 0.8 {
                img.put_pixel(x, y, color);
            }
        }
    }
}

/// Stamp discs along a segment, clipping at the image edge.
fn stroke(img: &mut RgbaImage, from: (f64, f64), to: (f64, f64), width: f64, color: Rgba<u8>) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let steps = (dx * dx + dy * dy).sqrt().max(1.0).ceil() as u32;
    let radius = (width / 2.0).max(0.6);
    for step in 0..=steps {
        let t = f64::from(step) / f64::from(steps);
        let (cx, cy) = (from.0 + dx * t, from.1 + dy * t);
        let r2 = radius * radius;
        for y in (cy - radius).floor().max(0.0) as u32..img.height() {
            if f64::from(y) > cy + radius {
                break;
            }
            for x in (cx - radius).floor().max(0.0) as u32..img.width() {
                if f64::from(x) > cx + radius {
                    break;
                }
                let (px, py) = (f64::from(x) - cx, f64::from(y) - cy);
                if px * px + py * py <= r2 {
                    img.put_pixel(x, y, color);
                }
            }
        }
    }
}
