//! Dual static overlay for still images.

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::{remove_stale, WatermarkEngine};
use crate::media::process::is_nonempty_file;
use crate::media::random::RandomSource;

/// Candidate draws before falling back to the fixed corners.
pub const MAX_PLACEMENT_ATTEMPTS: usize = 20;

const STAMP_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Top-left origins of the two stamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub points: [(u32, u32); 2],
    /// Whether the deterministic corner placement was used
    pub fallback: bool,
}

/// Two points count as apart when they differ by at least half the text
/// extent on either axis.
fn separated(a: (u32, u32), b: (u32, u32), text_w: u32, text_h: u32) -> bool {
    a.0.abs_diff(b.0) >= text_w / 2 || a.1.abs_diff(b.1) >= text_h / 2
}

/// Pick two stamp origins by rejection sampling inside the safe interior.
///
/// Falls back to the top-left margin corner and the bottom-right corner
/// (inset by margin and text extent) when two separated candidates are not
/// found within [`MAX_PLACEMENT_ATTEMPTS`] draws.
pub fn choose_placements(
    image_w: u32,
    image_h: u32,
    text_w: u32,
    text_h: u32,
    margin: u32,
    rng: &mut dyn RandomSource,
) -> Placement {
    let max_x = image_w.saturating_sub(text_w).saturating_sub(margin);
    let max_y = image_h.saturating_sub(text_h).saturating_sub(margin);
    let high_x = max_x.max(margin);
    let high_y = max_y.max(margin);

    let mut accepted: Vec<(u32, u32)> = Vec::with_capacity(2);
    for _ in 0..MAX_PLACEMENT_ATTEMPTS {
        if accepted.len() == 2 {
            break;
        }
        let candidate = (
            rng.range_inclusive(margin, high_x),
            rng.range_inclusive(margin, high_y),
        );
        if accepted
            .iter()
            .all(|&point| separated(candidate, point, text_w, text_h))
        {
            accepted.push(candidate);
        }
    }

    if let [first, second] = accepted[..] {
        Placement {
            points: [first, second],
            fallback: false,
        }
    } else {
        Placement {
            points: [(margin, margin), (max_x, max_y)],
            fallback: true,
        }
    }
}

/// Flatten alpha against opaque black.
pub fn flatten_on_black(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
        let blend = |c: u8| ((u16::from(c) * u16::from(a) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Whether `path` should be written losslessly.
fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
}

/// Encode `image` to `output`, PNG for `.png` and JPEG otherwise.
pub fn encode_image(image: &RgbaImage, output: &Path, jpeg_quality: u8) -> Result<(), String> {
    if is_png(output) {
        return image
            .save_with_format(output, ImageFormat::Png)
            .map_err(|e| format!("png encode failed: {e}"));
    }

    let file = File::create(output).map_err(|e| format!("create {}: {e}", output.display()))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, jpeg_quality)
        .encode_image(&DynamicImage::ImageRgb8(flatten_on_black(image)))
        .map_err(|e| format!("jpeg encode failed: {e}"))
}

/// Decoded canvas plus the measured stamp
struct Prepared {
    canvas: RgbaImage,
    font: FontVec,
    scale: PxScale,
    text_w: u32,
    text_h: u32,
}

fn prepare(input: &Path, font_path: &Path, text: &str, font_size_for: impl Fn(u32, u32) -> u32) -> Result<Prepared, String> {
    let canvas = image::open(input)
        .map_err(|e| format!("decode {}: {e}", input.display()))?
        .to_rgba8();
    let bytes = std::fs::read(font_path).map_err(|e| format!("read font {}: {e}", font_path.display()))?;
    let font = FontVec::try_from_vec(bytes).map_err(|e| format!("invalid font {}: {e}", font_path.display()))?;

    let font_px = font_size_for(canvas.width(), canvas.height());
    let scale = PxScale::from(font_px as f32);
    let (text_w, text_h) = text_size(scale, &font, text);

    Ok(Prepared {
        canvas,
        font,
        scale,
        text_w,
        text_h,
    })
}

fn render(mut prepared: Prepared, placement: Placement, text: &str, output: &Path, jpeg_quality: u8) -> Result<(), String> {
    for (x, y) in placement.points {
        draw_text_mut(
            &mut prepared.canvas,
            STAMP_COLOR,
            i32::try_from(x).unwrap_or(i32::MAX),
            i32::try_from(y).unwrap_or(i32::MAX),
            prepared.scale,
            &prepared.font,
            text,
        );
    }
    encode_image(&prepared.canvas, output, jpeg_quality)
}

impl WatermarkEngine {
    /// Stamp the image at `input` twice, writing `output`.
    ///
    /// Returns `output` on success and `input` on any failure.
    pub async fn apply_image_watermark(&self, input: &Path, output: &Path) -> PathBuf {
        if !is_nonempty_file(input).await {
            tracing::error!(path = %input.display(), "image input missing or empty, skipping watermark");
            return input.to_path_buf();
        }
        let Some(font_path) = self.font.clone() else {
            tracing::warn!(path = %input.display(), "no font available for image watermark, skipping");
            return input.to_path_buf();
        };

        remove_stale(output).await;

        match self.render_image(input, output, font_path).await {
            Ok(()) if is_nonempty_file(output).await => output.to_path_buf(),
            Ok(()) => {
                tracing::error!(output = %output.display(), "image watermark produced no output");
                input.to_path_buf()
            }
            Err(e) => {
                tracing::warn!(input = %input.display(), error = %e, "image watermark failed, falling back to original");
                remove_stale(output).await;
                input.to_path_buf()
            }
        }
    }

    async fn render_image(&self, input: &Path, output: &Path, font_path: PathBuf) -> Result<(), String> {
        let spec = self.spec.clone();
        let source = input.to_path_buf();
        let prepared = {
            let spec = spec.clone();
            tokio::task::spawn_blocking(move || {
                prepare(&source, &font_path, &spec.text, |w, h| spec.font_size(w, h))
            })
            .await
            .map_err(|e| format!("decode task failed: {e}"))??
        };

        let placement = self.with_rng(|rng| {
            choose_placements(
                prepared.canvas.width(),
                prepared.canvas.height(),
                prepared.text_w,
                prepared.text_h,
                spec.margin,
                rng,
            )
        });
        tracing::debug!(
            points = ?placement.points,
            fallback = placement.fallback,
            output = %output.display(),
            "watermarking image"
        );

        let target = output.to_path_buf();
        tokio::task::spawn_blocking(move || render(prepared, placement, &spec.text, &target, spec.jpeg_quality))
            .await
            .map_err(|e| format!("render task failed: {e}"))?
    }
}
