//! Animated overlay for motion media.
//!
//! The stamp sweeps along one axis as a function of playback time `t` and
//! wraps around, so it never sits still long enough to be cropped out. The
//! motion is encoded as an ffmpeg `drawtext` expression; [`Motion::position`]
//! evaluates the same function for a known text extent.

use std::path::{Path, PathBuf};

use super::{remove_stale, WatermarkEngine};
use crate::media::process::{is_nonempty_file, RenderResult};
use crate::media::random::RandomSource;

/// Font name handed to drawtext when no font file is available.
const FALLBACK_FONT_NAME: &str = "Sans";

/// Sweep direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LeftToRight,
    RightToLeft,
    TopToBottom,
    BottomToTop,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::LeftToRight,
        Direction::RightToLeft,
        Direction::TopToBottom,
        Direction::BottomToTop,
    ];

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::LeftToRight | Direction::RightToLeft)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::LeftToRight => "left_to_right",
            Direction::RightToLeft => "right_to_left",
            Direction::TopToBottom => "top_to_bottom",
            Direction::BottomToTop => "bottom_to_top",
        }
    }
}

/// Randomized sweep parameters for one render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Motion {
    pub direction: Direction,
    /// Pixels per second of playback along the sweep axis
    pub speed: u32,
    pub start_x: u32,
    pub start_y: u32,
}

impl Motion {
    /// Draw a direction and start offsets for a `width` x `height` frame.
    pub fn choose(width: u32, height: u32, rng: &mut dyn RandomSource) -> Self {
        let direction = Direction::ALL[rng.index(Direction::ALL.len())];
        let speed = if direction.is_horizontal() {
            (width / 6).max(30)
        } else {
            (height / 8).max(20)
        };
        let start_x = rng.range_inclusive(0, width / 4);
        let start_y = rng.range_inclusive(0, height / 4);
        Self {
            direction,
            speed,
            start_x,
            start_y,
        }
    }

    /// Overlay origin at playback time `t` for a stamp of `text_w` x `text_h`.
    pub fn position(
        &self,
        t: f64,
        width: u32,
        height: u32,
        text_w: u32,
        text_h: u32,
        margin: u32,
    ) -> (f64, f64) {
        let travel = |extent: u32, text: u32, start: u32| {
            let span = f64::from(extent) - f64::from(text) - f64::from(margin);
            let offset = t * f64::from(self.speed) + f64::from(start);
            if span <= 0.0 {
                (0.0, span)
            } else {
                (offset.rem_euclid(span), span)
            }
        };

        match self.direction {
            Direction::LeftToRight => (travel(width, text_w, self.start_x).0, f64::from(self.start_y)),
            Direction::RightToLeft => {
                let (x, span) = travel(width, text_w, self.start_x);
                (span.max(0.0) - x, f64::from(self.start_y))
            }
            Direction::TopToBottom => (f64::from(self.start_x), travel(height, text_h, self.start_y).0),
            Direction::BottomToTop => {
                let (y, span) = travel(height, text_h, self.start_y);
                (f64::from(self.start_x), span.max(0.0) - y)
            }
        }
    }

    /// `x` and `y` drawtext expressions, unescaped.
    pub fn expressions(&self, width: u32, height: u32, margin: u32) -> (String, String) {
        let sweep = |extent: u32, axis_text: &str, start: u32| {
            format!(
                "mod(t*{}+{},{}-{}-{})",
                self.speed, start, extent, axis_text, margin
            )
        };
        match self.direction {
            Direction::LeftToRight => (sweep(width, "text_w", self.start_x), self.start_y.to_string()),
            Direction::RightToLeft => (
                format!(
                    "({}-text_w-{})-{}",
                    width,
                    margin,
                    sweep(width, "text_w", self.start_x)
                ),
                self.start_y.to_string(),
            ),
            Direction::TopToBottom => (self.start_x.to_string(), sweep(height, "text_h", self.start_y)),
            Direction::BottomToTop => (
                self.start_x.to_string(),
                format!(
                    "({}-text_h-{})-{}",
                    height,
                    margin,
                    sweep(height, "text_h", self.start_y)
                ),
            ),
        }
    }
}

/// Escape a literal for use as a drawtext option value inside a `-vf` graph.
///
/// Applies the option-level escaping (`\ ' : %`) and then the graph-level
/// escaping (`\ ' , ; [ ]`).
pub fn escape_drawtext(value: &str) -> String {
    escape_graph(&escape_chars(value, &['\\', '\'', ':', '%']))
}

fn escape_graph(value: &str) -> String {
    escape_chars(value, &['\\', '\'', ',', ';', '[', ']'])
}

fn escape_chars(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build the complete drawtext filter for one render.
pub fn drawtext_filter(
    text: &str,
    font_file: Option<&Path>,
    font_size: u32,
    motion: &Motion,
    width: u32,
    height: u32,
    margin: u32,
) -> String {
    let font = match font_file {
        Some(path) => format!("fontfile={}", escape_drawtext(&path.to_string_lossy())),
        None => format!("font={}", FALLBACK_FONT_NAME),
    };
    let (x, y) = motion.expressions(width, height, margin);
    format!(
        "drawtext=text={}:{}:fontsize={}:fontcolor=white:x={}:y={}",
        escape_drawtext(text),
        font,
        font_size,
        escape_graph(&x),
        escape_graph(&y)
    )
}

impl WatermarkEngine {
    /// Burn the sweeping stamp into the video at `input`, writing `output`.
    ///
    /// Returns `output` on success and `input` on any failure; the caller
    /// decides whether an unwatermarked file may be published.
    pub async fn apply_video_watermark(&self, input: &Path, output: &Path) -> PathBuf {
        if !is_nonempty_file(input).await {
            tracing::error!(path = %input.display(), "video input missing or empty, skipping watermark");
            return input.to_path_buf();
        }

        let info = match self.inspector.inspect(input).await {
            Ok(Some(info)) if info.width > 0 && info.height > 0 => info,
            Ok(_) => {
                tracing::warn!(path = %input.display(), "no video stream found, skipping watermark");
                return input.to_path_buf();
            }
            Err(e) => {
                tracing::warn!(path = %input.display(), error = %e, "probe failed, skipping watermark");
                return input.to_path_buf();
            }
        };

        remove_stale(output).await;

        let font_size = self.spec.font_size(info.width, info.height);
        let motion = self.with_rng(|rng| Motion::choose(info.width, info.height, rng));
        let filter = drawtext_filter(
            &self.spec.text,
            self.font.as_deref(),
            font_size,
            &motion,
            info.width,
            info.height,
            self.spec.margin,
        );

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vf".to_string(),
            filter,
            "-c:a".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().into_owned(),
        ];

        tracing::info!(
            direction = motion.direction.as_str(),
            font_size,
            output = %output.display(),
            "watermarking video"
        );
        let run = self.runner.run(&self.ffmpeg_path, &args, self.timeout).await;
        let result = RenderResult::from_output(&run, output).await;

        if result.success {
            result.output_path
        } else {
            tracing::warn!(
                input = %input.display(),
                diagnostic = result.diagnostic.as_deref().unwrap_or_default(),
                "video watermark failed, falling back to original"
            );
            input.to_path_buf()
        }
    }
}
