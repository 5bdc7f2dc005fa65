//! Label rasterization: sanitized name text over a padded, rounded,
//! semi-transparent background box.
//!
//! Dimensions are planned from a per-family width multiplier rather than real
//! glyph metrics, so the layout step never needs the font file. The descent
//! reservation is mandatory; descenders (y g p q j) must never clip.

use image::{ImageBuffer, Rgba};
use rusttype::{point, Font, Scale};
use thiserror::Error;

use crate::fonts::{self, FontFamily};
use crate::settings::{parse_hex_color, TextAlign, TextStyle};
use crate::util;

pub const MAX_LABEL_CHARS: usize = 100;
/// Fraction of the font size reserved below the baseline.
pub const DESCENT_RATIO: f32 = 0.25;
/// Extra space between wrapped lines, as a fraction of the font size.
pub const LINE_SPACING_RATIO: f32 = 0.2;

#[derive(Debug, Error)]
pub enum TextError {
    #[error("label text is empty after sanitization")]
    InvalidTextContent,
    #[error("text overlay creation failed: {0}")]
    TextOverlayCreationFailed(String),
}

/// Strip control characters and markup-significant characters, then truncate
/// to [`MAX_LABEL_CHARS`] with an ellipsis.
pub fn sanitize_label(text: &str) -> Result<String, TextError> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | '&' | '{' | '}'))
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return Err(TextError::InvalidTextContent);
    }
    Ok(util::truncate_with_ellipsis(&cleaned, MAX_LABEL_CHARS))
}

pub fn line_ascent(font_size: u32) -> f32 {
    font_size as f32
}

pub fn line_descent(font_size: u32) -> f32 {
    font_size as f32 * DESCENT_RATIO
}

pub fn line_height(font_size: u32) -> f32 {
    line_ascent(font_size) + line_descent(font_size) + font_size as f32 * LINE_SPACING_RATIO
}

/// Estimated pixel width of one line before any glyph is rendered.
pub fn estimate_line_width(text: &str, family: FontFamily, font_size: u32) -> u32 {
    let chars = text.chars().count() as f32;
    (chars * font_size as f32 * family.width_multiplier(font_size)).ceil() as u32
}

/// Greedy word wrap against estimated widths. A single word wider than the
/// limit keeps its own line rather than being broken mid-word.
pub fn wrap_words(text: &str, family: FontFamily, font_size: u32, max_width: u32) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if estimate_line_width(&candidate, family, font_size) <= max_width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Planned label geometry: wrapped lines plus the content box (without
/// padding) they occupy.
#[derive(Debug, Clone)]
pub struct LabelLayout {
    pub lines: Vec<String>,
    pub content_width: u32,
    pub content_height: u32,
}

pub fn layout_label(text: &str, style: &TextStyle, max_width: Option<u32>) -> LabelLayout {
    let family = style.font_family;
    let size = style.font_size;

    let lines = match max_width {
        Some(limit) => wrap_words(text, family, size, limit),
        None => vec![text.to_string()],
    };
    let lines = if lines.is_empty() { vec![text.to_string()] } else { lines };

    let content_width = lines
        .iter()
        .map(|l| estimate_line_width(l, family, size))
        .max()
        .unwrap_or(1)
        .max(1);
    let spacing = size as f32 * LINE_SPACING_RATIO;
    let content_height =
        (lines.len() as f32 * line_height(size) - spacing).ceil().max(1.0) as u32;

    LabelLayout { lines, content_width, content_height }
}

/// Full box occupied by the rendered label, padding included. This is what
/// the expansion planner sees.
pub fn label_extent(text: &str, style: &TextStyle, max_width: Option<u32>) -> (u32, u32) {
    let layout = layout_label(text, style, max_width);
    (
        layout.content_width + 2 * style.padding,
        layout.content_height + 2 * style.padding,
    )
}

/// Rasterize the label. `text` must already be sanitized.
pub fn render_label(
    text: &str,
    style: &TextStyle,
    max_width: Option<u32>,
) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>, TextError> {
    let layout = layout_label(text, style, max_width);
    let w = layout.content_width + 2 * style.padding;
    let h = layout.content_height + 2 * style.padding;

    let mut img = ImageBuffer::from_pixel(w, h, Rgba([0, 0, 0, 0]));

    let bg = parse_hex_color(&style.background_color).ok_or_else(|| {
        TextError::TextOverlayCreationFailed(format!(
            "bad background color {:?}",
            style.background_color
        ))
    })?;
    let bg_alpha = (style.background_opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    if bg_alpha > 0 {
        let radius = style.corner_radius.min(w / 2).min(h / 2);
        fill_rounded_rect(&mut img, w, h, radius, Rgba([bg[0], bg[1], bg[2], bg_alpha]));
    }

    let fg = parse_hex_color(&style.color)
        .ok_or_else(|| TextError::TextOverlayCreationFailed(format!("bad text color {:?}", style.color)))?;
    let font = fonts::load_font_cached(style.font_family, style.weight)
        .map_err(TextError::TextOverlayCreationFailed)?;

    let size = style.font_size;
    for (i, line) in layout.lines.iter().enumerate() {
        let line_w = estimate_line_width(line, style.font_family, size);
        let x = match style.alignment {
            TextAlign::Left => style.padding,
            TextAlign::Center => style.padding + (layout.content_width.saturating_sub(line_w)) / 2,
            TextAlign::Right => style.padding + layout.content_width.saturating_sub(line_w),
        };
        let y = style.padding as f32 + i as f32 * line_height(size);
        draw_line(&mut img, &font, size as f32, x as i32, y, Rgba([fg[0], fg[1], fg[2], 255]), line);
    }

    Ok(img)
}

fn draw_line(
    img: &mut ImageBuffer<Rgba<u8>, Vec<u8>>,
    font: &Font<'static>,
    px: f32,
    x: i32,
    y: f32,
    color: Rgba<u8>,
    text: &str,
) {
    let scale = Scale::uniform(px);
    let mut caret_x = x as f32;
    // Baseline sits at the reserved ascent, not at the glyph metrics' ascent,
    // so the planned descent band below stays untouched by layout drift.
    let baseline_y = y + line_ascent(px as u32);

    for ch in text.chars() {
        let glyph = font.glyph(ch).scaled(scale).positioned(point(caret_x, baseline_y));
        if let Some(bb) = glyph.pixel_bounding_box() {
            glyph.draw(|gx, gy, v| {
                let px_x = gx as i32 + bb.min.x;
                let px_y = gy as i32 + bb.min.y;
                if px_x < 0 || px_y < 0 {
                    return;
                }
                let (px_x, px_y) = (px_x as u32, px_y as u32);
                if px_x >= img.width() || px_y >= img.height() {
                    return;
                }
                let a = (v * 255.0) as u8;
                if a == 0 {
                    return;
                }
                let dst = img.get_pixel_mut(px_x, px_y);
                let sa = a as f32 / 255.0;
                let inv = 1.0 - sa;
                dst.0[0] = (color.0[0] as f32 * sa + dst.0[0] as f32 * inv) as u8;
                dst.0[1] = (color.0[1] as f32 * sa + dst.0[1] as f32 * inv) as u8;
                dst.0[2] = (color.0[2] as f32 * sa + dst.0[2] as f32 * inv) as u8;
                dst.0[3] = dst.0[3].max(a);
            });
        }
        caret_x += glyph.unpositioned().h_metrics().advance_width;
    }
}

fn fill_rounded_rect(
    img: &mut ImageBuffer<Rgba<u8>, Vec<u8>>,
    w: u32,
    h: u32,
    r: u32,
    color: Rgba<u8>,
) {
    if r == 0 {
        for y in 0..h {
            for x in 0..w {
                img.put_pixel(x, y, color);
            }
        }
        return;
    }

    let (w_i, h_i, r_i) = (w as i32, h as i32, r as i32);
    for yy in 0..h_i {
        for xx in 0..w_i {
            let mut inside = true;
            if xx < r_i && yy < r_i {
                let dx = xx - (r_i - 1);
                let dy = yy - (r_i - 1);
                inside = dx * dx + dy * dy <= r_i * r_i;
            } else if xx >= w_i - r_i && yy < r_i {
                let dx = xx - (w_i - r_i);
                let dy = yy - (r_i - 1);
                inside = dx * dx + dy * dy <= r_i * r_i;
            } else if xx < r_i && yy >= h_i - r_i {
                let dx = xx - (r_i - 1);
                let dy = yy - (h_i - r_i);
                inside = dx * dx + dy * dy <= r_i * r_i;
            } else if xx >= w_i - r_i && yy >= h_i - r_i {
                let dx = xx - (w_i - r_i);
                let dy = yy - (h_i - r_i);
                inside = dx * dx + dy * dy <= r_i * r_i;
            }
            if inside {
                img.put_pixel(xx as u32, yy as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::test_settings;

    fn style() -> TextStyle {
        let mut s = test_settings().text_overlay;
        s.enabled = true;
        s
    }

    #[test]
    fn sanitize_strips_control_and_markup_chars() {
        assert_eq!(sanitize_label("Ana\u{0007} <b>Lima</b>").unwrap(), "Ana bLima/b");
        assert_eq!(sanitize_label("  spaced   out  ").unwrap(), "spaced out");
    }

    #[test]
    fn sanitize_rejects_unrenderable_input() {
        assert!(matches!(sanitize_label("\u{0001}\u{0002}\u{0003}"), Err(TextError::InvalidTextContent)));
        assert!(matches!(sanitize_label("   "), Err(TextError::InvalidTextContent)));
        assert!(matches!(sanitize_label("<<<>>>"), Err(TextError::InvalidTextContent)));
    }

    #[test]
    fn sanitize_truncates_long_names_with_ellipsis() {
        let long = "x".repeat(250);
        let out = sanitize_label(&long).unwrap();
        assert_eq!(out.chars().count(), MAX_LABEL_CHARS + 1);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn descender_band_is_always_reserved() {
        let mut s = style();
        s.padding = 0;
        for text in ["gypsy", "jjjj", "plaque"] {
            let (_, h) = label_extent(text, &s, None);
            let ascent_only = line_ascent(s.font_size);
            assert!(
                h as f32 >= ascent_only + line_descent(s.font_size),
                "height {h} too small for descenders at size {}",
                s.font_size
            );
        }
    }

    #[test]
    fn wrapping_respects_the_estimated_width_budget() {
        let s = style();
        let lines = wrap_words(
            "alpha beta gamma delta epsilon",
            s.font_family,
            s.font_size,
            estimate_line_width("alpha beta", s.font_family, s.font_size),
        );
        assert!(lines.len() >= 2);
        for line in &lines {
            assert!(
                estimate_line_width(line, s.font_family, s.font_size)
                    <= estimate_line_width("alpha beta", s.font_family, s.font_size)
            );
        }
    }

    #[test]
    fn oversized_single_word_keeps_its_own_line() {
        let s = style();
        let lines = wrap_words("incomprehensibilities", s.font_family, s.font_size, 30);
        assert_eq!(lines, vec!["incomprehensibilities".to_string()]);
    }

    #[test]
    fn multi_line_layout_grows_by_line_height() {
        let mut s = style();
        s.padding = 0;
        let one = layout_label("one", &s, None);
        let two = layout_label("one two", &s, Some(estimate_line_width("one", s.font_family, s.font_size) + 1));
        assert_eq!(two.lines.len(), 2);
        assert!(two.content_height > one.content_height);
    }

    #[test]
    fn label_extent_includes_padding_on_both_sides() {
        let mut s = style();
        s.padding = 15;
        let (w_pad, h_pad) = label_extent("name", &s, None);
        s.padding = 0;
        let (w, h) = label_extent("name", &s, None);
        assert_eq!(w_pad, w + 30);
        assert_eq!(h_pad, h + 30);
    }

    #[test]
    fn background_box_is_painted_even_without_fonts() {
        // Rendering with no font available fails, but the geometry helpers
        // behind it stay usable; check the rounded background fill directly.
        let mut img = ImageBuffer::from_pixel(40, 20, Rgba([0, 0, 0, 0]));
        fill_rounded_rect(&mut img, 40, 20, 6, Rgba([10, 20, 30, 200]));
        // Center is filled.
        assert_eq!(img.get_pixel(20, 10).0, [10, 20, 30, 200]);
        // Extreme corner pixel is carved away.
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
    }
}
