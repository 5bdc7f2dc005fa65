//! Per-participant compositing: QR raster + optional label over the shared
//! template, with canvas expansion when a placement lands off the template.

use std::sync::Arc;
use std::time::Duration;

use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgba};
use qrcode::{EcLevel, QrCode};
use thiserror::Error;
use tracing::warn;

use crate::expansion::{self, BBox, ExpansionError};
use crate::model::ParticipantRecord;
use crate::payload::QrPayload;
use crate::placement;
use crate::settings::TemplateSettings;
use crate::text_overlay::{self, TextError};
use crate::util;

type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Base raster size for the QR before it is resized to the placement target.
pub const QR_BASE_SIZE: u32 = 400;
pub const QR_MARGIN_MODULES: u32 = 2;
pub const QR_EC_LEVEL: EcLevel = EcLevel::M;
/// Plain-QR side length used by the fallback path.
pub const FALLBACK_QR_SIZE: u32 = 400;
pub const TEMPLATE_MIN_DIM: u32 = 100;
/// Largest accepted template side. A small compressed file can declare an
/// enormous frame, so this is checked from the header before any decode
/// allocation happens.
pub const TEMPLATE_MAX_DIM: u32 = expansion::CANVAS_SAFE_CEILING;

pub const MAX_RETRIES: u32 = 2;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    #[error("qr encoding failed: {0}")]
    QrEncode(String),
    #[error("participant {participant_id} failed at {step}: {message}")]
    Step {
        participant_id: String,
        step: &'static str,
        message: String,
    },
    #[error("compose timed out")]
    Timeout,
    #[error("compose task failed: {0}")]
    Task(String),
}

/// Decode and size-check the uploaded template. Done once per batch; the
/// resulting buffer is shared read-only across all compose calls.
pub fn validate_template(bytes: &[u8]) -> Result<RgbaImage, ComposeError> {
    let (w, h) = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ComposeError::InvalidTemplate(format!("unreadable image header: {e}")))?
        .into_dimensions()
        .map_err(|e| ComposeError::InvalidTemplate(format!("not a decodable raster image: {e}")))?;
    if w > TEMPLATE_MAX_DIM || h > TEMPLATE_MAX_DIM {
        return Err(ComposeError::InvalidTemplate(format!(
            "template must be at most {TEMPLATE_MAX_DIM}x{TEMPLATE_MAX_DIM} px, got {w}x{h}"
        )));
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| ComposeError::InvalidTemplate(format!("not a decodable raster image: {e}")))?;
    if img.width() < TEMPLATE_MIN_DIM || img.height() < TEMPLATE_MIN_DIM {
        return Err(ComposeError::InvalidTemplate(format!(
            "template must be at least {TEMPLATE_MIN_DIM}x{TEMPLATE_MIN_DIM} px, got {}x{}",
            img.width(),
            img.height()
        )));
    }
    Ok(img.to_rgba8())
}

/// Render the payload as a QR raster at `target` px per side.
pub fn qr_raster(payload: &QrPayload, target: u32) -> Result<RgbaImage, ComposeError> {
    let bytes = payload
        .to_bytes()
        .map_err(|e| ComposeError::QrEncode(e.to_string()))?;
    let code = QrCode::with_error_correction_level(&bytes, QR_EC_LEVEL)
        .map_err(|e| ComposeError::QrEncode(e.to_string()))?;

    let width_modules = code.width() as u32;
    let total_modules = width_modules + 2 * QR_MARGIN_MODULES;
    let pixels_per_module = (QR_BASE_SIZE / total_modules).max(1);
    let actual_size = total_modules * pixels_per_module;

    let mut img = RgbaImage::from_pixel(actual_size, actual_size, Rgba([255, 255, 255, 255]));
    for y in 0..width_modules {
        for x in 0..width_modules {
            if matches!(code[(x as usize, y as usize)], qrcode::Color::Dark) {
                let px0 = (x + QR_MARGIN_MODULES) * pixels_per_module;
                let py0 = (y + QR_MARGIN_MODULES) * pixels_per_module;
                for py in py0..(py0 + pixels_per_module) {
                    for px in px0..(px0 + pixels_per_module) {
                        img.put_pixel(px, py, Rgba([0, 0, 0, 255]));
                    }
                }
            }
        }
    }

    if actual_size != target {
        Ok(DynamicImage::ImageRgba8(img)
            .resize_exact(target, target, FilterType::Lanczos3)
            .to_rgba8())
    } else {
        Ok(img)
    }
}

/// Alpha-composite `over` onto `base` at signed coordinates, clipping anything
/// that falls outside the base.
pub fn overlay_alpha(base: &mut RgbaImage, over: &RgbaImage, x: i64, y: i64) {
    for oy in 0..over.height() {
        for ox in 0..over.width() {
            let bx = x + i64::from(ox);
            let by = y + i64::from(oy);
            if bx < 0 || by < 0 || bx >= i64::from(base.width()) || by >= i64::from(base.height()) {
                continue;
            }
            let p = over.get_pixel(ox, oy);
            let a = f32::from(p.0[3]) / 255.0;
            if a <= 0.0 {
                continue;
            }
            let dst = base.get_pixel_mut(bx as u32, by as u32);
            let inv = 1.0 - a;
            dst.0[0] = (f32::from(p.0[0]) * a + f32::from(dst.0[0]) * inv) as u8;
            dst.0[1] = (f32::from(p.0[1]) * a + f32::from(dst.0[1]) * inv) as u8;
            dst.0[2] = (f32::from(p.0[2]) * a + f32::from(dst.0[2]) * inv) as u8;
            dst.0[3] = 255;
        }
    }
}

fn step_err(participant_id: &str, step: &'static str, message: impl ToString) -> ComposeError {
    ComposeError::Step {
        participant_id: participant_id.to_string(),
        step,
        message: message.to_string(),
    }
}

/// Compose one participant's output image. Idempotent apart from the payload
/// timestamp; safe to call again on retry.
pub fn compose(
    template: &RgbaImage,
    payload: &QrPayload,
    settings: &TemplateSettings,
    label_text: Option<&str>,
    participant_id: &str,
) -> Result<Vec<u8>, ComposeError> {
    let _span = crate::perf_scope!("compose");
    let (tw, th) = (template.width(), template.height());

    // QR layer.
    let qr_target = ((tw.min(th) as f32) * settings.qr_position.scale).round().max(1.0) as u32;
    let qr = qr_raster(payload, qr_target)
        .map_err(|e| step_err(participant_id, "qr-encode", e))?;
    let (qr_x, qr_y) = placement::position(
        tw,
        th,
        qr_target,
        qr_target,
        settings.qr_position.preset,
        settings.qr_position.offset_x,
        settings.qr_position.offset_y,
    );

    // Optional text layer. Invalid content fails the attempt (the caller
    // degrades to the fallback); an engine failure on valid text only drops
    // the label.
    let style = &settings.text_overlay;
    let mut label: Option<(RgbaImage, i64, i64)> = None;
    if style.enabled {
        if let Some(raw) = label_text {
            let sanitized = text_overlay::sanitize_label(raw)
                .map_err(|e| step_err(participant_id, "label-sanitize", e))?;
            match text_overlay::render_label(&sanitized, style, Some(tw)) {
                Ok(img) => {
                    let (lx, ly) = placement::position(
                        tw,
                        th,
                        img.width(),
                        img.height(),
                        style.placement.preset,
                        style.placement.offset_x,
                        style.placement.offset_y,
                    );
                    label = Some((img, lx, ly));
                }
                Err(TextError::TextOverlayCreationFailed(msg)) => {
                    warn!(participant_id, %msg, "text overlay failed; continuing without label");
                }
                Err(e @ TextError::InvalidTextContent) => {
                    return Err(step_err(participant_id, "label-sanitize", e));
                }
            }
        }
    }

    // Expansion.
    let mut boxes = vec![BBox { x: qr_x, y: qr_y, w: qr_target, h: qr_target }];
    if let Some((img, lx, ly)) = &label {
        boxes.push(BBox { x: *lx, y: *ly, w: img.width(), h: img.height() });
    }
    let exp = expansion::plan(tw, th, &boxes).map_err(|e: ExpansionError| {
        step_err(participant_id, "canvas-expansion", e)
    })?;

    // Composite, translating by the left/top growth.
    let (dx, dy) = (i64::from(exp.left), i64::from(exp.top));
    let mut canvas = if exp.is_needed() {
        let mut c = RgbaImage::from_pixel(exp.new_width, exp.new_height, Rgba([255, 255, 255, 255]));
        overlay_alpha(&mut c, template, dx, dy);
        c
    } else {
        template.clone()
    };
    overlay_alpha(&mut canvas, &qr, qr_x + dx, qr_y + dy);
    if let Some((img, lx, ly)) = &label {
        overlay_alpha(&mut canvas, img, lx + dx, ly + dy);
    }

    util::png_encode_rgba8(&canvas).map_err(|e| step_err(participant_id, "png-encode", e))
}

/// Compose with a per-item timeout and a bounded retry loop. Only
/// timeout-class failures are retried; everything else escalates immediately.
pub async fn compose_with_retry(
    template: Arc<RgbaImage>,
    participant: &ParticipantRecord,
    settings: Arc<TemplateSettings>,
    item_timeout: Duration,
) -> Result<Vec<u8>, ComposeError> {
    let mut attempt: u32 = 0;
    loop {
        let tmpl = Arc::clone(&template);
        let cfg = Arc::clone(&settings);
        let p = participant.clone();
        let work = tokio::task::spawn_blocking(move || {
            let payload = QrPayload::for_participant(&p);
            compose(&tmpl, &payload, &cfg, Some(&p.name), &p.id)
        });

        match tokio::time::timeout(item_timeout, work).await {
            Ok(Ok(result)) => return result,
            Ok(Err(join_err)) => return Err(ComposeError::Task(join_err.to_string())),
            Err(_elapsed) => {
                if attempt >= MAX_RETRIES {
                    return Err(ComposeError::Timeout);
                }
                attempt += 1;
                warn!(
                    participant_id = %participant.id,
                    attempt,
                    "compose timed out; retrying with backoff"
                );
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
        }
    }
}

/// Degraded output: plain QR, no template, no text. Used when full
/// compositing fails so the participant is never silently dropped.
pub fn fallback_png(payload: &QrPayload) -> Result<Vec<u8>, ComposeError> {
    let img = qr_raster(payload, FALLBACK_QR_SIZE)?;
    util::png_encode_rgba8(&img).map_err(ComposeError::QrEncode)
}
