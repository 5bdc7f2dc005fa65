use thiserror::Error;

/// Preferred ceiling: optional expansion is always clamped here.
pub const CANVAS_SAFE_CEILING: u32 = 20_000;
/// Absolute ceiling: a requirement past this fails the item.
pub const CANVAS_HARD_CEILING: u32 = 50_000;
/// Breathing room added around any element that protrudes.
pub const EXPANSION_MARGIN: u32 = 20;

/// Signed bounding box of a placed element; may extend past the canvas.
#[derive(Debug, Clone, Copy)]
pub struct BBox {
    pub x: i64,
    pub y: i64,
    pub w: u32,
    pub h: u32,
}

/// Extensions beyond the original template, each ≥ 0, plus the resulting
/// canvas size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasExpansion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
    pub new_width: u32,
    pub new_height: u32,
}

impl CanvasExpansion {
    pub fn is_needed(&self) -> bool {
        self.top > 0 || self.right > 0 || self.bottom > 0 || self.left > 0
    }
}

#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("required canvas {width}x{height} exceeds the {limit} px ceiling")]
    TemplateTooLarge { width: u64, height: u64, limit: u32 },
}

/// Decide how far the output canvas must grow so the given element boxes are
/// not clipped. Expansion past the safe ceiling is silently clamped (visual
/// clipping is preferred over failure); only a requirement past the hard
/// ceiling is an error.
pub fn plan(
    template_w: u32,
    template_h: u32,
    boxes: &[BBox],
) -> Result<CanvasExpansion, ExpansionError> {
    let tw = i64::from(template_w);
    let th = i64::from(template_h);

    let mut left: i64 = 0;
    let mut top: i64 = 0;
    let mut right: i64 = 0;
    let mut bottom: i64 = 0;
    for b in boxes {
        left = left.max(-b.x);
        top = top.max(-b.y);
        right = right.max(b.x + i64::from(b.w) - tw);
        bottom = bottom.max(b.y + i64::from(b.h) - th);
    }

    let margin = i64::from(EXPANSION_MARGIN);
    let mut left = if left > 0 { left + margin } else { 0 };
    let mut top = if top > 0 { top + margin } else { 0 };
    let mut right = if right > 0 { right + margin } else { 0 };
    let mut bottom = if bottom > 0 { bottom + margin } else { 0 };

    let required_w = (tw + left + right) as u64;
    let required_h = (th + top + bottom) as u64;
    if required_w > u64::from(CANVAS_HARD_CEILING) || required_h > u64::from(CANVAS_HARD_CEILING) {
        return Err(ExpansionError::TemplateTooLarge {
            width: required_w,
            height: required_h,
            limit: CANVAS_HARD_CEILING,
        });
    }

    // Clamp optional growth to the safe ceiling, never below the template's
    // own size. Left/top keep priority so translated coordinates stay stable.
    let cap_w = i64::from(CANVAS_SAFE_CEILING).max(tw);
    let cap_h = i64::from(CANVAS_SAFE_CEILING).max(th);
    let extra_w = cap_w - tw;
    let extra_h = cap_h - th;
    left = left.min(extra_w);
    right = right.min(extra_w - left).max(0);
    top = top.min(extra_h);
    bottom = bottom.min(extra_h - top).max(0);

    Ok(CanvasExpansion {
        top: top as u32,
        right: right as u32,
        bottom: bottom as u32,
        left: left as u32,
        new_width: (tw + left + right) as u32,
        new_height: (th + top + bottom) as u32,
    })
}
