use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::fonts::{FontFamily, FontWeight};

pub const QR_SCALE_MIN: f32 = 0.1;
pub const QR_SCALE_MAX: f32 = 0.8;
pub const QR_OFFSET_LIMIT: i32 = 1_000;
pub const TEXT_OFFSET_LIMIT: i32 = 10_000;
pub const FONT_SIZE_MIN: u32 = 12;
pub const FONT_SIZE_MAX: u32 = 1_000;
pub const PADDING_MAX: u32 = 50;
pub const CORNER_RADIUS_MAX: u32 = 50;

/// Named anchor points for offset-relative positioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementPreset {
    Center,
    TopLeft,
    TopCenter,
    TopRight,
    LeftCenter,
    RightCenter,
    BottomLeft,
    BottomCenter,
    BottomRight,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QrPlacement {
    pub preset: PlacementPreset,
    #[serde(default)]
    pub offset_x: i32,
    #[serde(default)]
    pub offset_y: i32,
    /// QR side length as a fraction of the shorter canvas dimension.
    pub scale: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextPlacement {
    pub preset: PlacementPreset,
    #[serde(default)]
    pub offset_x: i32,
    #[serde(default)]
    pub offset_y: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    pub enabled: bool,
    pub placement: TextPlacement,
    pub font_family: FontFamily,
    pub font_size: u32,
    #[serde(default)]
    pub weight: FontWeight,
    pub color: String,
    pub background_color: String,
    pub background_opacity: f32,
    #[serde(default)]
    pub padding: u32,
    #[serde(default)]
    pub corner_radius: u32,
    #[serde(default)]
    pub alignment: TextAlign,
}

/// Strongly-typed replacement for the settings blob the UI posts. Validated as
/// a whole before any image work starts; violations are reported together.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSettings {
    pub qr_position: QrPlacement,
    pub text_overlay: TextStyle,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl TemplateSettings {
    /// Collects every field-level violation instead of stopping at the first.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut errors = Vec::new();

        let qr = &self.qr_position;
        if !(QR_SCALE_MIN..=QR_SCALE_MAX).contains(&qr.scale) || !qr.scale.is_finite() {
            errors.push(format!(
                "qrPosition.scale must be within [{QR_SCALE_MIN}, {QR_SCALE_MAX}], got {}",
                qr.scale
            ));
        }
        if qr.offset_x.abs() > QR_OFFSET_LIMIT {
            errors.push(format!("qrPosition.offsetX must be within ±{QR_OFFSET_LIMIT}, got {}", qr.offset_x));
        }
        if qr.offset_y.abs() > QR_OFFSET_LIMIT {
            errors.push(format!("qrPosition.offsetY must be within ±{QR_OFFSET_LIMIT}, got {}", qr.offset_y));
        }

        let text = &self.text_overlay;
        if text.enabled {
            if text.placement.offset_x.abs() > TEXT_OFFSET_LIMIT {
                errors.push(format!(
                    "textOverlay.placement.offsetX must be within ±{TEXT_OFFSET_LIMIT}, got {}",
                    text.placement.offset_x
                ));
            }
            if text.placement.offset_y.abs() > TEXT_OFFSET_LIMIT {
                errors.push(format!(
                    "textOverlay.placement.offsetY must be within ±{TEXT_OFFSET_LIMIT}, got {}",
                    text.placement.offset_y
                ));
            }
            if !(FONT_SIZE_MIN..=FONT_SIZE_MAX).contains(&text.font_size) {
                errors.push(format!(
                    "textOverlay.fontSize must be within [{FONT_SIZE_MIN}, {FONT_SIZE_MAX}], got {}",
                    text.font_size
                ));
            }
            if parse_hex_color(&text.color).is_none() {
                errors.push(format!("textOverlay.color is not a valid hex color: {:?}", text.color));
            }
            if parse_hex_color(&text.background_color).is_none() {
                errors.push(format!(
                    "textOverlay.backgroundColor is not a valid hex color: {:?}",
                    text.background_color
                ));
            }
            if !(0.0..=1.0).contains(&text.background_opacity) || !text.background_opacity.is_finite() {
                errors.push(format!(
                    "textOverlay.backgroundOpacity must be within [0, 1], got {}",
                    text.background_opacity
                ));
            }
            if text.padding > PADDING_MAX {
                errors.push(format!("textOverlay.padding must be at most {PADDING_MAX}, got {}", text.padding));
            }
            if text.corner_radius > CORNER_RADIUS_MAX {
                errors.push(format!(
                    "textOverlay.cornerRadius must be at most {CORNER_RADIUS_MAX}, got {}",
                    text.corner_radius
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SettingsError::Invalid(errors))
        }
    }
}

/// Accepts `#abc`, `abc`, `#aabbcc` and `aabbcc`.
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let s = s.trim();
    let s = s.strip_prefix('#').unwrap_or(s);
    match s.len() {
        3 => {
            let expanded: String = s.chars().flat_map(|c| [c, c]).collect();
            let bytes = hex::decode(expanded).ok()?;
            Some([bytes[0], bytes[1], bytes[2]])
        }
        6 => {
            let bytes = hex::decode(s).ok()?;
            Some([bytes[0], bytes[1], bytes[2]])
        }
        _ => None,
    }
}

/// Baseline settings used across unit tests.
#[cfg(test)]
pub(crate) fn test_settings() -> TemplateSettings {
    TemplateSettings {
        qr_position: QrPlacement {
            preset: PlacementPreset::Center,
            offset_x: 0,
            offset_y: 0,
            scale: 0.3,
        },
        text_overlay: TextStyle {
            enabled: false,
            placement: TextPlacement {
                preset: PlacementPreset::BottomCenter,
                offset_x: 0,
                offset_y: 40,
            },
            font_family: FontFamily::Arial,
            font_size: 48,
            weight: FontWeight::Normal,
            color: "#222222".into(),
            background_color: "#fff".into(),
            background_opacity: 0.8,
            padding: 12,
            corner_radius: 8,
            alignment: TextAlign::Center,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> TemplateSettings {
        let mut s = test_settings();
        s.text_overlay.enabled = true;
        s
    }

    #[test]
    fn valid_settings_pass() {
        valid_settings().validate().unwrap();
    }

    #[test]
    fn violations_are_aggregated() {
        let mut s = valid_settings();
        s.qr_position.scale = 0.95;
        s.qr_position.offset_x = 5_000;
        s.text_overlay.color = "not-a-color".into();
        s.text_overlay.font_size = 4;

        let err = s.validate().unwrap_err();
        let SettingsError::Invalid(errors) = err;
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn disabled_overlay_skips_text_checks() {
        let mut s = valid_settings();
        s.text_overlay.enabled = false;
        s.text_overlay.color = "garbage".into();
        s.validate().unwrap();
    }

    #[test]
    fn hex_colors_parse_in_both_widths() {
        assert_eq!(parse_hex_color("#fff"), Some([255, 255, 255]));
        assert_eq!(parse_hex_color("1a2b3c"), Some([0x1a, 0x2b, 0x3c]));
        assert_eq!(parse_hex_color("#1234"), None);
        assert_eq!(parse_hex_color("zzzzzz"), None);
    }

    #[test]
    fn settings_deserialize_from_camel_case_json() {
        let json = r##"{
            "qrPosition": {"preset": "bottom-right", "offsetX": 10, "offsetY": -20, "scale": 0.25},
            "textOverlay": {
                "enabled": true,
                "placement": {"preset": "custom", "offsetX": 100, "offsetY": 200},
                "fontFamily": "verdana",
                "fontSize": 64,
                "color": "#000",
                "backgroundColor": "#ffffff",
                "backgroundOpacity": 1.0
            }
        }"##;
        let s: TemplateSettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.qr_position.preset, PlacementPreset::BottomRight);
        assert_eq!(s.text_overlay.placement.preset, PlacementPreset::Custom);
        s.validate().unwrap();
    }
}
