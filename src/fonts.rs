use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rusttype::Font;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use utoipa::ToSchema;

/// Closed set of label fonts. Arbitrary font uploads are not supported; each
/// variant maps to a bundled TTF under the fonts directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum FontFamily {
    Arial,
    Helvetica,
    TimesNewRoman,
    Courier,
    Georgia,
    Verdana,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

impl FontFamily {
    pub fn file_name(self, weight: FontWeight) -> &'static str {
        match (self, weight) {
            (FontFamily::Arial, FontWeight::Normal) => "Arial.ttf",
            (FontFamily::Arial, FontWeight::Bold) => "Arial-Bold.ttf",
            (FontFamily::Helvetica, FontWeight::Normal) => "Helvetica.ttf",
            (FontFamily::Helvetica, FontWeight::Bold) => "Helvetica-Bold.ttf",
            (FontFamily::TimesNewRoman, FontWeight::Normal) => "TimesNewRoman.ttf",
            (FontFamily::TimesNewRoman, FontWeight::Bold) => "TimesNewRoman-Bold.ttf",
            (FontFamily::Courier, FontWeight::Normal) => "Courier.ttf",
            (FontFamily::Courier, FontWeight::Bold) => "Courier-Bold.ttf",
            (FontFamily::Georgia, FontWeight::Normal) => "Georgia.ttf",
            (FontFamily::Georgia, FontWeight::Bold) => "Georgia-Bold.ttf",
            (FontFamily::Verdana, FontWeight::Normal) => "Verdana.ttf",
            (FontFamily::Verdana, FontWeight::Bold) => "Verdana-Bold.ttf",
        }
    }

    /// Average glyph advance as a fraction of the font size. Used to estimate
    /// label dimensions before any glyph is rasterized; exact metrics are not
    /// available at layout-planning time.
    pub fn width_multiplier(self, font_size: u32) -> f32 {
        let base = match self {
            FontFamily::Arial => 0.55,
            FontFamily::Helvetica => 0.55,
            FontFamily::TimesNewRoman => 0.50,
            FontFamily::Courier => 0.60,
            FontFamily::Georgia => 0.53,
            FontFamily::Verdana => 0.58,
        };
        // Very large sizes overestimate; shrink the multiplier slightly.
        if font_size > 200 {
            base * 0.92
        } else {
            base
        }
    }
}

static FONT_CACHE: Lazy<Mutex<HashMap<String, Arc<Font<'static>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn fonts_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FONTS_DIR") {
        return PathBuf::from(dir);
    }
    let manifest_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir.join("assets").join("fonts")
}

pub fn load_font_cached(family: FontFamily, weight: FontWeight) -> Result<Arc<Font<'static>>, String> {
    let name = family.file_name(weight);
    if let Some(f) = FONT_CACHE.lock().get(name) {
        return Ok(Arc::clone(f));
    }

    let bytes = std::fs::read(fonts_dir().join(name))
        .map_err(|e| format!("failed to read font {name}: {e}"))?;
    let f = Font::try_from_vec(bytes).ok_or_else(|| format!("failed to parse font {name}"))?;

    let f = Arc::new(f);
    FONT_CACHE.lock().insert(name.to_string(), Arc::clone(&f));
    Ok(f)
}
