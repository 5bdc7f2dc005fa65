//! Pure preset+offset geometry. Offsets are applied unmodified; a result
//! outside the canvas is intentional and handled by the expansion planner.

use crate::settings::PlacementPreset;

/// Edge and corner presets sit at 10% / 90% of the relevant dimension.
const EDGE_FRACTION: f64 = 0.1;

/// Absolute top-left coordinates for an element of `elem_w × elem_h` on a
/// `canvas_w × canvas_h` canvas. Coordinates are signed: negative values and
/// values past the canvas edge are valid outputs.
pub fn position(
    canvas_w: u32,
    canvas_h: u32,
    elem_w: u32,
    elem_h: u32,
    preset: PlacementPreset,
    offset_x: i32,
    offset_y: i32,
) -> (i64, i64) {
    let cw = f64::from(canvas_w);
    let ch = f64::from(canvas_h);
    let ew = f64::from(elem_w);
    let eh = f64::from(elem_h);

    let center_x = (cw - ew) / 2.0;
    let center_y = (ch - eh) / 2.0;
    let near_x = cw * EDGE_FRACTION;
    let near_y = ch * EDGE_FRACTION;
    let far_x = cw * (1.0 - EDGE_FRACTION) - ew;
    let far_y = ch * (1.0 - EDGE_FRACTION) - eh;

    let (base_x, base_y) = match preset {
        PlacementPreset::Center => (center_x, center_y),
        PlacementPreset::TopLeft => (near_x, near_y),
        PlacementPreset::TopCenter => (center_x, near_y),
        PlacementPreset::TopRight => (far_x, near_y),
        PlacementPreset::LeftCenter => (near_x, center_y),
        PlacementPreset::RightCenter => (far_x, center_y),
        PlacementPreset::BottomLeft => (near_x, far_y),
        PlacementPreset::BottomCenter => (center_x, far_y),
        PlacementPreset::BottomRight => (far_x, far_y),
        // Custom anchors at the canvas origin; the offsets are the position.
        PlacementPreset::Custom => (0.0, 0.0),
    };

    (
        base_x.round() as i64 + i64::from(offset_x),
        base_y.round() as i64 + i64::from(offset_y),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_exact_for_even_remainders() {
        assert_eq!(position(800, 1200, 600, 600, PlacementPreset::Center, 0, 0), (100, 300));
    }

    #[test]
    fn offsets_are_added_unmodified() {
        let (x, y) = position(800, 1200, 600, 600, PlacementPreset::Center, -250, 550);
        assert_eq!((x, y), (-150, 850));
    }

    #[test]
    fn corners_interpolate_between_10_and_90_percent() {
        assert_eq!(position(1000, 1000, 100, 100, PlacementPreset::TopLeft, 0, 0), (100, 100));
        assert_eq!(position(1000, 1000, 100, 100, PlacementPreset::BottomRight, 0, 0), (800, 800));
        assert_eq!(position(1000, 1000, 100, 100, PlacementPreset::TopRight, 0, 0), (800, 100));
        assert_eq!(position(1000, 1000, 100, 100, PlacementPreset::BottomLeft, 0, 0), (100, 800));
    }

    #[test]
    fn edges_center_the_orthogonal_axis() {
        assert_eq!(position(1000, 1000, 100, 100, PlacementPreset::TopCenter, 0, 0), (450, 100));
        assert_eq!(position(1000, 1000, 100, 100, PlacementPreset::LeftCenter, 0, 0), (100, 450));
        assert_eq!(position(1000, 1000, 100, 100, PlacementPreset::RightCenter, 0, 0), (800, 450));
        assert_eq!(position(1000, 1000, 100, 100, PlacementPreset::BottomCenter, 0, 0), (450, 800));
    }

    #[test]
    fn custom_uses_offsets_as_absolute_position() {
        assert_eq!(position(1000, 1000, 50, 50, PlacementPreset::Custom, 333, -20), (333, -20));
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        let a = position(817, 1193, 211, 97, PlacementPreset::BottomRight, 13, -7);
        for _ in 0..10 {
            assert_eq!(position(817, 1193, 211, 97, PlacementPreset::BottomRight, 13, -7), a);
        }
    }
}
