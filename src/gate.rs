/// Update gate: decides whether a light takes part in a periodic update.
///
/// A light is updated when it is on and either nothing has been set yet or
/// it still shows the color we set last cycle. Anything else means someone
/// recolored it by hand, so it is left alone until a forced update.

use crate::color::LightColor;

/// xy values are rounded to 3 decimals before they are sent; lights echo them
/// back with float noise.
const XY_TOLERANCE: f64 = 0.0005;

/// True if `reported` is the same color as `last_set`, in the same unit.
pub fn same_color(reported: &LightColor, last_set: &LightColor) -> bool {
    match (reported, last_set) {
        (LightColor::Xy(x1, y1), LightColor::Xy(x2, y2)) => {
            (x1 - x2).abs() <= XY_TOLERANCE && (y1 - y2).abs() <= XY_TOLERANCE
        }
        (LightColor::Mired(a), LightColor::Mired(b)) => a == b,
        (LightColor::Rgb(a), LightColor::Rgb(b)) => a == b,
        _ => false,
    }
}

pub fn should_update(
    light_is_on: bool,
    light_current_color: Option<&LightColor>,
    last_color_set: Option<&LightColor>,
) -> bool {
    if !light_is_on {
        return false;
    }
    match last_color_set {
        None => true,
        Some(last) => light_current_color.is_some_and(|current| same_color(current, last)),
    }
}
