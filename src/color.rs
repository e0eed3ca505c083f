/// Color model: correlated color temperature → RGB → CIE xy + brightness, and mired.
///
/// Kelvin → RGB uses Tanner Helland's curve fit (valid 1000K–40000K).
/// RGB → xy applies sRGB gamma expansion followed by the Wide RGB D65 matrix;
/// the inverse path is provided so lights reporting xy can be checked against
/// what we sent.

use serde::Deserialize;

pub const MIN_KELVIN: u32 = 1000;
pub const MAX_KELVIN: u32 = 40000;

/// Which attribute the lights are driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Xy,
    Mired,
    Rgb,
}

impl std::fmt::Display for ColorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorMode::Xy => f.write_str("xy"),
            ColorMode::Mired => f.write_str("mired"),
            ColorMode::Rgb => f.write_str("rgb"),
        }
    }
}

/// 8-bit RGB triple as lights report and accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

/// A color in the unit of one `ColorMode`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightColor {
    Xy(f64, f64),
    Mired(u32),
    Rgb(Rgb),
}

impl LightColor {
    pub fn mode(&self) -> ColorMode {
        match self {
            LightColor::Xy(..) => ColorMode::Xy,
            LightColor::Mired(_) => ColorMode::Mired,
            LightColor::Rgb(_) => ColorMode::Rgb,
        }
    }
}

impl std::fmt::Display for LightColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LightColor::Xy(x, y) => write!(f, "x:{x} y:{y}"),
            LightColor::Mired(m) => write!(f, "mired:{m}"),
            LightColor::Rgb(rgb) => write!(f, "rgb:{rgb}"),
        }
    }
}

/// Everything derived from one color temperature, in every unit we can send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluxColor {
    pub kelvin: f64,
    /// Unrounded RGB, each channel in 0..=255.
    pub rgb: (f64, f64, f64),
    pub xy: (f64, f64),
    pub brightness: u8,
}

impl FluxColor {
    pub fn from_kelvin(kelvin: f64) -> Self {
        let rgb = kelvin_to_rgb(kelvin);
        let (x, y, brightness) = rgb_to_xy(rgb.0, rgb.1, rgb.2);
        Self {
            kelvin,
            rgb,
            xy: (x, y),
            brightness,
        }
    }

    pub fn rgb8(&self) -> Rgb {
        Rgb {
            r: channel(self.rgb.0),
            g: channel(self.rgb.1),
            b: channel(self.rgb.2),
        }
    }

    pub fn mired(&self) -> u32 {
        kelvin_to_mired(self.kelvin)
    }

    pub fn to_light_color(&self, mode: ColorMode) -> LightColor {
        match mode {
            ColorMode::Xy => LightColor::Xy(self.xy.0, self.xy.1),
            ColorMode::Mired => LightColor::Mired(self.mired()),
            ColorMode::Rgb => LightColor::Rgb(self.rgb8()),
        }
    }
}

fn channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn bound(v: f64) -> f64 {
    v.clamp(0.0, 255.0)
}

/// Kelvin → RGB channels in 0..=255. Input is clamped to 1000K–40000K.
pub fn kelvin_to_rgb(kelvin: f64) -> (f64, f64, f64) {
    let t = kelvin.clamp(MIN_KELVIN as f64, MAX_KELVIN as f64) / 100.0;

    let red = if t <= 66.0 {
        255.0
    } else {
        bound(329.698727446 * (t - 60.0).powf(-0.1332047592))
    };

    let green = if t <= 66.0 {
        bound(99.4708025861 * t.ln() - 161.1195681661)
    } else {
        bound(288.1221695283 * (t - 60.0).powf(-0.0755148492))
    };

    let blue = if t >= 66.0 {
        255.0
    } else if t <= 19.0 {
        0.0
    } else {
        bound(138.5177312231 * (t - 10.0).ln() - 305.0447927307)
    };

    (red, green, blue)
}

fn expand_gamma(c: f64) -> f64 {
    if c > 0.04045 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    }
}

fn compress_gamma(c: f64) -> f64 {
    if c <= 0.0031308 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// RGB (0..=255 per channel) → CIE xy rounded to 3 decimals, plus brightness 0..=255.
/// Black maps to (0, 0, 0).
pub fn rgb_to_xy(r: f64, g: f64, b: f64) -> (f64, f64, u8) {
    if r + g + b == 0.0 {
        return (0.0, 0.0, 0);
    }

    let r = expand_gamma(r / 255.0);
    let g = expand_gamma(g / 255.0);
    let b = expand_gamma(b / 255.0);

    let big_x = r * 0.664511 + g * 0.154324 + b * 0.162028;
    let big_y = r * 0.283881 + g * 0.668433 + b * 0.047685;
    let big_z = r * 0.000088 + g * 0.072310 + b * 0.986039;

    let sum = big_x + big_y + big_z;
    let x = big_x / sum;
    let y = big_y / sum;
    let brightness = (big_y.min(1.0) * 255.0).round() as u8;

    (round3(x), round3(y), brightness)
}

/// CIE xy + brightness (0..=255) → RGB. Inverse of `rgb_to_xy` up to rounding.
pub fn xy_brightness_to_rgb(x: f64, y: f64, brightness: u8) -> Rgb {
    if brightness == 0 {
        return Rgb { r: 0, g: 0, b: 0 };
    }
    let big_y = brightness as f64 / 255.0;
    let y = if y == 0.0 { 1e-11 } else { y };
    let big_x = (big_y / y) * x;
    let big_z = (big_y / y) * (1.0 - x - y);

    let r = big_x * 1.656492 - big_y * 0.354851 - big_z * 0.255038;
    let g = -big_x * 0.707196 + big_y * 1.655397 + big_z * 0.036152;
    let b = big_x * 0.051713 - big_y * 0.121364 + big_z * 1.011530;

    let [r, g, b] = [r, g, b].map(|c| compress_gamma(c).max(0.0));
    let max = r.max(g).max(b);
    let scale = if max > 1.0 { max } else { 1.0 };

    Rgb {
        r: ((r / scale) * 255.0) as u8,
        g: ((g / scale) * 255.0) as u8,
        b: ((b / scale) * 255.0) as u8,
    }
}

pub fn kelvin_to_mired(kelvin: f64) -> u32 {
    (1_000_000.0 / kelvin).floor() as u32
}
