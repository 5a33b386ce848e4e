use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One LED's colour. `w` is only transmitted for 4-channel orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

impl Pixel {
    pub const OFF: Pixel = Pixel::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Pixel { r, g, b, w: 0 }
    }

    pub const fn rgbw(r: u8, g: u8, b: u8, w: u8) -> Self {
        Pixel { r, g, b, w }
    }

    /// Build from wide integers, saturating each channel to 0..=255
    pub fn clamped(r: i32, g: i32, b: i32) -> Self {
        Pixel::rgb(clamp_channel(r), clamp_channel(g), clamp_channel(b))
    }

    /// Build from floating point channel values (0.0..=255.0), saturating.
    /// NaN maps to 0.
    pub fn from_f32(r: f32, g: f32, b: f32) -> Self {
        Pixel::rgb(clamp_f32(r), clamp_f32(g), clamp_f32(b))
    }

    /// Move the grey component shared by R, G and B onto the white LED
    pub fn with_white_extracted(self) -> Self {
        let common = self.r.min(self.g).min(self.b);
        Pixel::rgbw(
            self.r - common,
            self.g - common,
            self.b - common,
            self.w.saturating_add(common),
        )
    }

    /// Scale every channel by `level / 255`
    pub fn scaled(self, level: u8) -> Self {
        let scale = |c: u8| ((c as u16 * level as u16) / 255) as u8;
        Pixel::rgbw(scale(self.r), scale(self.g), scale(self.b), scale(self.w))
    }
}

fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn clamp_f32(value: f32) -> u8 {
    if value.is_nan() {
        0
    } else {
        value.round().clamp(0.0, 255.0) as u8
    }
}

/// Order in which colour channels go out on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColorOrder {
    #[default]
    Rgb,
    Rbg,
    Grb,
    Gbr,
    Brg,
    Bgr,
    Rgbw,
    Grbw,
}

impl ColorOrder {
    /// Bytes emitted per pixel
    pub fn channels(self) -> usize {
        match self {
            ColorOrder::Rgbw | ColorOrder::Grbw => 4,
            _ => 3,
        }
    }

    /// Append the wire bytes for one pixel
    pub fn push_pixel(self, pixel: Pixel, out: &mut Vec<u8>) {
        let Pixel { r, g, b, w } = pixel;
        match self {
            ColorOrder::Rgb => out.extend_from_slice(&[r, g, b]),
            ColorOrder::Rbg => out.extend_from_slice(&[r, b, g]),
            ColorOrder::Grb => out.extend_from_slice(&[g, r, b]),
            ColorOrder::Gbr => out.extend_from_slice(&[g, b, r]),
            ColorOrder::Brg => out.extend_from_slice(&[b, r, g]),
            ColorOrder::Bgr => out.extend_from_slice(&[b, g, r]),
            ColorOrder::Rgbw => out.extend_from_slice(&[r, g, b, w]),
            ColorOrder::Grbw => out.extend_from_slice(&[g, r, b, w]),
        }
    }

    /// Wire bytes for a run of pixels
    pub fn order_pixels(self, pixels: &[Pixel]) -> Vec<u8> {
        let mut out = Vec::with_capacity(pixels.len() * self.channels());
        for &pixel in pixels {
            self.push_pixel(pixel, &mut out);
        }
        out
    }
}

impl FromStr for ColorOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RGB" => Ok(ColorOrder::Rgb),
            "RBG" => Ok(ColorOrder::Rbg),
            "GRB" => Ok(ColorOrder::Grb),
            "GBR" => Ok(ColorOrder::Gbr),
            "BRG" => Ok(ColorOrder::Brg),
            "BGR" => Ok(ColorOrder::Bgr),
            "RGBW" => Ok(ColorOrder::Rgbw),
            "GRBW" => Ok(ColorOrder::Grbw),
            other => Err(format!("unknown color order '{}'", other)),
        }
    }
}

impl TryFrom<String> for ColorOrder {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColorOrder> for String {
    fn from(order: ColorOrder) -> Self {
        order.to_string()
    }
}

impl fmt::Display for ColorOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColorOrder::Rgb => "RGB",
            ColorOrder::Rbg => "RBG",
            ColorOrder::Grb => "GRB",
            ColorOrder::Gbr => "GBR",
            ColorOrder::Brg => "BRG",
            ColorOrder::Bgr => "BGR",
            ColorOrder::Rgbw => "RGBW",
            ColorOrder::Grbw => "GRBW",
        };
        f.write_str(name)
    }
}
