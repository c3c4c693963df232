// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Color parsing and HSL manipulation for the template color helpers.
//!
//! Accepts `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb(r, g, b)`, `rgba(r, g, b, a)` and
//! `hsl(h, s%, l%)` notations.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

/// Convert RGB color to HSL color space
///
/// # Arguments
/// * `r` - Red component (0-255)
/// * `g` - Green component (0-255)
/// * `b` - Blue component (0-255)
///
/// # Returns
/// * `(h, s, l)` - Hue (0-360), Saturation (0-1), Lightness (0-1)
pub fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let l = (max + min) / 2.0;

    if delta == 0.0 {
        return (0.0, 0.0, l);
    }

    let s = delta / (1.0 - (2.0 * l - 1.0).abs());
    let h = if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    (h, s, l)
}

/// Convert HSL color to RGB color space
///
/// # Arguments
/// * `h` - Hue (0-360)
/// * `s` - Saturation (0-1)
/// * `l` - Lightness (0-1)
///
/// # Returns
/// * `(r, g, b)` - Red, Green, Blue components (0-255)
pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (u8, u8, u8) {
    let h = h.rem_euclid(360.0);
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;

    let (r_prime, g_prime, b_prime) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    let channel = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (channel(r_prime), channel(g_prime), channel(b_prime))
}

fn functional_args(input: &str, name: &str) -> Option<Vec<String>> {
    let inner = input.strip_prefix(name)?.trim().strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.split(',').map(|p| p.trim().to_string()).collect())
}

fn percent_or_unit(part: &str) -> Option<f32> {
    match part.strip_suffix('%') {
        Some(p) => p.trim().parse::<f32>().ok().map(|v| v / 100.0),
        None => part.parse::<f32>().ok(),
    }
}

impl Color {
    pub fn parse(input: &str) -> Result<Color, String> {
        let input = input.trim().to_ascii_lowercase();

        if let Some(hex) = input.strip_prefix('#') {
            let expanded: String = if hex.len() == 3 || hex.len() == 4 {
                hex.chars().flat_map(|c| [c, c]).collect()
            } else {
                hex.to_string()
            };
            if !(expanded.len() == 6 || expanded.len() == 8) {
                return Err(format!("invalid hex color {:?}", input));
            }
            let byte = |i: usize| {
                u8::from_str_radix(&expanded[i..i + 2], 16)
                    .map_err(|_| format!("invalid hex color {:?}", input))
            };
            let a = if expanded.len() == 8 {
                byte(6)? as f32 / 255.0
            } else {
                1.0
            };
            return Ok(Color {
                r: byte(0)?,
                g: byte(2)?,
                b: byte(4)?,
                a,
            });
        }

        let parts = functional_args(&input, "rgba").or_else(|| functional_args(&input, "rgb"));
        if let Some(parts) = parts {
            if parts.len() < 3 {
                return Err(format!("invalid rgb color {:?}", input));
            }
            let channel = |p: &str| {
                p.parse::<f32>()
                    .map(|v| v.clamp(0.0, 255.0).round() as u8)
                    .map_err(|_| format!("invalid rgb color {:?}", input))
            };
            let a = match parts.get(3) {
                Some(a) => percent_or_unit(a).ok_or_else(|| format!("invalid alpha in {:?}", input))?,
                None => 1.0,
            };
            return Ok(Color {
                r: channel(&parts[0])?,
                g: channel(&parts[1])?,
                b: channel(&parts[2])?,
                a,
            });
        }

        let parts = functional_args(&input, "hsla").or_else(|| functional_args(&input, "hsl"));
        if let Some(parts) = parts {
            if parts.len() < 3 {
                return Err(format!("invalid hsl color {:?}", input));
            }
            let h: f32 = parts[0]
                .trim_end_matches("deg")
                .parse()
                .map_err(|_| format!("invalid hue in {:?}", input))?;
            let s = percent_or_unit(&parts[1]).ok_or_else(|| format!("invalid saturation in {:?}", input))?;
            let l = percent_or_unit(&parts[2]).ok_or_else(|| format!("invalid lightness in {:?}", input))?;
            let a = parts.get(3).and_then(|a| percent_or_unit(a)).unwrap_or(1.0);
            let (r, g, b) = hsl_to_rgb(h, s, l);
            return Ok(Color { r, g, b, a });
        }

        Err(format!("unrecognized color {:?}", input))
    }

    /// Shift lightness by `amount` (-1.0 to 1.0).
    pub fn adjust_lightness(&self, amount: f32) -> Color {
        let (h, s, l) = rgb_to_hsl(self.r, self.g, self.b);
        let (r, g, b) = hsl_to_rgb(h, s, (l + amount).clamp(0.0, 1.0));
        Color { r, g, b, a: self.a }
    }

    pub fn to_hex(&self) -> String {
        if self.a < 1.0 {
            format!(
                "#{:02x}{:02x}{:02x}{:02x}",
                self.r,
                self.g,
                self.b,
                (self.a * 255.0).round() as u8
            )
        } else {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        }
    }

    pub fn to_rgb_string(&self) -> String {
        if self.a < 1.0 {
            format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, self.a)
        } else {
            format!("rgb({}, {}, {})", self.r, self.g, self.b)
        }
    }

    pub fn to_hsl_string(&self) -> String {
        let (h, s, l) = rgb_to_hsl(self.r, self.g, self.b);
        format!(
            "hsl({}, {}%, {}%)",
            h.round() as i32,
            (s * 100.0).round() as i32,
            (l * 100.0).round() as i32
        )
    }
}
