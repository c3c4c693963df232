// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{TemplateFn, arg_f64_or, arg_str, function_table};
use crate::util::color::Color;
use serde_json::{Value, json};

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "lighten" => lighten,
    "darken" => darken,
    "colorToHex" => color_to_hex,
    "colorToRGB" => color_to_rgb,
    "colorToHSL" => color_to_hsl,
];

/// Percentages may be given as `10` or `0.1`.
fn amount(args: &[Value]) -> f32 {
    let raw = arg_f64_or(args, 1, 10.0) as f32;
    if raw.abs() > 1.0 { raw / 100.0 } else { raw }
}

fn lighten(args: &[Value]) -> Result<Value, String> {
    let color = Color::parse(&arg_str(args, 0))?;
    Ok(json!(color.adjust_lightness(amount(args)).to_hex()))
}

fn darken(args: &[Value]) -> Result<Value, String> {
    let color = Color::parse(&arg_str(args, 0))?;
    Ok(json!(color.adjust_lightness(-amount(args)).to_hex()))
}

fn color_to_hex(args: &[Value]) -> Result<Value, String> {
    Ok(json!(Color::parse(&arg_str(args, 0))?.to_hex()))
}

fn color_to_rgb(args: &[Value]) -> Result<Value, String> {
    Ok(json!(Color::parse(&arg_str(args, 0))?.to_rgb_string()))
}

fn color_to_hsl(args: &[Value]) -> Result<Value, String> {
    Ok(json!(Color::parse(&arg_str(args, 0))?.to_hsl_string()))
}
