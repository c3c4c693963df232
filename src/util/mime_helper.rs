// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use std::path::Path;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Detect a MIME type from the file extension (mime_guess), falling back to content sniffing (infer).
pub fn detect_mime_type(file_path: &Path, file_content: &[u8]) -> String {
    if let Some(mime_type) = mime_guess::from_path(file_path).first_raw() {
        return mime_type.to_string();
    }

    if let Some(mime_type) = infer::get(file_content) {
        return mime_type.mime_type().to_string();
    }

    DEFAULT_MIME_TYPE.to_string()
}

/// The `type/subtype` part of a media type, lower-cased and without parameters.
pub fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Whether `mime_type` names HTML.
pub fn is_html(mime_type: &str) -> bool {
    matches!(essence(mime_type).as_str(), "text/html" | "application/xhtml+xml")
}
