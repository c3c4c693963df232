// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

pub mod color;
pub mod csrf_helper;
pub mod csrf_middleware;
pub mod csrf_validation;
pub mod duration;
pub mod globs;
pub mod log_level_changer;
pub mod mime_helper;
pub mod process;
pub mod streaming_helper;
pub mod test_fixtures;
pub mod value;

// Re-export commonly used items for convenience
pub use csrf_helper::CsrfToken;
pub use csrf_middleware::CsrfMiddlewareFactory;
pub use duration::parse_duration;
pub use log_level_changer::{Demotion, build_logger, default_demotions, init_logger};
pub use mime_helper::detect_mime_type;
