// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

pub mod actions;
pub mod auth;
pub mod bindings;
pub mod config;
pub mod context;
pub mod error;
pub mod functions;
pub mod headers;
pub mod mounts;
pub mod protocols;
pub mod public;
pub mod renderers;
pub mod server;
pub mod templates;
pub mod timing;
pub mod tls;
pub mod util;
pub mod validators;
pub mod vfs;
