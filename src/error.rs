// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

/// Errors produced anywhere in the request pipeline.
#[derive(Debug)]
pub enum DiecastError {
    NotFound(String),
    IsDirectory(String),
    /// A mount refused to let the request continue to later mounts or local files.
    HardStop {
        status: u16,
        message: String,
    },
    Redirect {
        location: String,
        status: u16,
    },
    Template(String),
    Binding {
        name: String,
        message: String,
    },
    Protocol(String),
    Timeout(String),
    Unauthorized(String),
    Forbidden(String),
    Validation(String),
    Csrf(String),
    Action(String),
    /// Control signal used by action steps to end a run without failing it.
    Stop,
    Io(std::io::Error),
    Config(String),
}

impl DiecastError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DiecastError::NotFound(_) | DiecastError::IsDirectory(_) => StatusCode::NOT_FOUND,
            DiecastError::HardStop { status, .. } | DiecastError::Redirect { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            DiecastError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DiecastError::Forbidden(_) | DiecastError::Csrf(_) => StatusCode::FORBIDDEN,
            DiecastError::Validation(_) => StatusCode::BAD_REQUEST,
            DiecastError::Protocol(_) => StatusCode::SERVICE_UNAVAILABLE,
            DiecastError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DiecastError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            DiecastError::NotFound(_) => true,
            DiecastError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_hard_stop(&self) -> bool {
        matches!(self, DiecastError::HardStop { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, DiecastError::IsDirectory(_))
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, DiecastError::Stop)
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        DiecastError::NotFound(name.into())
    }

    pub fn template(err: impl std::fmt::Display) -> Self {
        DiecastError::Template(err.to_string())
    }
}

impl std::fmt::Display for DiecastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiecastError::NotFound(name) => write!(f, "File {:?} was not found", name),
            DiecastError::IsDirectory(name) => write!(f, "{} is a directory", name),
            DiecastError::HardStop { status, message } => {
                write!(f, "mount halted (HTTP {}): {}", status, message)
            }
            DiecastError::Redirect { location, status } => {
                write!(f, "redirect to {} (HTTP {})", location, status)
            }
            DiecastError::Template(msg) => write!(f, "template error: {}", msg),
            DiecastError::Binding { name, message } => {
                write!(f, "binding {:?} failed: {}", name, message)
            }
            DiecastError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            DiecastError::Timeout(msg) => write!(f, "timed out: {}", msg),
            DiecastError::Unauthorized(msg) => write!(f, "unauthorized: {}", msg),
            DiecastError::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            DiecastError::Validation(msg) => write!(f, "validation failed: {}", msg),
            DiecastError::Csrf(msg) => write!(f, "CSRF validation failed: {}", msg),
            DiecastError::Action(msg) => write!(f, "{}", msg),
            DiecastError::Stop => write!(f, "stop"),
            DiecastError::Io(err) => write!(f, "{}", err),
            DiecastError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for DiecastError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiecastError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DiecastError {
    fn from(err: std::io::Error) -> Self {
        DiecastError::Io(err)
    }
}

impl From<minijinja::Error> for DiecastError {
    fn from(err: minijinja::Error) -> Self {
        let mut message = err.to_string();
        if let Some(detail) = err.detail()
            && !message.contains(detail)
        {
            message = format!("{} ({})", message, detail);
        }
        DiecastError::Template(message)
    }
}

impl From<serde_json::Error> for DiecastError {
    fn from(err: serde_json::Error) -> Self {
        DiecastError::Protocol(format!("invalid JSON: {}", err))
    }
}

impl From<serde_yaml::Error> for DiecastError {
    fn from(err: serde_yaml::Error) -> Self {
        DiecastError::Template(format!("invalid YAML: {}", err))
    }
}

impl From<reqwest::Error> for DiecastError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DiecastError::Timeout(err.to_string())
        } else {
            DiecastError::Protocol(err.to_string())
        }
    }
}

impl From<redis::RedisError> for DiecastError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            DiecastError::Timeout(err.to_string())
        } else {
            DiecastError::Protocol(format!("redis: {}", err))
        }
    }
}

impl From<crate::config::ConfigError> for DiecastError {
    fn from(err: crate::config::ConfigError) -> Self {
        DiecastError::Config(err.to_string())
    }
}

impl ResponseError for DiecastError {
    fn status_code(&self) -> StatusCode {
        DiecastError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(DiecastError::status_code(self))
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}
