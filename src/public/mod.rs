// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::auth::AuthMiddlewareFactory;
use crate::headers;
use crate::server::Server;
use crate::util::csrf_middleware::CsrfMiddlewareFactory;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::middleware::{Condition, Logger};
use actix_web::{App, Error, web};
use std::sync::Arc;

pub mod error;
pub mod handlers;
pub mod paths;

pub const ACCESS_LOG_FORMAT: &str = r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/{path:.*}", web::route().to(handlers::dispatch));
}

/// The application for one worker. Middleware runs outermost first: request id and global
/// headers, access log, authenticators and validators, then CSRF.
pub fn build_app(
    server: Arc<Server>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    let csrf = server.csrf.clone();
    let authenticators = server.authenticators.clone();
    let validators = server.validators.clone();
    let global_headers = server.config.global_headers.clone();
    let max_request_body = server.config.max_request_body;

    App::new()
        .app_data(web::Data::from(server))
        .app_data(web::PayloadConfig::new(max_request_body))
        .wrap(Condition::new(
            csrf.is_some(),
            CsrfMiddlewareFactory::new(csrf.unwrap_or_default()),
        ))
        .wrap(AuthMiddlewareFactory::new(authenticators, validators))
        .wrap(Logger::new(ACCESS_LOG_FORMAT))
        .wrap(headers::Headers::new(&global_headers))
        .configure(configure)
}
