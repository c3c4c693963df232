// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use actix_web::Error;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::header::{CONTENT_TYPE, HeaderName, HeaderValue, VARY};
use actix_web::web::Bytes;
use actix_web::HttpMessage;

use std::future::{Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::CsrfConfig;
use crate::context::replay_payload;
use crate::headers::request_id;
use crate::util::csrf_helper::{CsrfToken, build_cookie, form_value, generate_token, is_well_formed};
use crate::util::csrf_validation::{is_exempt, is_safe_method, verify_double_submit};

/// Double-submit CSRF protection: issues the token cookie and checks unsafe requests.
pub struct CsrfMiddlewareFactory {
    config: Arc<CsrfConfig>,
}

impl CsrfMiddlewareFactory {
    pub fn new(config: Arc<CsrfConfig>) -> Self {
        Self { config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for CsrfMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = CsrfMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CsrfMiddleware {
            service: Rc::new(service),
            config: self.config.clone(),
        }))
    }
}

pub struct CsrfMiddleware<S> {
    service: Rc<S>,
    config: Arc<CsrfConfig>,
}

fn is_form(req: &ServiceRequest) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

impl<S, B> Service<ServiceRequest> for CsrfMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let config = self.config.clone();

        Box::pin(async move {
            let id = request_id(req.request());
            let method = req.method().as_str().to_string();
            let path = req.path().to_string();
            let cookie_token = req.cookie(&config.cookie.name).map(|c| c.value().to_string());

            let mut issued = cookie_token
                .clone()
                .filter(|token| is_well_formed(token))
                .unwrap_or_else(generate_token);

            if !is_safe_method(&method) {
                if is_exempt(&config, &path) {
                    log::info!("[{}] path {:?} exempted from CSRF protection", id, path);
                } else {
                    let mut submitted = req
                        .headers()
                        .get(config.header_name.as_str())
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    if submitted.is_none() && is_form(&req) {
                        let body = req.extract::<Bytes>().await?;
                        submitted = form_value(&body, &config.form_field_name);
                        req.set_payload(replay_payload(body));
                    }

                    if let Err(err) = verify_double_submit(cookie_token.as_deref(), submitted.as_deref()) {
                        log::warn!("[{}] {} {}: {}", id, method, path, err);
                        return Err(err.into());
                    }
                    log::debug!("[{}] CSRF token validated for {} {}", id, method, path);
                    issued = generate_token();
                }
            }

            req.extensions_mut().insert(CsrfToken(issued.clone()));
            let mut res = service.call(req).await?;

            res.headers_mut()
                .insert(VARY, HeaderValue::from_static("Cookie"));
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(config.header_name.as_bytes()),
                HeaderValue::from_str(&issued),
            ) {
                res.headers_mut().insert(name, value);
            }
            if let Err(err) = res.response_mut().add_cookie(&build_cookie(&config.cookie, &issued)) {
                log::error!("[{}] failed to set CSRF cookie: {}", id, err);
            }
            Ok(res)
        })
    }
}
