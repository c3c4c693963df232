// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage, HttpRequest, HttpResponse};
use futures_util::FutureExt;
use futures_util::future::{Ready, ok};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

pub const REQUEST_ID_HEADER: &str = "X-Diecast-Request-ID";

/// Inbound tracing headers whose value is reused as the request id, in order of preference.
const TRACE_HEADERS: &[&str] = &["traceparent", "uber-trace-id", "apigw-requestid"];

/// Identifier assigned to each request; stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

pub fn generate_request_id() -> String {
    bs58::encode(uuid::Uuid::new_v4().as_bytes()).into_string()
}

/// Reuse an inbound trace id when one is present, else mint a new id.
pub fn request_id_from_headers(headers: &HeaderMap) -> String {
    TRACE_HEADERS
        .iter()
        .find_map(|name| {
            headers
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(generate_request_id)
}

/// The id assigned to `req`, or `-` outside the middleware.
pub fn request_id(req: &HttpRequest) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "-".to_string())
}

/// Parsed `globalHeaders`, applied to every response that does not set them itself.
#[derive(Debug, Clone, Default)]
pub struct GlobalHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl GlobalHeaders {
    pub fn new(headers: &BTreeMap<String, String>) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    _ => {
                        log::warn!("Ignoring invalid global header {:?}", name);
                        None
                    }
                }
            })
            .collect();
        Self { headers }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
    }
}

fn stamp(headers: &mut HeaderMap, id: &str, global: &GlobalHeaders) {
    if let Ok(value) = HeaderValue::from_str(id) {
        headers.insert(HeaderName::from_static("x-diecast-request-id"), value);
    }
    global.apply(headers);
}

/// Outermost middleware: assigns the request id, applies global headers and turns errors and
/// panics from inner services into responses that still carry the id.
pub struct Headers {
    global: Arc<GlobalHeaders>,
}

impl Headers {
    pub fn new(global: &BTreeMap<String, String>) -> Self {
        Headers {
            global: Arc::new(GlobalHeaders::new(global)),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Headers
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = HeadersMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(HeadersMiddleware {
            service: Arc::new(service),
            global: self.global.clone(),
        })
    }
}

pub struct HeadersMiddleware<S> {
    service: Arc<S>,
    global: Arc<GlobalHeaders>,
}

impl<S, B> Service<ServiceRequest> for HeadersMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(
        &self,
        cx: &mut core::task::Context<'_>,
    ) -> core::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let id = request_id_from_headers(req.headers());
        req.extensions_mut().insert(RequestId(id.clone()));
        let http_req = req.request().clone();
        let global = self.global.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let outcome = AssertUnwindSafe(async move { service.call(req).await })
                .catch_unwind()
                .await;

            let mut res = match outcome {
                Ok(Ok(res)) => res.map_into_left_body(),
                Ok(Err(err)) => {
                    log::debug!("[{}] {}", id, err);
                    ServiceResponse::from_err(err, http_req).map_into_right_body()
                }
                Err(_) => {
                    log::error!("[{}] request handler panicked", id);
                    let response = HttpResponse::InternalServerError()
                        .content_type("text/plain; charset=utf-8")
                        .body(format!("internal server error (request {})", id));
                    ServiceResponse::new(http_req, response).map_into_right_body()
                }
            };

            stamp(res.headers_mut(), &id, &global);
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiecastError;
    use actix_web::http::StatusCode;
    use actix_web::{App, test, web};

    #[::core::prelude::v1::test]
    fn trace_headers_are_reused_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("uber-trace-id"),
            HeaderValue::from_static("uber-1"),
        );
        assert_eq!(request_id_from_headers(&headers), "uber-1");
        headers.insert(
            HeaderName::from_static("traceparent"),
            HeaderValue::from_static("00-abc-def-01"),
        );
        assert_eq!(request_id_from_headers(&headers), "00-abc-def-01");
    }

    #[::core::prelude::v1::test]
    fn generated_ids_are_base58() {
        let id = generate_request_id();
        assert!(bs58::decode(&id).into_vec().is_ok_and(|bytes| bytes.len() == 16));
        assert_ne!(id, generate_request_id());
    }

    async fn ok_handler(req: HttpRequest) -> HttpResponse {
        HttpResponse::Ok()
            .insert_header(("X-Frame-Options", "DENY"))
            .body(request_id(&req))
    }

    async fn failing_handler() -> Result<HttpResponse, DiecastError> {
        Err(DiecastError::Forbidden("nope".to_string()))
    }

    async fn panicking_handler() -> HttpResponse {
        panic!("boom")
    }

    #[actix_web::test]
    async fn every_response_carries_the_id_and_global_headers() {
        let global = BTreeMap::from([
            ("X-Frame-Options".to_string(), "SAMEORIGIN".to_string()),
            ("X-Powered-By".to_string(), "diecast".to_string()),
        ]);
        let app = test::init_service(
            App::new()
                .wrap(Headers::new(&global))
                .route("/ok", web::get().to(ok_handler))
                .route("/fail", web::get().to(failing_handler))
                .route("/panic", web::get().to(panicking_handler)),
        )
        .await;

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/ok")
                .insert_header(("traceparent", "trace-7"))
                .to_request(),
        )
        .await;
        assert_eq!(res.headers().get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()), Some("trace-7"));
        assert_eq!(res.headers().get("x-frame-options").and_then(|v| v.to_str().ok()), Some("DENY"));
        assert_eq!(res.headers().get("x-powered-by").and_then(|v| v.to_str().ok()), Some("diecast"));
        assert_eq!(test::read_body(res).await, "trace-7");

        let res = test::call_service(&app, test::TestRequest::get().uri("/fail").to_request()).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(res.headers().contains_key(REQUEST_ID_HEADER));

        let res = test::call_service(&app, test::TestRequest::get().uri("/panic").to_request()).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.headers().contains_key(REQUEST_ID_HEADER));
    }
}
