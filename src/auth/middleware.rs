// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{AuthOutcome, AuthenticatorSet};
use crate::context::{RequestScope, replay_payload};
use crate::headers::request_id;
use crate::validators::ValidatorSet;
use actix_web::Error;
use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::web::Bytes;
use std::future::{Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

/// Runs the authenticator chain, then the validators, before the request reaches any handler.
pub struct AuthMiddlewareFactory {
    authenticators: Arc<AuthenticatorSet>,
    validators: Arc<ValidatorSet>,
}

impl AuthMiddlewareFactory {
    pub fn new(authenticators: Arc<AuthenticatorSet>, validators: Arc<ValidatorSet>) -> Self {
        Self {
            authenticators,
            validators,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddleware {
            service: Rc::new(service),
            authenticators: self.authenticators.clone(),
            validators: self.validators.clone(),
        }))
    }
}

pub struct AuthMiddleware<S> {
    service: Rc<S>,
    authenticators: Arc<AuthenticatorSet>,
    validators: Arc<ValidatorSet>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let authenticators = self.authenticators.clone();
        let validators = self.validators.clone();

        Box::pin(async move {
            if authenticators.is_empty() && validators.is_empty() {
                return Ok(service.call(req).await?.map_into_left_body());
            }

            let id = request_id(req.request());
            let path = req.path().to_string();
            let mut cookies = Vec::new();

            if let Some(authenticator) = authenticators.callback_for(&path) {
                log::debug!("[{}] {}: handling callback", id, authenticator.name());
                let scope = RequestScope::from_request(req.request(), Vec::new(), &id);
                let response = authenticator.callback(&scope).await?;
                return Ok(req.into_response(response).map_into_right_body());
            }

            if let Some(authenticator) = authenticators.for_path(&path) {
                let body = if authenticator.needs_body() {
                    let body = req.extract::<Bytes>().await?;
                    req.set_payload(replay_payload(body.clone()));
                    body.to_vec()
                } else {
                    Vec::new()
                };
                let scope = RequestScope::from_request(req.request(), body, &id);

                match authenticator.authenticate(&scope).await? {
                    AuthOutcome::Allow { cookies: issued } => {
                        log::debug!("[{}] {}: request permitted", id, authenticator.name());
                        cookies = issued;
                    }
                    AuthOutcome::Respond(response) => {
                        log::info!(
                            "[{}] {}: {} {} refused with HTTP {}",
                            id,
                            authenticator.name(),
                            req.method(),
                            path,
                            response.status().as_u16()
                        );
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                }
            }

            if !validators.is_empty() {
                let scope = RequestScope::from_request(req.request(), Vec::new(), &id);
                if let Err(err) = validators.validate(&scope) {
                    log::info!("[{}] {}", id, err);
                    return Err(err.into());
                }
            }

            let mut res = service.call(req).await?;
            for cookie in &cookies {
                if let Err(err) = res.response_mut().add_cookie(cookie) {
                    log::error!("[{}] failed to set session cookie: {}", id, err);
                }
            }
            Ok(res.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::config::ValidatorConfig;
    use actix_web::http::StatusCode;
    use actix_web::{App, HttpResponse, test, web};

    async fn ok() -> HttpResponse {
        HttpResponse::Ok().body("content")
    }

    fn authenticators() -> Arc<AuthenticatorSet> {
        let mut set = AuthenticatorSet::default();
        set.push(
            &["/private/*".to_string()],
            &[],
            Arc::new(StaticAuthenticator::new("gate", false)),
        );
        Arc::new(set)
    }

    #[actix_web::test]
    async fn refused_requests_never_reach_the_handler() {
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddlewareFactory::new(authenticators(), Arc::new(ValidatorSet::default())))
                .default_service(web::to(ok)),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/private/doc").to_request()).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = test::call_service(&app, test::TestRequest::get().uri("/public").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(test::read_body(res).await, "content");
    }

    #[actix_web::test]
    async fn failing_validators_abort_the_request() {
        let validators = ValidatorSet::from_config(&[ValidatorConfig {
            kind: "reject".to_string(),
            only: vec!["/api/*".to_string()],
            ..ValidatorConfig::default()
        }])
        .expect("validators");
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddlewareFactory::new(
                    Arc::new(AuthenticatorSet::default()),
                    Arc::new(validators),
                ))
                .default_service(web::to(ok)),
        )
        .await;

        let res = test::try_call_service(&app, test::TestRequest::get().uri("/api/x").to_request()).await;
        let err = res.err().expect("validation failure");
        assert_eq!(err.as_response_error().status_code(), StatusCode::BAD_REQUEST);

        let res = test::call_service(&app, test::TestRequest::get().uri("/elsewhere").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
