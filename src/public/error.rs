// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::error::DiecastError;
use crate::server::Server;
use crate::templates::{CONTENT_TEMPLATE, ErrorPageContext, FragmentSet, RenderOptions, escape_html};
use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use actix_web::http::header::{CACHE_CONTROL, LOCATION};

/// Error page templates to try for `status`, most specific first.
pub fn error_page_candidates(server: &Server, status: u16) -> Vec<String> {
    vec![
        server.error_page_path(&status.to_string()),
        server.error_page_path(&format!("{}xx", status / 100)),
        server.error_page_path("default"),
    ]
}

/// Respond to a pipeline error. Redirects become redirects; everything else renders an error page.
pub fn respond_error(server: &Server, request_id: &str, err: &DiecastError) -> HttpResponse {
    if let DiecastError::Redirect { location, status } = err {
        return HttpResponse::build(StatusCode::from_u16(*status).unwrap_or(StatusCode::TEMPORARY_REDIRECT))
            .insert_header((LOCATION, location.as_str()))
            .finish();
    }

    let status = err.status_code();
    if status.is_client_error() {
        log::warn!("[{}] {} (HTTP {})", request_id, err, status.as_u16());
    } else {
        log::error!("[{}] {} (HTTP {})", request_id, err, status.as_u16());
    }
    serve_error(server, request_id, status, &err.to_string())
}

/// Render the first error page template that exists, or a minimal built-in page.
pub fn serve_error(server: &Server, request_id: &str, status: StatusCode, message: &str) -> HttpResponse {
    let context = ErrorPageContext::new(status.as_u16(), message, request_id).to_value();

    let html = error_page_candidates(server, status.as_u16())
        .into_iter()
        .find_map(|path| {
            let file = server.vfs.open(&path).ok()?;
            let mut fragments = FragmentSet::new();
            let rendered = fragments
                .parse(CONTENT_TEMPLATE, &file.data)
                .and_then(|_| server.engine.render(&fragments, context.clone(), &RenderOptions::html()));
            match rendered {
                Ok(html) => Some(html),
                Err(err) => {
                    log::warn!("[{}] error template {} failed: {}", request_id, path, err);
                    None
                }
            }
        })
        .unwrap_or_else(|| fallback_html(status, message));

    HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .insert_header((CACHE_CONTROL, "no-cache, no-store, must-revalidate"))
        .body(html)
}

fn fallback_html(status: StatusCode, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><title>{code} - {reason}</title></head>
<body><h1>{code} - {reason}</h1><p>{message}</p></body></html>"#,
        code = status.as_u16(),
        reason = status.canonical_reason().unwrap_or("Error"),
        message = escape_html(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::util::test_fixtures::TestFixtureRoot;
    use actix_web::body::to_bytes;

    fn server(fixture: &TestFixtureRoot) -> Server {
        let config = Config {
            root: fixture.path().display().to_string(),
            ..Config::default()
        };
        Server::new(config.validate().expect("valid")).expect("server")
    }

    async fn body_text(response: HttpResponse) -> String {
        let bytes = to_bytes(response.into_body()).await.expect("body");
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[actix_web::test]
    async fn most_specific_template_wins() {
        let fixture = TestFixtureRoot::new_unique("errors").expect("fixture");
        fixture.write("/_errors/4xx.html", "client {{ status }}").expect("4xx");
        fixture
            .write("/_errors/404.html", "missing: {{ error }} ({{ request_id }})")
            .expect("404");
        let server = server(&fixture);

        let response = serve_error(&server, "abc", StatusCode::NOT_FOUND, "no <page>");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "missing: no &lt;page&gt; (abc)");

        let response = serve_error(&server, "abc", StatusCode::FORBIDDEN, "nope");
        assert_eq!(body_text(response).await, "client 403");
    }

    #[actix_web::test]
    async fn falls_back_to_builtin_page() {
        let fixture = TestFixtureRoot::new_unique("errors").expect("fixture");
        let server = server(&fixture);
        let response = respond_error(&server, "id", &DiecastError::Timeout("slow origin".into()));
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = body_text(response).await;
        assert!(body.contains("504 - Gateway Timeout"));
        assert!(body.contains("slow origin"));
    }

    #[actix_web::test]
    async fn redirect_errors_redirect() {
        let fixture = TestFixtureRoot::new_unique("errors").expect("fixture");
        let server = server(&fixture);
        let response = respond_error(
            &server,
            "id",
            &DiecastError::Redirect {
                location: "/login".into(),
                status: 302,
            },
        );
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("/login")
        );
    }
}
