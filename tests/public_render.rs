// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

mod common;

use actix_web::{HttpResponse, http::StatusCode, test, web};
use common::{TestHarness, body_text, header};
use diecast::config::FileOverride;
use diecast::vfs::{FileSystem, VfsEntry, ZipFs};
use serde_json::json;
use std::fs;
use std::io::Cursor;

#[actix_web::test]
async fn serves_overridden_static_file() {
    let mut harness = TestHarness::new();
    harness.config.vfs.overrides.push(FileOverride {
        path: "/hello.txt".to_string(),
        data: Some(json!("Hello")),
        ..FileOverride::default()
    });
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/hello.txt").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        header(&resp, "content-type").is_some_and(|ct| ct.starts_with("text/plain")),
        "unexpected content type {:?}",
        header(&resp, "content-type")
    );
    assert_eq!(body_text(resp).await, "Hello");
}

#[actix_web::test]
async fn optional_failing_binding_renders_empty() {
    let harness = TestHarness::new();
    harness.write(
        "/p.html",
        "---\nbindings:\n  - name: api\n    resource: http://127.0.0.1:1/nope\n    optional: true\n---\n[{{ $.bindings.api }}]",
    );
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/p.html").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "[]");
}

#[actix_web::test]
async fn required_failing_binding_fails_the_request() {
    let harness = TestHarness::new();
    harness.write(
        "/p.html",
        "---\nbindings:\n  - name: api\n    resource: http://127.0.0.1:1/nope\n---\n{{ bindings.api }}",
    );
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/p.html").to_request()).await;
    assert!(resp.status().is_server_error());
}

fn origin_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/items",
        web::get().to(|| async {
            HttpResponse::Ok().json(json!([{"name": "alpha"}, {"name": "beta"}]))
        }),
    );
}

#[actix_web::test]
async fn bindings_fetch_remote_data_into_the_page() {
    let origin = common::spawn_origin(origin_routes);
    let harness = TestHarness::new();
    harness.write(
        "/list.html",
        &format!(
            "---\nbindings:\n  - name: items\n    resource: {}/items\n---\n{{% for item in bindings.items %}}<li>{{{{ item.name }}}}</li>{{% endfor %}}",
            origin
        ),
    );
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/list").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "<li>alpha</li><li>beta</li>");
}

#[actix_web::test]
async fn directory_requests_render_the_index_file() {
    let harness = TestHarness::new();
    harness.write("/docs/index.html", "<h1>Docs {{ 1 + 1 }}</h1>");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/docs/").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "<h1>Docs 2</h1>");
}

#[actix_web::test]
async fn dynamic_id_route_binds_the_segment() {
    let harness = TestHarness::new();
    harness.write("/users/__id.html", "user={{ id }}");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/users/42").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "user=42");
}

#[actix_web::test]
async fn dynamic_ids_are_typed() {
    let harness = TestHarness::new();
    harness.write("/users/__id.html", "{{ id is number }}:{{ id }}");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/users/42").to_request()).await;
    assert_eq!(body_text(resp).await, "true:42");
    let resp = test::call_service(&app, test::TestRequest::get().uri("/users/abc").to_request()).await;
    assert_eq!(body_text(resp).await, "false:abc");
}

#[actix_web::test]
async fn dynamic_route_files_are_tried_in_order() {
    let harness = TestHarness::new();
    harness.write("/users/7.html", "static");
    harness.write("/users/index__id.html", "index {{ id }}");
    harness.write("/users/__id.html", "plain {{ id }}");
    harness.write("/teams__id.html", "sibling {{ id }}");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/users/7").to_request()).await;
    assert_eq!(body_text(resp).await, "static");
    let resp = test::call_service(&app, test::TestRequest::get().uri("/users/8").to_request()).await;
    assert_eq!(body_text(resp).await, "index 8");

    fs::remove_file(harness.root().join("users/index__id.html")).expect("remove");
    let resp = test::call_service(&app, test::TestRequest::get().uri("/users/8").to_request()).await;
    assert_eq!(body_text(resp).await, "plain 8");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/teams/red").to_request()).await;
    assert_eq!(body_text(resp).await, "sibling red");
}

#[actix_web::test]
async fn static_files_honour_single_ranges() {
    let harness = TestHarness::new();
    harness.write("/data.txt", "0123456789");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/data.txt").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "accept-ranges").as_deref(), Some("bytes"));
    assert_eq!(body_text(resp).await, "0123456789");

    let req = test::TestRequest::get()
        .uri("/data.txt")
        .insert_header(("Range", "bytes=2-5"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&resp, "content-range").as_deref(), Some("bytes 2-5/10"));
    assert_eq!(body_text(resp).await, "2345");

    let req = test::TestRequest::get()
        .uri("/data.txt")
        .insert_header(("Range", "bytes=50-"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header(&resp, "content-range").as_deref(), Some("bytes */10"));
}

#[actix_web::test]
async fn autoarchive_layers_serve_directories_as_zip_downloads() {
    let harness = TestHarness::with_yaml("vfs:\n  fallback:\n    type: local\n    autoarchive: true\n");
    harness.write("/bundle/a.txt", "alpha");
    harness.write("/bundle/nested/b.txt", "beta");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/bundle.zip").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-type").as_deref(), Some("application/zip"));
    assert_eq!(
        header(&resp, "content-disposition").as_deref(),
        Some("attachment; filename=\"bundle.zip\"")
    );

    let bytes = test::read_body(resp).await;
    let archive = ZipFs::from_reader(Cursor::new(bytes.to_vec())).expect("valid zip");
    match archive.open("/a.txt").expect("a.txt") {
        VfsEntry::File(file) => assert_eq!(file.data, b"alpha"),
        other => panic!("expected a file, got {:?}", other),
    }
    match archive.open("/nested/b.txt").expect("nested/b.txt") {
        VfsEntry::File(file) => assert_eq!(file.data, b"beta"),
        other => panic!("expected a file, got {:?}", other),
    }
}

#[actix_web::test]
async fn archives_are_not_built_without_the_layer_flag() {
    let harness = TestHarness::new();
    harness.write("/bundle/a.txt", "alpha");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/bundle.zip").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn layouts_wrap_pages_and_markdown_is_rendered() {
    let harness = TestHarness::new();
    harness.write(
        "/_layouts/default.html",
        "<title>{{ page.title }}</title><main>{% include \"content\" %}</main>",
    );
    harness.write("/notes.md", "---\npage:\n  title: Notes\n---\n# {{ page.title }}\n");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/notes").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = body_text(resp).await;
    assert!(html.starts_with("<title>Notes</title><main>"), "{}", html);
    assert!(html.contains("<h1>Notes</h1>"), "{}", html);
}

#[actix_web::test]
async fn missing_pages_use_the_error_templates() {
    let harness = TestHarness::new();
    harness.write("/_errors/404.html", "gone: {{ status }}");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/nowhere").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(resp).await, "gone: 404");
}

#[actix_web::test]
async fn responses_carry_request_id_and_global_headers() {
    let mut harness = TestHarness::new();
    harness
        .config
        .global_headers
        .insert("X-Site".to_string(), "diecast".to_string());
    harness.write("/index.html", "home");
    let app = test::init_service(harness.app()).await;

    let req = test::TestRequest::get()
        .uri("/")
        .insert_header(("uber-trace-id", "trace-123"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "x-diecast-request-id").as_deref(), Some("trace-123"));
    assert_eq!(header(&resp, "x-site").as_deref(), Some("diecast"));
    assert!(header(&resp, "server-timing").is_some());
    assert_eq!(body_text(resp).await, "home");
}

#[actix_web::test]
async fn route_prefix_scopes_the_site() {
    let mut harness = TestHarness::new();
    harness.config.route_prefix = "/site".to_string();
    harness.write("/about.html", "about");
    let app = test::init_service(harness.app()).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/site/about").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "about");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/about").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
