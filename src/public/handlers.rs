// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::error;
use super::paths::{candidate_paths, id_param};
use crate::bindings::{Binding, evaluate_all, evaluate_flags};
use crate::context::{RequestContext, RequestScope};
use crate::error::DiecastError;
use crate::headers::request_id;
use crate::mounts::{MountPayload, MountResponse};
use crate::protocols::BINDING_HEADER;
use crate::renderers::{PostProcessContext, RenderJob};
use crate::server::Server;
use crate::templates::{
    AutoindexContext, CONTENT_TEMPLATE, FragmentSet, LAYOUT_TEMPLATE, SwitchInput, SwitchOutcome,
    TemplateHeader, eval_condition, eval_leaves, evaluate_switch, split_front_matter,
};
use crate::timing::SERVER_TIMING_HEADER;
use crate::util::csrf_helper::CsrfToken;
use crate::util::streaming_helper::{Slice, file_stream, format_content_range_header, select_slice};
use crate::util::value::{deep_merge, is_truthy, to_display};
use crate::vfs::{DirEntryInfo, DiskFile, VfsDir, VfsEntry, VfsFile};
use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_RANGE, HeaderName, HeaderValue, HttpDate,
    LOCATION, LastModified,
};
use actix_web::{HttpMessage, HttpRequest, HttpResponse, HttpResponseBuilder, web};
use log::{debug, warn};
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;

/// Site template rendered for directory listings when present.
const AUTOINDEX_TEMPLATE: &str = "/_autoindex.html";
const MAX_SWITCH_DEPTH: usize = 8;
const DEFAULT_LOCALE: &str = "en";

/// A file (or synthesized document) chosen to answer a request.
struct Candidate {
    source: &'static str,
    path: String,
    data: Vec<u8>,
    /// Still on disk; `data` is empty until [`Candidate::load`].
    disk: Option<DiskFile>,
    mime_type: String,
    status: u16,
    headers: Vec<(String, String)>,
    force_template: bool,
    autoindex: Option<AutoindexContext>,
}

impl Candidate {
    fn local(path: &str, data: Vec<u8>, mime_type: &str) -> Self {
        Self {
            source: "local",
            path: path.to_string(),
            data,
            disk: None,
            mime_type: mime_type.to_string(),
            status: 0,
            headers: Vec::new(),
            force_template: false,
            autoindex: None,
        }
    }

    fn disk(path: &str, file: DiskFile) -> Self {
        let mut candidate = Self::local(path, Vec::new(), &file.mime_type);
        candidate.disk = Some(file);
        candidate
    }

    /// Bring a file left on disk into memory, for templating or renderers.
    async fn load(mut self) -> Result<Self, DiecastError> {
        if let Some(file) = self.disk.take() {
            self.data = file.read_async().await?;
        }
        Ok(self)
    }
}

enum Located {
    Candidate(Candidate),
    Redirect { location: String, code: u16 },
}

impl Located {
    fn from_mount(path: &str, response: MountResponse) -> Self {
        let MountResponse {
            content_type,
            status,
            headers,
            payload,
            ..
        } = response;
        match payload {
            MountPayload::Redirect { location, code } => Located::Redirect { location, code },
            MountPayload::File(file) => {
                let mut candidate = Candidate::disk(path, file);
                candidate.source = "mount";
                candidate.mime_type = content_type;
                candidate.status = status;
                candidate.headers = headers;
                Located::Candidate(candidate)
            }
            MountPayload::Data(data) => Located::Candidate(Candidate {
                source: "mount",
                path: path.to_string(),
                data,
                disk: None,
                mime_type: content_type,
                status,
                headers,
                force_template: false,
                autoindex: None,
            }),
        }
    }
}

/// Catch-all handler: actions, then files from mounts and the VFS.
pub async fn dispatch(req: HttpRequest, body: web::Bytes, server: web::Data<Server>) -> HttpResponse {
    let id = request_id(&req);
    let scope = Arc::new(RequestScope::from_request(&req, body.to_vec(), &id));

    if let Some(action) = server.actions.find(&scope.method, &scope.path) {
        debug!("[{}] {} {} handled by action", id, scope.method, scope.path);
        return action.run(&scope, &server.action_runtime).await;
    }

    let prefix = server.config.route_prefix_trimmed();
    if !prefix.is_empty() && scope.path != prefix && !scope.path.starts_with(&format!("{}/", prefix)) {
        return error::serve_error(&server, &id, StatusCode::NOT_FOUND, "Not Found");
    }

    if let Some(response) = introspection(&server, &scope, prefix) {
        return response;
    }

    let csrf_token = req.extensions().get::<CsrfToken>().map(|token| token.0.clone());
    let mut ctx = RequestContext::new(scope);
    match serve(&server, &mut ctx, csrf_token.as_deref()).await {
        Ok(response) => response,
        Err(err) => error::respond_error(&server, &id, &err),
    }
}

/// `<prefix>/_diecast` and `<prefix>/_bindings`, only for requests carrying the binding header.
fn introspection(server: &Server, scope: &RequestScope, prefix: &str) -> Option<HttpResponse> {
    let name = scope.path.strip_prefix(prefix)?;
    if name != "/_diecast" && name != "/_bindings" {
        return None;
    }
    if scope.header(BINDING_HEADER).is_none() {
        return Some(error::serve_error(server, &scope.id, StatusCode::NOT_FOUND, "Not Found"));
    }
    let body = if name == "/_diecast" {
        serde_json::to_value(&**server.config)
    } else {
        serde_json::to_value(&server.config.bindings)
    };
    Some(match body {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(err) => error::respond_error(server, &scope.id, &err.into()),
    })
}

async fn serve(
    server: &Server,
    ctx: &mut RequestContext,
    csrf_token: Option<&str>,
) -> Result<HttpResponse, DiecastError> {
    let lookup = ctx.timer.start("lookup", "Diecast Lookup");
    let candidates = candidate_paths(
        &ctx.scope.path,
        &server.config.index_file,
        &server.config.try_extensions,
        server.config.route_prefix_trimmed(),
    );
    let located = locate(server, &ctx.scope, &candidates).await?;
    ctx.timer.finish(lookup);

    let candidate = match located {
        Some(Located::Candidate(candidate)) => candidate,
        Some(Located::Redirect { location, code }) => {
            let location = if location.is_empty() {
                format!("{}/", ctx.scope.path)
            } else {
                location
            };
            debug!("[{}] {} redirects to {} (HTTP {})", ctx.id(), ctx.scope.path, location, code);
            return Ok(redirect(&location, code));
        }
        None => return Err(DiecastError::not_found(&ctx.scope.path)),
    };

    debug!("[{}] found: {} ({})", ctx.id(), candidate.source, candidate.path);
    if let Some(id) = id_param(&candidate.path, &ctx.scope.path) {
        ctx.scope.set_param("id", id);
    }

    if candidate.force_template || server.should_apply_template(&candidate.path) {
        let candidate = candidate.load().await?;
        render_page(server, ctx, candidate, server.base_header(), csrf_token, 0).await
    } else {
        serve_raw(server, ctx, candidate).await
    }
}

fn blocking_error(err: BlockingError) -> DiecastError {
    DiecastError::Io(std::io::Error::other(err.to_string()))
}

/// Open and read a VFS file on the blocking pool.
async fn read_file(server: &Server, path: &str) -> Result<VfsFile, DiecastError> {
    let vfs = server.vfs.clone();
    let path = path.to_string();
    web::block(move || vfs.open(&path)).await.map_err(blocking_error)?
}

/// Try candidate paths against the VFS on the blocking pool, stopping at the first file.
async fn lookup_local(
    server: &Server,
    candidates: &[String],
) -> Result<Vec<(String, Result<VfsEntry, DiecastError>)>, DiecastError> {
    let vfs = server.vfs.clone();
    let candidates = candidates.to_vec();
    web::block(move || {
        let mut tried = Vec::with_capacity(candidates.len());
        for path in candidates {
            let entry = vfs.open_entry(&path);
            let is_file = matches!(entry, Ok(VfsEntry::File(_) | VfsEntry::Disk(_)));
            tried.push((path, entry));
            if is_file {
                break;
            }
        }
        tried
    })
    .await
    .map_err(blocking_error)
}

/// Search the VFS and the mounts for the first candidate path that answers.
async fn locate(
    server: &Server,
    scope: &Arc<RequestScope>,
    candidates: &[String],
) -> Result<Option<Located>, DiecastError> {
    let mut local = None;
    let mut directory: Option<(String, VfsDir)> = None;

    for (path, entry) in lookup_local(server, candidates).await? {
        match entry {
            Ok(VfsEntry::File(file)) => {
                local = Some(Candidate::local(&path, file.data, &file.mime_type));
            }
            Ok(VfsEntry::Disk(file)) => {
                local = Some(Candidate::disk(&path, file));
            }
            Ok(VfsEntry::Dir(dir)) => {
                if directory.is_none() && server.config.autoindex {
                    directory = Some((path, dir));
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => debug!("[{}] local lookup of {} failed: {}", scope.id, path, err),
        }
    }

    let mut mounted = None;
    if !server.mounts.is_empty() && (!server.config.try_local_first || local.is_none()) {
        for path in candidates {
            if let Some(response) = server.mounts.open(path, scope).await? {
                mounted = Some(Located::from_mount(path, response));
                break;
            }
        }
    }

    let local = local.map(Located::Candidate);
    let found = if server.config.try_local_first {
        local.or(mounted)
    } else {
        mounted.or(local)
    };
    if found.is_some() {
        return Ok(found);
    }

    Ok(match directory {
        Some((path, dir)) => Some(Located::Candidate(
            autoindex_candidate(server, scope, &path, &dir.entries).await,
        )),
        None => None,
    })
}

async fn autoindex_candidate(
    server: &Server,
    scope: &RequestScope,
    path: &str,
    entries: &[DirEntryInfo],
) -> Candidate {
    let listing = AutoindexContext::new(&scope.path, entries);
    match read_file(server, AUTOINDEX_TEMPLATE).await {
        Ok(template) => Candidate {
            source: "autoindex",
            path: path.to_string(),
            data: template.data,
            disk: None,
            mime_type: "text/html".to_string(),
            status: 0,
            headers: Vec::new(),
            force_template: true,
            autoindex: Some(listing),
        },
        Err(_) => {
            let mut candidate = Candidate::local(path, listing.to_html().into_bytes(), "text/html; charset=utf-8");
            candidate.source = "autoindex";
            candidate
        }
    }
}

fn redirect(location: &str, code: u16) -> HttpResponse {
    let status = StatusCode::from_u16(code)
        .ok()
        .filter(StatusCode::is_redirection)
        .unwrap_or(StatusCode::MOVED_PERMANENTLY);
    HttpResponse::build(status)
        .insert_header((LOCATION, location))
        .finish()
}

fn append_headers<I>(builder: &mut HttpResponseBuilder, headers: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                builder.insert_header((name, value));
            }
            _ => warn!("skipping invalid response header {:?}", name),
        }
    }
}

fn status_or_ok(code: u16) -> StatusCode {
    if code == 0 {
        return StatusCode::OK;
    }
    StatusCode::from_u16(code).unwrap_or(StatusCode::OK)
}

/// Send a file as-is, or through the renderer named by `?renderer=`.
async fn serve_raw(
    server: &Server,
    ctx: &RequestContext,
    mut candidate: Candidate,
) -> Result<HttpResponse, DiecastError> {
    let renderer_name = ctx.scope.query_value("renderer").filter(|name| !name.is_empty());
    if renderer_name.is_some() {
        candidate = candidate.load().await?;
    } else if let Some(file) = candidate.disk.take() {
        return serve_disk(server, ctx, candidate, file).await;
    }

    let (body, content_type) = match renderer_name {
        Some(name) => {
            let renderer = server
                .renderers
                .get(name)
                .ok_or_else(|| DiecastError::Validation(format!("Unknown renderer {:?}", name)))?;
            let fragments = FragmentSet::new();
            let rendered = renderer.render(&RenderJob {
                engine: server.engine.as_ref(),
                fragments: &fragments,
                data: ctx.template_data(&json!({})),
                mime_type: &candidate.mime_type,
                scope: &ctx.scope,
                raw: &candidate.data,
            })?;
            (rendered.body, rendered.content_type)
        }
        None => (candidate.data, candidate.mime_type),
    };

    let mut builder = HttpResponse::build(status_or_ok(candidate.status));
    append_headers(&mut builder, candidate.headers);
    builder.content_type(content_type);
    add_timing(server, ctx, &mut builder);
    Ok(builder.body(body))
}

/// Stream a file from disk, answering single `Range` requests with 206.
async fn serve_disk(
    server: &Server,
    ctx: &RequestContext,
    candidate: Candidate,
    file: DiskFile,
) -> Result<HttpResponse, DiecastError> {
    // a fixed mount status replaces range handling
    let ranged = matches!(candidate.status, 0 | 200);
    let slice = if ranged {
        select_slice(ctx.scope.header("range"), file.size)
    } else {
        Slice::Whole
    };

    let (status, start, len, content_range) = match slice {
        Slice::Whole => (status_or_ok(candidate.status), 0, file.size, None),
        Slice::Partial { start, end } => (
            StatusCode::PARTIAL_CONTENT,
            start,
            end - start + 1,
            Some(format_content_range_header(start, end, file.size)),
        ),
        Slice::Unsatisfiable => {
            debug!("[{}] unsatisfiable range for {} ({} bytes)", ctx.id(), candidate.path, file.size);
            return Ok(HttpResponse::build(StatusCode::RANGE_NOT_SATISFIABLE)
                .insert_header((CONTENT_RANGE, format!("bytes */{}", file.size)))
                .finish());
        }
    };

    let body = file_stream(&file.path, start, len).await?;
    let mut builder = HttpResponse::build(status);
    append_headers(&mut builder, candidate.headers);
    builder.content_type(candidate.mime_type);
    if ranged {
        builder.insert_header((ACCEPT_RANGES, "bytes"));
    }
    if let Some(content_range) = content_range {
        builder.insert_header((CONTENT_RANGE, content_range));
    }
    if let Some(modified) = file.modified {
        builder.insert_header(LastModified(HttpDate::from(modified)));
    }
    if let Some(name) = &file.download_name {
        builder.insert_header((
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", name.replace('"', "")),
        ));
    }
    add_timing(server, ctx, &mut builder);
    Ok(builder.body(body))
}

fn add_timing(server: &Server, ctx: &RequestContext, builder: &mut HttpResponseBuilder) {
    if server.config.disable_timings || ctx.timer.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.timer.header_value()) {
        builder.insert_header((SERVER_TIMING_HEADER, value));
    }
}

/// Resolve the layout for a page. An explicitly named layout must exist; the implicit `default`
/// is optional.
async fn load_layout(
    server: &Server,
    path: &str,
    header: &TemplateHeader,
    fragments: &mut FragmentSet,
) -> Result<(), DiecastError> {
    if !server.config.enable_layouts || header.disables_layout() {
        return Ok(());
    }
    let explicit = !header.layout.is_empty();
    if !explicit && !server.should_apply_layout(path) {
        return Ok(());
    }
    let name = if explicit { header.layout.as_str() } else { "default" };
    let layout_path = server.layout_path(name);
    match read_file(server, &layout_path).await {
        Ok(file) => {
            fragments.parse(LAYOUT_TEMPLATE, &file.data)?;
            Ok(())
        }
        Err(err) if err.is_not_found() && !explicit => Ok(()),
        Err(err) if err.is_not_found() => Err(DiecastError::Template(format!(
            "layout {:?} not found at {}",
            name, layout_path
        ))),
        Err(err) => Err(err),
    }
}

fn locale_for(scope: &RequestScope, header: &TemplateHeader) -> String {
    if !header.locale.is_empty() {
        return header.locale.clone();
    }
    scope
        .query_value("lang")
        .map(str::to_string)
        .or_else(|| {
            scope.header("Accept-Language").and_then(|value| {
                value
                    .split(',')
                    .next()
                    .map(|tag| tag.split(';').next().unwrap_or("").trim().to_string())
            })
        })
        .filter(|locale| !locale.is_empty() && locale != "*")
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
}

/// The data every page template sees, before bindings run.
fn base_data(server: &Server, ctx: &RequestContext, header: &TemplateHeader) -> JsonValue {
    let config = &server.config;
    let env: Map<String, JsonValue> = std::env::vars()
        .map(|(name, value)| (name, JsonValue::String(value)))
        .collect();

    let mut page = JsonValue::Object(config.page.clone());
    deep_merge(&mut page, JsonValue::Object(header.page.clone()));
    deep_merge(&mut page, JsonValue::Object(config.override_page.clone()));

    json!({
        "request": ctx.scope.request_data(Some(header)),
        "diecast": {
            "route_prefix": config.route_prefix,
            "index_file": config.index_file,
            "template_patterns": config.template_patterns,
            "try_local_first": config.try_local_first,
            "binding_prefix": config.binding_prefix,
        },
        "env": env,
        "page": page,
        "bindings": server.shared_bindings.snapshot(),
        "params": ctx.scope.params(),
        "id": ctx.scope.param("id").unwrap_or(JsonValue::Null),
        "translations": header.translations,
        "locale": locale_for(&ctx.scope, header),
    })
}

struct PageSwitch<'a> {
    server: &'a Server,
    ctx: &'a RequestContext,
    data: &'a JsonValue,
}

impl SwitchInput for PageSwitch<'_> {
    fn eval_condition(&self, expression: &str) -> bool {
        eval_condition(
            self.server.engine.as_ref(),
            expression,
            &self.ctx.template_data(self.data),
            Some(&self.ctx.scope),
        )
        .unwrap_or_else(|err| {
            warn!("[{}] switch condition {:?} failed: {}", self.ctx.id(), expression, err);
            false
        })
    }

    fn query(&self, name: &str) -> Option<String> {
        self.ctx.scope.query_value(name).map(str::to_string)
    }

    fn header(&self, name: &str) -> Option<String> {
        self.ctx.scope.header(name).map(str::to_string)
    }
}

/// Template a page: layout, includes and content fragments, bindings, flags, then the renderer
/// and post-processors.
async fn render_page(
    server: &Server,
    ctx: &mut RequestContext,
    candidate: Candidate,
    base: TemplateHeader,
    csrf_token: Option<&str>,
    depth: usize,
) -> Result<HttpResponse, DiecastError> {
    let (page_header, offset) = split_front_matter(&candidate.data)?;
    let page_header = page_header.unwrap_or_default();
    let effective = base.merge(&page_header);

    if let Some(redirect_to) = &effective.redirect {
        let data = json!({"request": ctx.scope.request_data(Some(&effective))});
        let location = ctx.t(server.engine.as_ref(), &redirect_to.url, &data)?;
        return Ok(redirect(&location, redirect_to.code));
    }

    let mut fragments = FragmentSet::new();
    load_layout(server, &candidate.path, &effective, &mut fragments).await?;
    let content = String::from_utf8_lossy(&candidate.data[offset..]).into_owned();
    fragments.set(CONTENT_TEMPLATE, Some(page_header), content);

    let mut header = fragments.header(Some(&base));
    for (name, include_path) in header.includes.clone() {
        if !ctx.mark_seen(&include_path) {
            continue;
        }
        let file = read_file(server, &include_path).await.map_err(|err| {
            DiecastError::Template(format!("include {:?} ({}): {}", name, include_path, err))
        })?;
        fragments.parse(&name, &file.data)?;
    }
    header = fragments.header(Some(&base));
    for (name, value) in ctx.scope.params() {
        header.url_params.insert(name, value);
    }

    let mut data = base_data(server, ctx, &header);
    if let Some(listing) = &candidate.autoindex {
        data["autoindex"] = serde_json::to_value(listing.to_value())?;
    }

    let bindings: Vec<Binding> = server
        .config
        .bindings
        .iter()
        .chain(header.bindings.iter())
        .cloned()
        .collect();
    let phase = ctx.timer.start("bindings", "Diecast Bindings");
    evaluate_all(&server.binding_runtime, &bindings, &ctx.scope, &mut data, &mut ctx.timer).await?;
    ctx.timer.finish(phase);

    let flags = evaluate_flags(server.engine.as_ref(), &header.flag_defs, &ctx.scope, &data)?;
    data["flags"] = JsonValue::Object(flags);
    let page = eval_leaves(
        server.engine.as_ref(),
        &data["page"],
        &ctx.template_data(&data),
        Some(&ctx.scope),
    )?;
    data["page"] = page;

    if let Some(cases) = &header.switch {
        let outcome = evaluate_switch(
            cases,
            &PageSwitch {
                server,
                ctx: &*ctx,
                data: &data,
            },
        );
        match outcome {
            Some(SwitchOutcome::Redirect(target)) => {
                let location = ctx.t(server.engine.as_ref(), &target.url, &data)?;
                return Ok(redirect(&location, target.code));
            }
            Some(SwitchOutcome::UsePath(path)) => {
                if depth >= MAX_SWITCH_DEPTH {
                    return Err(DiecastError::Template(format!(
                        "switch exceeded {} levels at {}",
                        MAX_SWITCH_DEPTH, path
                    )));
                }
                let path = ctx.t(server.engine.as_ref(), &path, &data)?;
                debug!("[{}] switch: {} -> {}", ctx.id(), candidate.path, path);
                let file = read_file(server, &path).await?;
                let mut inherited = header.clone();
                inherited.switch = None;
                inherited.bindings.clear();
                let next = Candidate::local(&path, file.data, &file.mime_type);
                return Box::pin(render_page(server, ctx, next, inherited, csrf_token, depth + 1)).await;
            }
            None => {}
        }
    }

    if server.config.debug
        && ctx
            .scope
            .query_value("__viewsource")
            .is_some_and(|value| is_truthy(&crate::util::value::autotype(value)))
    {
        return Ok(HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(fragments.debug_output()));
    }

    let phase = ctx.timer.start("tpl", "Diecast Templating");
    let renderer_name = ctx.t(server.engine.as_ref(), &header.renderer, &data)?;
    let renderer = server
        .renderers
        .select(renderer_name.trim(), &candidate.path, &candidate.mime_type, true)?;
    let rendered = renderer.render(&RenderJob {
        engine: server.engine.as_ref(),
        fragments: &fragments,
        data: ctx.template_data(&data),
        mime_type: &candidate.mime_type,
        scope: &ctx.scope,
        raw: &candidate.data[offset..],
    })?;
    let body = server.postprocessors.run(
        &header.postprocessors,
        rendered.body,
        &PostProcessContext {
            mime_type: &rendered.content_type,
            csrf_token,
        },
    )?;
    ctx.timer.finish(phase);

    let mut response_headers = candidate.headers;
    for (name, value) in &header.headers {
        let value = ctx.t(server.engine.as_ref(), &to_display(value), &data)?;
        response_headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        response_headers.push((name.clone(), value));
    }

    let status = if header.status_code != 0 {
        header.status_code
    } else {
        candidate.status
    };
    let mut builder = HttpResponse::build(status_or_ok(status));
    append_headers(&mut builder, response_headers);
    builder.content_type(rendered.content_type);
    add_timing(server, ctx, &mut builder);
    Ok(builder.body(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::util::test_fixtures::TestFixtureRoot;
    use actix_web::body::to_bytes;
    use actix_web::http::header::HeaderMap;
    use actix_web::test::TestRequest;

    fn server(yaml: &str, fixture: &TestFixtureRoot) -> web::Data<Server> {
        let mut config = Config::from_yaml_str(yaml).expect("yaml");
        config.root = fixture.path().display().to_string();
        web::Data::new(Server::new(config.validate().expect("valid")).expect("server"))
    }

    async fn get(server: &web::Data<Server>, uri: &str) -> (StatusCode, String, HeaderMap) {
        let req = TestRequest::get().uri(uri).to_http_request();
        let response = dispatch(req, web::Bytes::new(), server.clone()).await;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body()).await.expect("body");
        (status, String::from_utf8_lossy(&bytes).into_owned(), headers)
    }

    #[actix_web::test]
    async fn static_files_are_served_raw() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        fixture.write("/css/site.css", "body { color: {{ red }} }").expect("css");
        let server = server("", &fixture);

        let (status, body, headers) = get(&server, "/css/site.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "body { color: {{ red }} }");
        assert!(
            headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("text/css"))
        );
    }

    #[actix_web::test]
    async fn pages_render_inside_the_default_layout() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        fixture
            .write("/_layouts/default.html", "<main>{% include \"content\" %}</main>")
            .expect("layout");
        fixture
            .write("/about.html", "---\npage: {title: About}\n---\n<h1>{{ page.title }}</h1>")
            .expect("page");
        let server = server("", &fixture);

        let (status, body, headers) = get(&server, "/about").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<main><h1>About</h1></main>");
        assert!(headers.contains_key(SERVER_TIMING_HEADER));
    }

    #[actix_web::test]
    async fn layouts_can_be_disabled_or_must_exist_when_named() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        fixture
            .write("/_layouts/default.html", "<main>{% include \"content\" %}</main>")
            .expect("layout");
        fixture.write("/bare.html", "---\nlayout: none\n---\nbare").expect("bare");
        fixture.write("/fancy.html", "---\nlayout: fancy\n---\nfancy").expect("fancy");
        let server = server("", &fixture);

        let (_, body, _) = get(&server, "/bare.html").await;
        assert_eq!(body, "bare");
        let (status, _, _) = get(&server, "/fancy.html").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn id_routes_bind_the_path_segment() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        fixture
            .write("/users/__id.html", "user {{ id }} / {{ request.url.params.id }}")
            .expect("route");
        let server = server("", &fixture);

        let (status, body, _) = get(&server, "/users/42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "user 42 / 42");
    }

    #[actix_web::test]
    async fn missing_paths_render_error_pages() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        fixture.write("/_errors/404.html", "gone: {{ status }}").expect("404");
        let server = server("", &fixture);

        let (status, body, _) = get(&server, "/nowhere").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "gone: 404");
    }

    #[actix_web::test]
    async fn header_redirects_and_status_codes() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        fixture
            .write("/old.html", "---\nredirect: {url: \"/new?from={{ request.url.path }}\"}\n---\n")
            .expect("old");
        fixture
            .write("/teapot.html", "---\nstatusCode: 418\nheaders: {X-Kind: pot}\n---\nshort and stout")
            .expect("teapot");
        let server = server("", &fixture);

        let (status, _, headers) = get(&server, "/old.html").await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            headers.get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("/new?from=/old.html")
        );

        let (status, body, headers) = get(&server, "/teapot.html").await;
        assert_eq!(status.as_u16(), 418);
        assert_eq!(body, "short and stout");
        assert_eq!(
            headers.get("x-kind").and_then(|v| v.to_str().ok()),
            Some("pot")
        );
    }

    #[actix_web::test]
    async fn switch_cases_swap_the_rendered_file() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        fixture
            .write(
                "/home.html",
                "---\nswitch:\n  - type: querystring:view\n    condition: compact\n    use: /_views/compact.html\n---\nfull",
            )
            .expect("home");
        fixture.write("/_views/compact.html", "compact").expect("compact");
        let server = server("", &fixture);

        let (_, body, _) = get(&server, "/home.html").await;
        assert_eq!(body, "full");
        let (_, body, _) = get(&server, "/home.html?view=compact").await;
        assert_eq!(body, "compact");
    }

    #[actix_web::test]
    async fn directories_autoindex_when_enabled() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        fixture.write("/files/a.txt", "a").expect("a");
        let server = server("autoindex: true\n", &fixture);

        let (status, body, _) = get(&server, "/files/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Index of /files/"));
        assert!(body.contains("/files/a.txt"));

        let quiet = self::server("", &fixture);
        let (status, _, _) = get(&quiet, "/files/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn introspection_requires_the_binding_header() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        let server = server("", &fixture);

        let (status, _, _) = get(&server, "/_diecast").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let req = TestRequest::get()
            .uri("/_bindings")
            .insert_header((BINDING_HEADER, "loop-check"))
            .to_http_request();
        let response = dispatch(req, web::Bytes::new(), server.clone()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body()).await.expect("body");
        assert_eq!(serde_json::from_slice::<JsonValue>(&bytes).expect("json"), json!([]));
    }

    #[actix_web::test]
    async fn route_prefix_limits_what_is_served() {
        let fixture = TestFixtureRoot::new_unique("dispatch").expect("fixture");
        fixture.write("/index.html", "home").expect("index");
        let server = server("routePrefix: /ui\nenableLayouts: false\n", &fixture);

        let (status, _, _) = get(&server, "/index.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body, _) = get(&server, "/ui/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "home");
    }
}
