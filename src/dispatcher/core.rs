use std::any::Any;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use http::Method;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::dispatcher::form::FormDecoder;
use crate::escape::{percent_unescape, standardize_path};
use crate::request::Request;
use crate::resource::{HandlerResult, Resource};
use crate::response::{
    static_page, Payload, RenderError, SharedResponse, TextResponse, INTERNAL_ERROR_BODY,
    METHOD_NOT_ALLOWED_BODY, NOT_ACCEPTABLE_BODY, NOT_FOUND_BODY,
};
use crate::router::RouteMatch;
use crate::server::Server;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// What the parser knows about the request line when it invokes `answer`:
/// the method token, the path portion of the target (query excluded, still
/// escaped) and the protocol version.
pub struct RequestHead<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub version: &'a str,
}

/// Outcome of one `answer` callback: keep feeding, or write this payload.
pub enum Step {
    Continue,
    Reply(Payload),
}

/// Why the connection reported the request finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Error,
    TimedOut,
    ClientAbort,
}

/// The parser-side data the engine drains while finalising a request.
///
/// Query argument values cross this boundary in raw wire form; unescaping
/// is the engine's job, done exactly once. Cookie parsing and credential
/// extraction have default implementations over `headers()`, so an adapter
/// only supplies the four base accessors.
pub trait Exchange {
    /// Header name/value pairs in arrival order.
    fn headers(&self) -> &[(String, String)];

    /// Raw query pairs in arrival order.
    fn query_args(&self) -> &[(String, String)];

    /// Trailer pairs, for parsers that surface them.
    fn footers(&self) -> &[(String, String)] {
        &[]
    }

    /// Peer socket address.
    fn peer(&self) -> SocketAddr;

    fn cookies(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, value) in self.headers() {
            if !name.eq_ignore_ascii_case("cookie") {
                continue;
            }
            for pair in value.split(';') {
                let mut parts = pair.trim().splitn(2, '=');
                match parts.next() {
                    Some(key) if !key.is_empty() => {
                        let value = parts.next().unwrap_or("").trim().to_string();
                        out.push((key.trim().to_string(), value));
                    }
                    _ => {}
                }
            }
        }
        out
    }

    fn basic_credentials(&self) -> Option<(String, String)> {
        auth::basic_credentials(self.headers())
    }

    fn digest_user(&self) -> Option<String> {
        auth::digest_username(self.headers())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MethodHook {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Connect,
    Trace,
    NotAcceptable,
}

fn select_hook(method: &str) -> Option<(MethodHook, bool)> {
    match method {
        "GET" => Some((MethodHook::Get, false)),
        "POST" => Some((MethodHook::Post, true)),
        "PUT" => Some((MethodHook::Put, true)),
        "DELETE" => Some((MethodHook::Delete, false)),
        "HEAD" => Some((MethodHook::Head, false)),
        "CONNECT" => Some((MethodHook::Connect, false)),
        "TRACE" => Some((MethodHook::Trace, false)),
        _ => None,
    }
}

/// Per-request state, allocated by `uri_log` and consumed by
/// `request_completed`.
pub struct Transaction {
    raw_uri: String,
    second: bool,
    hook: Option<MethodHook>,
    method: Option<Method>,
    request: Option<Request>,
    form: Option<FormDecoder>,
    response: Option<SharedResponse>,
}

impl Transaction {
    /// The URI exactly as received on the wire.
    pub fn raw_uri(&self) -> &str {
        &self.raw_uri
    }
}

impl Server {
    /// URI-logging callback: allocate per-request state for `raw_uri`.
    pub fn uri_log(&self, raw_uri: &str) -> Transaction {
        debug!(uri = %raw_uri, "request state allocated");
        Transaction {
            raw_uri: raw_uri.to_string(),
            second: false,
            hook: None,
            method: None,
            request: None,
            form: None,
            response: None,
        }
    }

    /// Answer callback: advance the request state machine.
    ///
    /// Called once for head-only methods. For bodyful methods the first
    /// call sets up body accumulation and returns [`Step::Continue`]; each
    /// subsequent call appends `chunk` to the raw body (feeding the form
    /// decoder when present) until a zero-size chunk finalises the request.
    pub fn answer(
        &self,
        tx: &mut Transaction,
        ex: &dyn Exchange,
        head: &RequestHead<'_>,
        chunk: Option<&[u8]>,
    ) -> Step {
        if !tx.second {
            return self.first_step(tx, ex, head);
        }
        match chunk {
            Some(data) if !data.is_empty() => {
                if let Some(request) = tx.request.as_mut() {
                    request.grow_content(data);
                    if let Some(form) = tx.form.as_mut() {
                        form.feed(data, request);
                    }
                }
                Step::Continue
            }
            _ => Step::Reply(self.finalize(tx, ex, head)),
        }
    }

    /// Request-completed callback: run the response's completion action and
    /// dispose of the per-request state.
    pub fn request_completed(&self, tx: Transaction, termination: Termination) {
        if let Some(response) = &tx.response {
            response.on_complete();
        }
        debug!(uri = %tx.raw_uri, termination = ?termination, "request completed");
    }

    fn first_step(&self, tx: &mut Transaction, ex: &dyn Exchange, head: &RequestHead<'_>) -> Step {
        self.access_log(&format!("{} METHOD: {}", tx.raw_uri, head.method));

        let (hook, body) = match select_hook(head.method) {
            Some(selected) => selected,
            None => {
                if self.core.config.method_not_acceptable_resource.is_none() {
                    debug!(method = %head.method, "unknown method");
                    return Step::Reply(static_page(406, NOT_ACCEPTABLE_BODY));
                }
                (MethodHook::NotAcceptable, false)
            }
        };
        tx.hook = Some(hook);
        tx.method = Method::from_bytes(head.method.as_bytes()).ok();

        let mut request = Request::new();
        if body {
            if let Some(content_type) = auth::header_value(ex.headers(), "content-type") {
                request.set_header("content-type", content_type);
                if self.core.config.post_process_enabled
                    && starts_with_ci(content_type, FORM_URLENCODED)
                {
                    tx.form = Some(FormDecoder::new());
                }
            }
            tx.request = Some(request);
            tx.second = true;
            Step::Continue
        } else {
            tx.request = Some(request);
            Step::Reply(self.finalize(tx, ex, head))
        }
    }

    /// Final transition: materialise the request, resolve the route, invoke
    /// the handler and render its response into a payload.
    fn finalize(&self, tx: &mut Transaction, ex: &dyn Exchange, head: &RequestHead<'_>) -> Payload {
        let mut request = tx.request.take().unwrap_or_default();
        if let Some(form) = tx.form.as_mut() {
            form.finish(&mut request);
        }

        let path = standardize_path(&self.unescape(head.target));
        request.set_path(&path);
        request.set_method(head.method);
        request.set_version(head.version);

        for (key, value) in ex.query_args() {
            request.push_query_raw(key, value);
            let decoded = self.unescape(value);
            request.set_arg(key, &decoded);
        }
        for (key, value) in ex.headers() {
            request.set_header(key, value);
        }
        for (key, value) in ex.footers() {
            request.set_footer(key, value);
        }
        for (key, value) in ex.cookies() {
            request.set_cookie(&key, &value);
        }

        let peer = ex.peer();
        request.set_requestor(peer.ip());
        request.set_requestor_port(peer.port());

        if self.core.config.basic_auth_enabled {
            if let Some((user, pass)) = ex.basic_credentials() {
                request.set_credentials(user, pass);
            }
        }
        if self.core.config.digest_auth_enabled {
            if let Some(user) = ex.digest_user() {
                request.set_digested_user(user);
            }
        }

        let hook = tx.hook.unwrap_or(MethodHook::Get);
        let (response, payload) = self.dispatch(hook, tx.method.as_ref(), &mut request);
        info!(
            method = %request.method(),
            path = %request.path(),
            status = payload.status,
            "request dispatched"
        );
        tx.request = Some(request);
        tx.response = Some(response);
        payload
    }

    fn dispatch(
        &self,
        hook: MethodHook,
        method: Option<&Method>,
        request: &mut Request,
    ) -> (SharedResponse, Payload) {
        let resolved: Option<RouteMatch> =
            if let Some(single) = &self.core.config.single_resource {
                Some(RouteMatch {
                    resource: single.clone(),
                    not_acceptable: self.core.config.method_not_acceptable_resource.clone(),
                    captures: Default::default(),
                })
            } else {
                let table = self.core.table.read().expect("route table lock poisoned");
                table.resolve(request.path())
            };

        let response = match resolved {
            None => self.not_found_response(hook, request),
            Some(matched) => {
                for (name, value) in &matched.captures {
                    request.set_arg(name, value);
                }
                let request = &*request;
                if hook == MethodHook::NotAcceptable {
                    let target: Arc<dyn Resource> = matched
                        .not_acceptable
                        .clone()
                        .unwrap_or_else(|| matched.resource.clone());
                    match invoke_guarded(target.as_ref(), MethodHook::NotAcceptable, request) {
                        Ok(response) => response,
                        Err(e) => {
                            error!(error = %e, "not-acceptable handler failed");
                            self.internal_error_response(hook, request)
                        }
                    }
                } else if !method.map_or(true, |m| matched.resource.is_allowed(m)) {
                    debug!(method = %request.method(), path = %request.path(), "method not allowed");
                    self.method_not_allowed_response(hook, request)
                } else {
                    match invoke_guarded(matched.resource.as_ref(), hook, request) {
                        Ok(response) => response,
                        Err(e) => {
                            error!(error = %e, path = %request.path(), "handler failed");
                            self.internal_error_response(hook, request)
                        }
                    }
                }
            }
        };
        self.materialize(response, hook, request)
    }

    /// Render a response, translating failures: a missing backing file
    /// becomes the not-found page, anything else the internal-error page.
    /// If the fallback itself fails to render, the static body is used
    /// unconditionally.
    fn materialize(
        &self,
        response: SharedResponse,
        hook: MethodHook,
        request: &Request,
    ) -> (SharedResponse, Payload) {
        match response.render() {
            Ok(payload) => (response, payload),
            Err(RenderError::FileAccess(e)) => {
                warn!(error = %e, path = %request.path(), "response backing file inaccessible");
                let fallback = self.not_found_response(hook, request);
                match fallback.render() {
                    Ok(payload) => (fallback, payload),
                    Err(e) => {
                        error!(error = %e, "not-found fallback failed to render");
                        self.forced_internal()
                    }
                }
            }
            Err(e) => {
                error!(error = %e, path = %request.path(), "response failed to render");
                let fallback = self.internal_error_response(hook, request);
                match fallback.render() {
                    Ok(payload) => (fallback, payload),
                    Err(e) => {
                        error!(error = %e, "internal-error resource failed to render");
                        self.forced_internal()
                    }
                }
            }
        }
    }

    fn not_found_response(&self, hook: MethodHook, request: &Request) -> SharedResponse {
        if let Some(resource) = &self.core.config.not_found_resource {
            match invoke_guarded(resource.as_ref(), hook, request) {
                Ok(response) => return response,
                Err(e) => warn!(error = %e, "not-found resource failed"),
            }
        }
        static_json(404, NOT_FOUND_BODY)
    }

    fn method_not_allowed_response(&self, hook: MethodHook, request: &Request) -> SharedResponse {
        if let Some(resource) = &self.core.config.method_not_allowed_resource {
            match invoke_guarded(resource.as_ref(), hook, request) {
                Ok(response) => return response,
                Err(e) => warn!(error = %e, "method-not-allowed resource failed"),
            }
        }
        static_json(405, METHOD_NOT_ALLOWED_BODY)
    }

    fn internal_error_response(&self, hook: MethodHook, request: &Request) -> SharedResponse {
        if let Some(resource) = &self.core.config.internal_error_resource {
            match invoke_guarded(resource.as_ref(), hook, request) {
                Ok(response) => return response,
                Err(e) => error!(error = %e, "internal-error resource failed"),
            }
        }
        static_json(500, INTERNAL_ERROR_BODY)
    }

    fn forced_internal(&self) -> (SharedResponse, Payload) {
        (
            static_json(500, INTERNAL_ERROR_BODY),
            static_page(500, INTERNAL_ERROR_BODY),
        )
    }

    /// Unescape through the configured delegate, or the default
    /// percent-decoder.
    pub(crate) fn unescape(&self, raw: &str) -> String {
        let delegate = self
            .core
            .unescaper
            .read()
            .expect("unescaper lock poisoned")
            .clone();
        match delegate {
            Some(unescaper) => unescaper.unescape(raw),
            None => percent_unescape(raw),
        }
    }

    fn access_log(&self, line: &str) {
        info!("{line}");
        let sink = self
            .core
            .log_sink
            .read()
            .expect("log sink lock poisoned")
            .clone();
        if let Some(sink) = sink {
            sink.access(line);
        }
    }

    pub(crate) fn error_log(&self, line: &str) {
        error!("{line}");
        let sink = self
            .core
            .log_sink
            .read()
            .expect("log sink lock poisoned")
            .clone();
        if let Some(sink) = sink {
            sink.error(line);
        }
    }
}

fn invoke_hook(resource: &dyn Resource, hook: MethodHook, request: &Request) -> HandlerResult {
    match hook {
        MethodHook::Get => resource.render_get(request),
        MethodHook::Post => resource.render_post(request),
        MethodHook::Put => resource.render_put(request),
        MethodHook::Delete => resource.render_delete(request),
        MethodHook::Head => resource.render_head(request),
        MethodHook::Connect => resource.render_connect(request),
        MethodHook::Trace => resource.render_trace(request),
        MethodHook::NotAcceptable => resource.render_not_acceptable(request),
    }
}

/// Invoke a hook with panic containment: nothing a handler does may escape
/// into the wire driver.
fn invoke_guarded(resource: &dyn Resource, hook: MethodHook, request: &Request) -> HandlerResult {
    match catch_unwind(AssertUnwindSafe(|| invoke_hook(resource, hook, request))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "handler panicked");
            Err(anyhow::anyhow!("handler panicked: {message}"))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<opaque panic payload>".to_string()
    }
}

fn static_json(status: u16, body: &'static str) -> SharedResponse {
    TextResponse::with_status(body, status)
        .content_type("application/json")
        .shared()
}

fn starts_with_ci(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
}
