//! HTTP surface: `/<module>[/<function>]` → sandboxed call.
//!
//! The plugin host runs as middleware. When it cannot serve a request
//! (no module, module fails to load, no matching function) it hands the
//! untouched request to the next handler instead of failing.

pub mod files;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::kv::{HostCapabilities, KvStore};
use crate::plugin::resolver::{self, strategies, ContentTag, Resolved, Route, Strategy};
use crate::plugin::{
    module_path, query_overrides, CallOutput, ConfigMap, ModuleDescriptor, Permissions,
    SandboxOptions, SandboxedInstance, StaticConfig,
};

pub use files::{FileFront, FILES_PREFIX};

/// Shared state of the request-driven plugin host.
pub struct PluginHost {
    module_root: PathBuf,
    static_config: StaticConfig,
    options: SandboxOptions,
    store: KvStore,
    max_body_bytes: usize,
}

/// What the host did with a request.
pub enum Dispatch {
    Handled(Response),
    /// Not ours; the request is returned intact for the next handler.
    Declined(Request),
}

impl PluginHost {
    pub fn new(config: &Config, store: KvStore) -> Self {
        Self {
            module_root: config.plugins.path.clone(),
            static_config: config.plugins.static_config(),
            options: config.plugins.sandbox_options(),
            store,
            max_body_bytes: config.server.max_body_bytes,
        }
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    pub async fn dispatch(&self, request: Request) -> Dispatch {
        let Some(route) = Route::parse(request.uri().path()) else {
            return Dispatch::Declined(request);
        };

        let wasm = module_path(&self.module_root, &route.module);
        let descriptor = match ModuleDescriptor::from_file(&wasm, Permissions::none()).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!("Unable to locate module {}: {e}", wasm.display());
                return Dispatch::Declined(request);
            }
        };

        let accept = request
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok());
        let tag = ContentTag::negotiate(accept);
        let candidates = strategies(&route, request.method().as_str(), tag);
        let config = self.static_config.merge(query_overrides(request.uri().query()));

        let (parts, body) = request.into_parts();
        let input = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read request body for {}: {e}", route.module);
                return Dispatch::Handled(
                    (StatusCode::BAD_REQUEST, "failed to read request body").into_response(),
                );
            }
        };

        let capabilities = HostCapabilities::new(self.store.clone());
        let options = self.options.clone();
        let call_input = input.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            invoke(&descriptor, &config, &capabilities, &options, &candidates, tag, &call_input)
        })
        .await;

        match outcome {
            Ok(Ok((resolved, output))) => {
                info!(
                    "{}.{} → {} ({} bytes)",
                    route.module,
                    resolved.function_name(),
                    output.code,
                    output.output.len()
                );
                Dispatch::Handled(respond(&resolved, output))
            }
            Ok(Err(e)) if e.is_pass_through() => {
                debug!("Passing {} to next handler: {e}", parts.uri);
                Dispatch::Declined(Request::from_parts(parts, Body::from(input)))
            }
            Ok(Err(e)) => {
                error!("Plugin {} failed: {e}", route.module);
                Dispatch::Handled((StatusCode::INTERNAL_SERVER_ERROR, "plugin call failed").into_response())
            }
            Err(e) => {
                error!("Plugin task for {} did not complete: {e}", route.module);
                Dispatch::Handled(StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
        }
    }
}

/// Load, resolve, call. The instance is dropped on every path out.
fn invoke(
    descriptor: &ModuleDescriptor,
    config: &ConfigMap,
    capabilities: &HostCapabilities,
    options: &SandboxOptions,
    candidates: &[Strategy],
    tag: ContentTag,
    input: &Bytes,
) -> Result<(Resolved, CallOutput)> {
    let instance = SandboxedInstance::load(descriptor, config, capabilities, options)?;
    let resolved = resolver::resolve(candidates, tag, |name| instance.function_exists(name))?;
    debug!("{}: resolved {:?}", descriptor.name(), resolved.strategy);
    let output = instance.call(resolved.function_name(), input)?;
    Ok((resolved, output))
}

fn respond(resolved: &Resolved, output: CallOutput) -> Response {
    let status = status_for(output.code);
    if status.is_server_error() {
        error!("{} returned code {}", resolved.function_name(), output.code);
    }
    (
        status,
        [(header::CONTENT_TYPE, resolved.content_type)],
        output.output,
    )
        .into_response()
}

/// Guest return code → HTTP status. 0 is success, negative is a server
/// fault, anything else passes through when it is a valid status.
pub fn status_for(code: i32) -> StatusCode {
    match code {
        0 => StatusCode::OK,
        c if c < 0 => StatusCode::INTERNAL_SERVER_ERROR,
        c => u16::try_from(c)
            .ok()
            .and_then(|c| StatusCode::from_u16(c).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Middleware entry point; use with `axum::middleware::from_fn_with_state`.
pub async fn plugin_middleware(
    State(host): State<Arc<PluginHost>>,
    request: Request,
    next: Next,
) -> Response {
    match host.dispatch(request).await {
        Dispatch::Handled(response) => response,
        Dispatch::Declined(request) => next.run(request).await,
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// The plugin host in front of a plain 404 handler.
pub fn router(host: Arc<PluginHost>) -> Router {
    app(host, None)
}

/// The plugin host in front of the file routes, when there are any, and
/// a 404 handler.
pub fn app(host: Arc<PluginHost>, files: Option<FileFront>) -> Router {
    let next = files.map(FileFront::routes).unwrap_or_default();
    with_next(next.fallback(not_found), host)
}

/// Puts the plugin host in front of `next`; requests it declines reach
/// `next` unchanged.
pub fn with_next(next: Router, host: Arc<PluginHost>) -> Router {
    next.layer(middleware::from_fn_with_state(host, plugin_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::invoker::testing::*;
    use axum::http::Method;
    use tower::ServiceExt;

    struct Fixture {
        dir: tempfile::TempDir,
        host: Arc<PluginHost>,
    }

    fn fixture(static_config: &[(&str, &str)], max_body_bytes: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let modules: [(&str, Vec<u8>); 6] = [
            ("echo", echo_module()),
            ("content", responder_module(&["get_json", "get_text", "respond"])),
            ("bare", responder_module(&["get_html"])),
            ("faults", fault_module()),
            ("kv", kv_module()),
            ("config", config_module()),
        ];
        for (name, bytes) in modules {
            std::fs::write(dir.path().join(format!("{name}.wasm")), bytes).unwrap();
        }
        std::fs::write(dir.path().join("broken.wasm"), b"not wasm at all").unwrap();

        let mut config = Config::default();
        config.plugins.path = dir.path().to_path_buf();
        config.server.max_body_bytes = max_body_bytes;
        for (k, v) in static_config {
            config.plugins.config.insert(k.to_string(), v.to_string());
        }
        Fixture {
            host: Arc::new(PluginHost::new(&config, KvStore::in_memory())),
            dir,
        }
    }

    fn request(method: Method, uri: &str, accept: Option<&str>, body: &'static [u8]) -> Request {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn send(app: Router, req: Request) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        (status, content_type, body)
    }

    // ── Status mapping ──────────────────────────────

    #[test]
    fn test_status_for() {
        assert_eq!(status_for(0), StatusCode::OK);
        assert_eq!(status_for(-1), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(-500), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(201), StatusCode::CREATED);
        assert_eq!(status_for(404), StatusCode::NOT_FOUND);
        assert_eq!(status_for(1), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(70_000), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ── Dispatch ────────────────────────────────────

    #[tokio::test]
    async fn test_explicit_echo_returns_body() {
        let f = fixture(&[], 1024);
        let (status, content_type, body) = send(
            router(f.host.clone()),
            request(Method::POST, "/echo/echo", None, b"hello plugin"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello plugin");
        assert_eq!(content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_convention_name_preferred_over_respond() {
        let f = fixture(&[], 1024);
        let (status, content_type, body) = send(
            router(f.host.clone()),
            request(Method::GET, "/content", Some("application/json"), b""),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"get_json");
        assert_eq!(content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_default_accept_uses_text() {
        let f = fixture(&[], 1024);
        let (_, content_type, body) = send(
            router(f.host.clone()),
            request(Method::GET, "/content", None, b""),
        )
        .await;
        assert_eq!(body, b"get_text");
        assert_eq!(content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_falls_back_to_respond() {
        let f = fixture(&[], 1024);
        let (status, content_type, body) = send(
            router(f.host.clone()),
            request(Method::GET, "/content", Some("text/html"), b""),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"respond");
        assert_eq!(content_type.as_deref(), Some("text/html"));
    }

    #[tokio::test]
    async fn test_json_suffix_forces_content_type() {
        let f = fixture(&[], 1024);
        let (_, content_type, body) = send(
            router(f.host.clone()),
            request(Method::GET, "/content/get_json", Some("text/html"), b""),
        )
        .await;
        assert_eq!(body, b"get_json");
        assert_eq!(content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_no_matching_function_falls_through() {
        let f = fixture(&[], 1024);
        let (status, _, _) = send(
            router(f.host.clone()),
            request(Method::GET, "/bare", Some("application/json"), b""),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_next_handler_receives_original_body() {
        let f = fixture(&[], 1024);
        let next = Router::new().fallback(|body: String| async move { format!("next got {body}") });
        let app = with_next(next, f.host.clone());

        let (status, _, body) = send(
            app.clone(),
            request(Method::POST, "/bare/missing_fn", None, b"payload"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"next got payload");

        let (_, _, body) = send(app, request(Method::POST, "/nomodule", None, b"other")).await;
        assert_eq!(body, b"next got other");
    }

    #[tokio::test]
    async fn test_missing_and_broken_modules_fall_through() {
        let f = fixture(&[], 1024);
        for uri in ["/missing", "/broken", "/"] {
            let (status, _, _) = send(router(f.host.clone()), request(Method::GET, uri, None, b"")).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_guest_status_code_passes_through() {
        let f = fixture(&[], 1024);
        let (status, _, body) = send(
            router(f.host.clone()),
            request(Method::POST, "/faults/created", None, b""),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, b"created");
    }

    #[tokio::test]
    async fn test_trap_is_server_error() {
        let f = fixture(&[], 1024);
        let (status, _, _) = send(
            router(f.host.clone()),
            request(Method::POST, "/faults/boom", None, b""),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_deadline_is_server_error() {
        let f = fixture(&[], 1024);
        let mut config = Config::default();
        config.plugins.path = f.dir.path().to_path_buf();
        config.plugins.timeout_ms = 200;
        let host = Arc::new(PluginHost::new(&config, KvStore::in_memory()));

        let (status, _, _) = send(router(host), request(Method::POST, "/faults/spin", None, b"")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let f = fixture(&[], 4);
        let (status, _, _) = send(
            router(f.host.clone()),
            request(Method::POST, "/echo/echo", None, b"far too long"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_overrides_static_config() {
        let f = fixture(&[("x", "1")], 1024);
        let (_, _, body) = send(
            router(f.host.clone()),
            request(Method::GET, "/config", None, b""),
        )
        .await;
        assert_eq!(body, b"1");

        let (_, _, body) = send(
            router(f.host.clone()),
            request(Method::GET, "/config?x=2", None, b""),
        )
        .await;
        assert_eq!(body, b"2");

        // The static map is untouched by the previous request.
        let (_, _, body) = send(
            router(f.host.clone()),
            request(Method::GET, "/config", None, b""),
        )
        .await;
        assert_eq!(body, b"1");
    }

    #[tokio::test]
    async fn test_kv_round_trip_across_requests() {
        let f = fixture(&[], 1024);
        let (status, _, _) = send(
            router(f.host.clone()),
            request(Method::POST, "/kv/put", None, &[1, 2, 3]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(f.host.store().read("a").unwrap(), vec![1, 2, 3]);

        let (status, _, body) = send(
            router(f.host.clone()),
            request(Method::GET, "/kv/get", None, b""),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, vec![1, 2, 3]);
    }
}
