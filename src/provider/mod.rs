//! Resource provider — a route registry fronted by a lazily started background server.
//!
//! [`Provider::create`] turns a [`NewResource`] description into a served
//! [`Resource`] and starts the server on first use. The returned
//! `Arc<Resource>` is what keeps the route alive; the provider only holds a
//! weak reference to it.
//!
//! ```rust,no_run
//! use rttp_provide::provider::{NewResource, Provider};
//!
//! let provider = Provider::new();
//! let resource = provider.create(NewResource::new().content("hello world").extension("txt"))?;
//! println!("{}", resource.url()?);
//! provider.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::background::{BackgroundServer, ServerConfig};
use crate::http::Headers;
use crate::resource::{self, ContentSource, HandlerFn, Resource};
use crate::router::Router;
use crate::server::ServerError;

pub mod dispatch;
pub mod registry;

pub use registry::Registry;

/// Errors returned by [`Provider`] operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid resource configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Caller mistakes in a [`NewResource`] description.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("must provide exactly one of content, filepath, or handler (got {found})")]
    SourceCount { found: usize },

    #[error("should only provide one of route or extension")]
    RouteAndExtension,

    #[error("route is empty once leading slashes are removed")]
    EmptyRoute,
}

/// Description of a resource to create.
///
/// Exactly one of [`content`](Self::content), [`filepath`](Self::filepath), or
/// [`handler`](Self::handler) must be set, and [`route`](Self::route) cannot be
/// combined with [`extension`](Self::extension). Both rules are checked by
/// [`Provider::create`].
#[derive(Default)]
pub struct NewResource {
    content: Option<Bytes>,
    filepath: Option<PathBuf>,
    handler: Option<HandlerFn>,
    headers: Headers,
    extension: Option<String>,
    route: Option<String>,
    port: Option<u16>,
}

impl NewResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a fixed payload. The default route is its fingerprint.
    #[must_use]
    pub fn content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Serve a file, re-read on every request.
    #[must_use]
    pub fn filepath(mut self, path: impl Into<PathBuf>) -> Self {
        self.filepath = Some(path.into());
        self
    }

    /// Serve the output of `handler`, called on every request.
    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers.insert(name, value);
        }
        self
    }

    /// Suffix appended to a generated route as `.<extension>`.
    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Serve at exactly this route (leading slashes are dropped).
    #[must_use]
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Make sure the server listens on `port`, restarting it there if it is
    /// currently bound elsewhere.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

// State reachable from resources (for their URLs) as well as the provider.
pub(crate) struct Shared {
    registry: Registry,
    server: Mutex<BackgroundServer>,
    // 0 while stopped; read without the server lock so URL lookups never wait on start/stop.
    bound_port: AtomicU16,
    config: ServerConfig,
}

impl Shared {
    pub(crate) fn port(&self) -> Result<u16, ServerError> {
        match self.bound_port.load(Ordering::Acquire) {
            0 => Err(ServerError::NotRunning),
            port => Ok(port),
        }
    }

    fn ensure_running(&self, port: Option<u16>) -> Result<u16, ServerError> {
        let mut server = self.server.lock();

        if let (Some(wanted), Ok(bound)) = (port, server.port()) {
            if wanted != bound {
                info!(from = bound, to = wanted, "switching resource server port");
                self.bound_port.store(0, Ordering::Release);
                server.stop();
            }
        }

        let config = match port {
            Some(port) => self.config.clone().port(port),
            None => self.config.clone(),
        };
        let bound = server.start(&config)?.port()?;
        self.bound_port.store(bound, Ordering::Release);
        Ok(bound)
    }

    fn stop(&self) {
        let mut server = self.server.lock();
        self.bound_port.store(0, Ordering::Release);
        server.stop();
    }
}

/// Builds a [`Provider`] with custom server options or extra routes.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_provide::provider::Provider;
/// use rttp_provide::{Context, Response, StatusCode};
///
/// let provider = Provider::builder()
///     .routes(|router| {
///         router.get("/", |_ctx: Context| async {
///             Response::new(StatusCode::Ok)
///                 .header("Content-Type", "text/html")
///                 .body("<p>data server</p>")
///         });
///     })
///     .build();
/// ```
#[derive(Default)]
pub struct ProviderBuilder {
    config: ServerConfig,
    extra_routes: Vec<Box<dyn FnOnce(&mut Router)>>,
}

impl ProviderBuilder {
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds routes that are matched before the generic resource dispatcher.
    ///
    /// Closures run in the order they were added.
    #[must_use]
    pub fn routes(mut self, extend: impl FnOnce(&mut Router) + 'static) -> Self {
        self.extra_routes.push(Box::new(extend));
        self
    }

    pub fn build(self) -> Provider {
        let registry = Registry::new();
        let mut router = Router::new();
        for extend in self.extra_routes {
            extend(&mut router);
        }
        dispatch::resource_routes(&mut router, registry.clone());

        Provider {
            shared: Arc::new(Shared {
                registry,
                server: Mutex::new(BackgroundServer::new(Arc::new(router))),
                bound_port: AtomicU16::new(0),
                config: self.config,
            }),
        }
    }
}

/// A registry of [`Resource`]s plus the background server that serves them.
///
/// All methods take `&self`; a provider can be shared between threads.
pub struct Provider {
    shared: Arc<Shared>,
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider {
    /// A provider with default server options and only the resource dispatcher.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    /// The registry this provider serves from.
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// The full dispatch table: extra routes first, then the resource dispatcher.
    pub fn router(&self) -> Arc<Router> {
        Arc::clone(self.shared.server.lock().router())
    }

    /// Creates, registers, and serves a resource.
    ///
    /// The route is `new.route` if given, otherwise derived from the source
    /// (see [`ContentSource::default_route`]). Creating identical content with
    /// identical headers and extension while the first resource is still alive
    /// returns that same resource.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::Config`] for a malformed description.
    /// - [`ProviderError::Server`] if the server cannot be started.
    pub fn create(&self, new: NewResource) -> Result<Arc<Resource>, ProviderError> {
        let NewResource {
            content,
            filepath,
            handler,
            headers,
            extension,
            route,
            port,
        } = new;

        // Empty content and empty paths count as not supplied.
        let content = content.filter(|content| !content.is_empty());
        let filepath = filepath.filter(|path| !path.as_os_str().is_empty());
        let found = [content.is_some(), filepath.is_some(), handler.is_some()]
            .into_iter()
            .filter(|supplied| *supplied)
            .count();
        let source = match (content, filepath, handler) {
            (Some(content), None, None) => ContentSource::Content(content),
            (None, Some(path), None) => ContentSource::File(path),
            (None, None, Some(handler)) => ContentSource::Handler(handler),
            _ => return Err(ConfigError::SourceCount { found }.into()),
        };

        let extension = resource::normalize_extension(extension.as_deref());
        let guid = match route.as_deref() {
            Some(_) if extension.is_some() => return Err(ConfigError::RouteAndExtension.into()),
            Some(route) => match resource::normalize_route(route) {
                "" => return Err(ConfigError::EmptyRoute.into()),
                route => route.to_owned(),
            },
            None => source.default_route(extension),
        };

        self.shared.ensure_running(port)?;

        if let Some(existing) = self.reusable(&guid, &headers, &source) {
            debug!(route = %guid, "reusing identical content resource");
            return Ok(existing);
        }

        let resource = Arc::new(Resource::new(
            guid,
            headers,
            source,
            Arc::downgrade(&self.shared),
        ));
        self.shared.registry.insert(&resource);
        debug!(route = resource.guid(), "resource registered");
        Ok(resource)
    }

    // A live content resource at `guid` with the same payload and headers.
    fn reusable(&self, guid: &str, headers: &Headers, source: &ContentSource) -> Option<Arc<Resource>> {
        let ContentSource::Content(content) = source else {
            return None;
        };
        let existing = self.shared.registry.get(guid)?;
        let identical = matches!(existing.source(), ContentSource::Content(current) if current == content)
            && existing.headers() == headers;
        identical.then_some(existing)
    }

    /// Starts the server if needed and returns its port.
    ///
    /// With `Some(port)`, a server bound to a different port is restarted there.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Server`] if binding fails.
    pub fn start(&self, port: Option<u16>) -> Result<u16, ProviderError> {
        Ok(self.shared.ensure_running(port)?)
    }

    /// Stops the server. Registered resources stay registered and are served
    /// again, possibly on another port, after the next `start` or `create`.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Stops the server and forgets every registered resource.
    pub fn reset(&self) {
        self.shared.stop();
        self.shared.registry.clear();
    }

    pub fn is_running(&self) -> bool {
        self.shared.port().is_ok()
    }

    /// # Errors
    ///
    /// [`ServerError::NotRunning`] when stopped.
    pub fn port(&self) -> Result<u16, ProviderError> {
        Ok(self.shared.port()?)
    }

    /// Base URL, `http://localhost:<port>`.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotRunning`] when stopped.
    pub fn url(&self) -> Result<String, ProviderError> {
        Ok(format!("http://localhost:{}", self.port()?))
    }

    /// Number of live registered resources.
    pub fn len(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.registry.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{Context, Response, StatusCode};

    fn fetch(url: &str) -> (u16, Option<String>, String) {
        let response = reqwest::blocking::get(url).unwrap();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        (status, content_type, response.text().unwrap())
    }

    fn free_port() -> u16 {
        let probe = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        probe.local_addr().unwrap().port()
    }

    #[test]
    fn content_default_url_is_content_addressed() {
        let provider = Provider::new();
        let first = provider
            .create(NewResource::new().content("hello world").extension("txt"))
            .unwrap();
        let second = provider
            .create(NewResource::new().content("hello world").extension("txt"))
            .unwrap();

        assert_eq!(first.url().unwrap(), second.url().unwrap());
        assert!(first.url().unwrap().ends_with(".txt"));
        assert!(Arc::ptr_eq(&first, &second));
        provider.stop();
    }

    #[test]
    fn different_content_gets_different_routes() {
        let provider = Provider::new();
        let a = provider.create(NewResource::new().content("a").extension("json")).unwrap();
        let b = provider.create(NewResource::new().content("b").extension("json")).unwrap();
        assert_ne!(a.route(), b.route());
        provider.stop();
    }

    #[test]
    fn explicit_route_is_used_verbatim() {
        let provider = Provider::new();
        let resource = provider
            .create(NewResource::new().content("hello world").route("/hello_world.txt"))
            .unwrap();
        let url = resource.url().unwrap();
        assert_eq!(url.rsplit('/').next(), Some("hello_world.txt"));
        assert_eq!(fetch(&url).2, "hello world");
        provider.stop();
    }

    #[test]
    fn source_count_is_validated() {
        let provider = Provider::new();
        let none = provider.create(NewResource::new()).unwrap_err();
        assert!(matches!(
            none,
            ProviderError::Config(ConfigError::SourceCount { found: 0 })
        ));

        let two = provider
            .create(NewResource::new().content("x").handler(String::new))
            .unwrap_err();
        assert!(matches!(
            two,
            ProviderError::Config(ConfigError::SourceCount { found: 2 })
        ));

        let three = provider
            .create(
                NewResource::new()
                    .content("x")
                    .filepath("/tmp/x")
                    .handler(String::new),
            )
            .unwrap_err();
        assert!(matches!(
            three,
            ProviderError::Config(ConfigError::SourceCount { found: 3 })
        ));
        assert!(!provider.is_running());
    }

    #[test]
    fn empty_sources_are_not_counted() {
        let provider = Provider::new();
        let err = provider.create(NewResource::new().content("")).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Config(ConfigError::SourceCount { found: 0 })
        ));

        let err = provider.create(NewResource::new().filepath("")).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Config(ConfigError::SourceCount { found: 0 })
        ));

        let resource = provider
            .create(NewResource::new().content("").handler(|| "from handler".to_owned()))
            .unwrap();
        assert!(matches!(resource.source(), ContentSource::Handler(_)));
        provider.stop();
    }

    #[test]
    fn route_and_extension_conflict() {
        let provider = Provider::new();
        let err = provider
            .create(NewResource::new().content("x").route("a.txt").extension("txt"))
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Config(ConfigError::RouteAndExtension)
        ));

        let err = provider
            .create(NewResource::new().content("x").route("///"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Config(ConfigError::EmptyRoute)));
    }

    #[test]
    fn end_to_end_content_fetch() {
        let provider = Provider::new();
        let resource = provider
            .create(NewResource::new().content("hello world").extension("txt"))
            .unwrap();
        let url = resource.url().unwrap();
        assert!(url.starts_with("http://localhost:"));

        let (status, content_type, body) = fetch(&url);
        assert_eq!(status, 200);
        assert_eq!(content_type.as_deref(), Some("text/plain"));
        assert_eq!(body, "hello world");
        provider.stop();
    }

    #[test]
    fn unregistered_route_is_404() {
        let provider = Provider::new();
        provider.start(None).unwrap();
        let (status, _, body) = fetch(&format!("{}/does-not-exist.json", provider.url().unwrap()));
        assert_eq!(status, 404);
        assert!(body.is_empty());
        provider.stop();
    }

    #[test]
    fn stateful_handler_yields_fresh_output() {
        let provider = Provider::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let resource = provider
            .create(NewResource::new().handler(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!("request {n}")
            }))
            .unwrap();

        let url = resource.url().unwrap();
        assert_eq!(fetch(&url).2, "request 1");
        assert_eq!(fetch(&url).2, "request 2");
        provider.stop();
    }

    #[test]
    fn file_resource_reflects_current_contents() {
        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        std::fs::write(file.path(), "x\n1\n").unwrap();

        let provider = Provider::new();
        let resource = provider
            .create(NewResource::new().filepath(file.path()).extension("csv"))
            .unwrap();
        let url = resource.url().unwrap();
        assert_eq!(fetch(&url).2, "x\n1\n");

        std::fs::write(file.path(), "x\n2\n").unwrap();
        let (status, content_type, body) = fetch(&url);
        assert_eq!(status, 200);
        assert_eq!(content_type.as_deref(), Some("text/csv"));
        assert_eq!(body, "x\n2\n");
        provider.stop();
    }

    #[test]
    fn missing_file_is_500_and_server_keeps_serving() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Provider::new();
        let broken = provider
            .create(NewResource::new().filepath(dir.path().join("absent.json")))
            .unwrap();
        let panicking = provider
            .create(NewResource::new().handler(|| -> String { panic!("boom") }))
            .unwrap();
        let fine = provider.create(NewResource::new().content("ok")).unwrap();

        assert_eq!(fetch(&broken.url().unwrap()).0, 500);
        assert_eq!(fetch(&panicking.url().unwrap()).0, 500);
        assert_eq!(fetch(&fine.url().unwrap()).2, "ok");
        provider.stop();
    }

    #[test]
    fn configured_headers_are_sent() {
        let provider = Provider::new();
        let resource = provider
            .create(
                NewResource::new()
                    .content("{}")
                    .extension("json")
                    .header("Access-Control-Allow-Origin", "*"),
            )
            .unwrap();
        let response = reqwest::blocking::get(resource.url().unwrap()).unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        provider.stop();
    }

    #[test]
    fn port_is_unavailable_until_started() {
        let provider = Provider::new();
        assert!(matches!(
            provider.port(),
            Err(ProviderError::Server(ServerError::NotRunning))
        ));
        let port = provider.start(None).unwrap();
        assert!(port > 0);
        assert_eq!(provider.port().unwrap(), port);
        provider.stop();
        assert!(provider.port().is_err());
    }

    #[test]
    fn restart_serves_existing_resources() {
        let provider = Provider::new();
        let resource = provider.create(NewResource::new().content("persist")).unwrap();
        provider.stop();
        assert!(resource.url().is_err());

        provider.start(None).unwrap();
        assert_eq!(fetch(&resource.url().unwrap()).2, "persist");
        provider.stop();
    }

    #[test]
    fn requesting_another_port_moves_the_server() {
        let provider = Provider::new();
        let first = provider.create(NewResource::new().content("moving")).unwrap();
        let old_port = first.port().unwrap();

        let new_port = loop {
            let candidate = free_port();
            if candidate != old_port {
                break candidate;
            }
        };
        let second = provider
            .create(NewResource::new().content("other").port(new_port))
            .unwrap();

        assert_eq!(second.port().unwrap(), new_port);
        assert!(first.url().unwrap().contains(&format!(":{new_port}/")));
        assert_eq!(fetch(&first.url().unwrap()).2, "moving");
        provider.stop();
    }

    #[test]
    fn dropped_resources_stop_being_served() {
        let provider = Provider::new();
        let resource = provider.create(NewResource::new().content("ephemeral")).unwrap();
        let url = resource.url().unwrap();
        assert_eq!(provider.len(), 1);

        drop(resource);
        assert_eq!(provider.len(), 0);
        assert_eq!(fetch(&url).0, 404);
        provider.stop();
    }

    #[test]
    fn reset_forgets_resources() {
        let provider = Provider::new();
        let resource = provider.create(NewResource::new().content("gone soon")).unwrap();
        provider.reset();
        assert!(!provider.is_running());
        assert!(provider.is_empty());

        provider.start(None).unwrap();
        let url = format!("{}/{}", provider.url().unwrap(), resource.route());
        assert_eq!(fetch(&url).0, 404);
        provider.stop();
    }

    #[test]
    fn custom_routes_take_precedence() {
        let provider = Provider::builder()
            .routes(|router| {
                router.get("/", |_ctx: Context| async {
                    Response::new(StatusCode::Ok)
                        .header("Content-Type", "text/html")
                        .body("<h1>index</h1>")
                });
            })
            .build();
        assert_eq!(provider.router().len(), 2);

        let resource = provider.create(NewResource::new().content("data")).unwrap();
        let base = provider.url().unwrap();
        let (status, content_type, body) = fetch(&format!("{base}/"));
        assert_eq!(status, 200);
        assert_eq!(content_type.as_deref(), Some("text/html"));
        assert_eq!(body, "<h1>index</h1>");
        assert_eq!(fetch(&resource.url().unwrap()).2, "data");
        provider.stop();
    }

    #[test]
    fn concurrent_requests_are_served() {
        let provider = Provider::new();
        let resources: Vec<_> = (0..8)
            .map(|i| provider.create(NewResource::new().content(format!("body {i}"))).unwrap())
            .collect();

        std::thread::scope(|scope| {
            for (i, resource) in resources.iter().enumerate() {
                let url = resource.url().unwrap();
                scope.spawn(move || assert_eq!(fetch(&url).2, format!("body {i}")));
            }
        });
        provider.stop();
    }
}
