//! Servable resources and their content sources.
//!
//! A [`Resource`] pairs a route with a [`ContentSource`] and a fixed set of
//! response headers. Resources are immutable once built; everything that
//! varies per request (file contents, handler output) is produced by
//! [`Resource::materialize`] at request time.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::http::{Headers, Response};
use crate::provider::Shared;
use crate::server::ServerError;

/// A zero-argument callable evaluated on every request to a handler resource.
///
/// The registry puts no lock around it; handlers that mutate shared state must
/// be safe to call from several requests at once.
pub type HandlerFn = Arc<dyn Fn() -> String + Send + Sync + 'static>;

/// Errors raised while producing a response body.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a resource's body comes from.
#[derive(Clone)]
pub enum ContentSource {
    /// A fixed payload written verbatim on every request.
    Content(Bytes),
    /// A file re-read from disk on every request.
    File(PathBuf),
    /// A callable invoked on every request.
    Handler(HandlerFn),
}

impl ContentSource {
    /// Produces the body for one request.
    ///
    /// # Errors
    ///
    /// [`ResourceError::Io`] if a file source cannot be read.
    pub fn materialize(&self) -> Result<Bytes, ResourceError> {
        match self {
            Self::Content(bytes) => Ok(bytes.clone()),
            Self::File(path) => std::fs::read(path)
                .map(Bytes::from)
                .map_err(|source| ResourceError::Io {
                    path: path.clone(),
                    source,
                }),
            Self::Handler(func) => Ok(Bytes::from(func())),
        }
    }

    /// The route used when the caller does not pick one.
    ///
    /// Static content is addressed by its fingerprint so identical payloads
    /// share a route; files and handlers get a fresh random token.
    pub fn default_route(&self, extension: Option<&str>) -> String {
        let mut route = match self {
            Self::Content(bytes) => fingerprint(bytes),
            Self::File(_) | Self::Handler(_) => Uuid::new_v4().simple().to_string(),
        };
        if let Some(extension) = extension {
            route.push('.');
            route.push_str(extension);
        }
        route
    }
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content(bytes) => f.debug_tuple("Content").field(&bytes.len()).finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Lowercase hex SHA-256 digest of `content`.
///
/// # Examples
///
/// ```
/// use rttp_provide::resource::fingerprint;
///
/// assert_eq!(fingerprint(b"a"), fingerprint(b"a"));
/// assert_ne!(fingerprint(b"a"), fingerprint(b"b"));
/// assert_eq!(fingerprint(b"").len(), 64);
/// ```
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// A servable unit of content, file, or computed handler output.
///
/// Returned to callers as `Arc<Resource>`. The provider's registry only holds
/// a weak reference, so a resource stops being served once every caller
/// handle is dropped.
pub struct Resource {
    guid: String,
    headers: Headers,
    source: ContentSource,
    provider: Weak<Shared>,
}

impl Resource {
    pub(crate) fn new(
        guid: String,
        headers: Headers,
        source: ContentSource,
        provider: Weak<Shared>,
    ) -> Self {
        Self {
            guid,
            headers,
            source,
            provider,
        }
    }

    /// Route of this resource within its provider, without a leading slash.
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Alias of [`guid`](Self::guid), for callers rewriting URLs.
    pub fn route(&self) -> &str {
        &self.guid
    }

    /// Headers applied verbatim to every response.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    /// Port the owning provider is currently serving on.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotRunning`] if the provider is stopped or gone.
    pub fn port(&self) -> Result<u16, ServerError> {
        let provider = self.provider.upgrade().ok_or(ServerError::NotRunning)?;
        provider.port()
    }

    /// Fully qualified URL, derived from the provider's current port.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotRunning`] if the provider is stopped or gone.
    pub fn url(&self) -> Result<String, ServerError> {
        Ok(format!("http://localhost:{}/{}", self.port()?, self.guid))
    }

    pub fn materialize(&self) -> Result<Bytes, ResourceError> {
        self.source.materialize()
    }

    /// Applies this resource's headers to `response`, then writes the body.
    ///
    /// Configured headers replace any value already on the response, so they
    /// win over an inferred `Content-Type`.
    ///
    /// # Errors
    ///
    /// Propagates [`ResourceError`] from [`materialize`](Self::materialize).
    pub fn get(&self, mut response: Response) -> Result<Response, ResourceError> {
        for (name, value) in self.headers.iter() {
            response.set_header(name, value);
        }
        Ok(response.body_bytes(self.materialize()?))
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("guid", &self.guid)
            .field("headers", &self.headers)
            .field("source", &self.source)
            .finish()
    }
}

/// Normalizes a caller-supplied extension: a leading `.` is dropped and an
/// empty string means no extension.
pub(crate) fn normalize_extension(extension: Option<&str>) -> Option<&str> {
    extension
        .map(|ext| ext.strip_prefix('.').unwrap_or(ext))
        .filter(|ext| !ext.is_empty())
}

/// Strips every leading `/` from a caller-supplied route.
pub(crate) fn normalize_route(route: &str) -> &str {
    route.trim_start_matches('/')
}
