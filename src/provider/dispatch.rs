//! Generic resource dispatcher: `GET /<route>` → registry lookup → resource body.

use tracing::{debug, warn};

use super::registry::Registry;
use crate::context::Context;
use crate::http::mime::content_type_for;
use crate::{Response, Router, StatusCode};

/// Adds the catch-all resource route to `router`.
///
/// Register custom routes before calling this; anything added afterwards is
/// shadowed by the catch-all.
pub fn resource_routes(router: &mut Router, registry: Registry) {
    router.get("/*", move |ctx: Context| {
        let registry = registry.clone();
        async move { dispatch(&registry, ctx.request().path()).await }
    });
}

/// Answers one request path from `registry`.
///
/// Unknown routes get an empty 404. Known routes get a `Content-Type` guessed
/// from the extension, then the resource's own headers and body. Reading the
/// body runs on a blocking thread; an I/O failure or a panicking handler turns
/// into an empty 500 without affecting other requests.
pub async fn dispatch(registry: &Registry, path: &str) -> Response {
    let route = path.trim_start_matches('/');
    let Some(resource) = registry.get(route) else {
        debug!(route, "no resource registered");
        return Response::new(StatusCode::NotFound);
    };

    let mut response = Response::new(StatusCode::Ok);
    if let Some(content_type) = content_type_for(route) {
        response.set_header("Content-Type", content_type);
    }

    match tokio::task::spawn_blocking(move || resource.get(response)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(route, error = %e, "resource failed");
            Response::new(StatusCode::InternalServerError)
        }
        Err(e) => {
            warn!(route, error = %e, "resource handler did not complete");
            Response::new(StatusCode::InternalServerError)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Weak};

    use bytes::Bytes;

    use super::*;
    use crate::http::Headers;
    use crate::resource::{ContentSource, Resource};

    fn register(registry: &Registry, guid: &str, headers: Headers, source: ContentSource) -> Arc<Resource> {
        let resource = Arc::new(Resource::new(guid.to_owned(), headers, source, Weak::new()));
        registry.insert(&resource);
        resource
    }

    #[tokio::test]
    async fn unknown_route_is_404_with_empty_body() {
        let registry = Registry::new();
        let response = dispatch(&registry, "/nothing.json").await;
        assert_eq!(response.status(), StatusCode::NotFound);
        assert!(response.body_ref().is_empty());
    }

    #[tokio::test]
    async fn content_type_is_inferred_from_extension() {
        let registry = Registry::new();
        let _held = register(
            &registry,
            "abc.csv",
            Headers::new(),
            ContentSource::Content(Bytes::from_static(b"x,y\n1,2\n")),
        );
        let response = dispatch(&registry, "/abc.csv").await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("content-type"), Some("text/csv"));
        assert_eq!(response.body_ref().as_ref(), b"x,y\n1,2\n");
    }

    #[tokio::test]
    async fn resource_headers_override_inferred_type() {
        let registry = Registry::new();
        let headers: Headers = [("Content-Type", "application/vnd.lite+json")].into_iter().collect();
        let _held = register(
            &registry,
            "spec.json",
            headers,
            ContentSource::Content(Bytes::from_static(b"{}")),
        );
        let response = dispatch(&registry, "/spec.json").await;
        assert_eq!(
            response.headers().get("content-type"),
            Some("application/vnd.lite+json")
        );
        assert_eq!(response.headers().len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        let _held = register(
            &registry,
            "gone.txt",
            Headers::new(),
            ContentSource::File(dir.path().join("gone.txt")),
        );
        let response = dispatch(&registry, "/gone.txt").await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn panicking_handler_is_500() {
        let registry = Registry::new();
        let _held = register(
            &registry,
            "boom",
            Headers::new(),
            ContentSource::Handler(Arc::new(|| -> String { panic!("handler failure") })),
        );
        let response = dispatch(&registry, "/boom").await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn catch_all_route_serves_registry() {
        let registry = Registry::new();
        let _held = register(
            &registry,
            "hello_world.txt",
            Headers::new(),
            ContentSource::Content(Bytes::from_static(b"hello world")),
        );
        let mut router = Router::new();
        resource_routes(&mut router, registry.clone());

        let (request, _) = crate::Request::parse(
            b"GET /hello_world.txt HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .unwrap();
        let response = router.route(request).await;
        assert_eq!(response.body_ref().as_ref(), b"hello world");
    }
}
