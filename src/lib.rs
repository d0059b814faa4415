//! # rttp-provide
//!
//! Serve in-process data over HTTP from a background thread.
//!
//! A [`Provider`] owns a registry of [`Resource`]s and a [`BackgroundServer`]
//! that answers `GET /<route>` for each of them. Resources are backed by fixed
//! content, a file read on every request, or a handler called on every request.
//! The server starts on first use and keeps serving until the provider is
//! stopped or dropped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rttp_provide::{NewResource, Provider};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::new();
//!     let resource = provider.create(NewResource::new().content("hello world").extension("txt"))?;
//!     println!("Serving at {}", resource.url()?);
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod context;
pub mod data;
pub mod http;
pub mod provider;
pub mod resource;
pub mod router;
pub mod server;

pub use background::{BackgroundServer, ServerConfig};
pub use context::Context;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use provider::{NewResource, Provider, ProviderError};
pub use resource::Resource;
pub use router::Router;
pub use server::{Server, ServerError};
