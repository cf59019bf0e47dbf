//! Embeddable HTTP/1.1 server library.
//!
//! A host program registers [`Resource`] handlers against URL patterns,
//! then runs the daemon: connections are accepted, gated by the IP policy,
//! parsed, dispatched to the most specific matching route and answered.
//! This is the transport and dispatch layer an application links against,
//! not a web framework.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use portico::{HandlerResult, Request, Resource, Server, TextResponse};
//!
//! struct Hello;
//!
//! impl Resource for Hello {
//!     fn render_get(&self, req: &Request) -> HandlerResult {
//!         let who = req.arg("name").unwrap_or("world");
//!         Ok(TextResponse::new(format!("hello, {who}")).shared())
//!     }
//! }
//!
//! let server = Server::builder().port(8080).build();
//! server.register_resource("/hello/{name}", Arc::new(Hello), false).unwrap();
//! server.start(true);
//! ```

mod auth;
mod escape;

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod policy;
pub mod request;
pub mod resource;
pub mod response;
pub mod router;
pub mod server;

pub use cache::{CacheEntry, CacheHit, ReentrantRwLock, ResponseCache};
pub use config::{CredType, RuntimeConfig, ServerBuilder, ServerConfig, StartMode};
pub use dispatcher::{Exchange, RequestHead, Step, Termination, Transaction};
pub use escape::{percent_unescape, Unescaper};
pub use policy::{AddressSet, DefaultPolicy, IpMask, PolicyError, PolicyState};
pub use request::Request;
pub use resource::{HandlerResult, Resource};
pub use response::{
    FileResponse, HttpResponse, JsonResponse, Payload, RenderError, SharedResponse, TextResponse,
};
pub use router::{CaptureVec, EndpointPattern, PatternError, RouteMatch, RouteTable};
pub use server::{LogSink, RequestValidator, Server};
