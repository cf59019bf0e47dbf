//! The handler contract.
//!
//! A [`Resource`] is registered against a URL pattern and receives fully
//! constructed requests. Per-method hooks default to the [`Resource::render`]
//! catch-all, so a resource only overrides what it serves. The engine
//! selects the hook from the HTTP method, consults
//! [`Resource::is_allowed`] first, and translates both `Err` returns and
//! panics into 500 responses at the dispatch boundary.

use http::Method;

use crate::request::Request;
use crate::response::{SharedResponse, TextResponse, NOT_ACCEPTABLE_BODY};

/// What a handler hook produces: a shared response, or an error the engine
/// turns into an internal-error page.
pub type HandlerResult = anyhow::Result<SharedResponse>;

pub trait Resource: Send + Sync {
    /// Catch-all renderer used by every method hook that is not overridden.
    fn render(&self, _req: &Request) -> HandlerResult {
        Ok(TextResponse::new("").shared())
    }

    fn render_get(&self, req: &Request) -> HandlerResult {
        self.render(req)
    }

    fn render_post(&self, req: &Request) -> HandlerResult {
        self.render(req)
    }

    fn render_put(&self, req: &Request) -> HandlerResult {
        self.render(req)
    }

    fn render_delete(&self, req: &Request) -> HandlerResult {
        self.render(req)
    }

    fn render_head(&self, req: &Request) -> HandlerResult {
        self.render(req)
    }

    fn render_connect(&self, req: &Request) -> HandlerResult {
        self.render(req)
    }

    fn render_trace(&self, req: &Request) -> HandlerResult {
        self.render(req)
    }

    /// Invoked for requests whose HTTP method is not one the engine knows.
    /// The default produces the stock 406 body; a server-level override
    /// configured at registration time takes precedence over this hook.
    fn render_not_acceptable(&self, _req: &Request) -> HandlerResult {
        Ok(TextResponse::with_status(NOT_ACCEPTABLE_BODY, 406)
            .content_type("application/json")
            .shared())
    }

    /// Method allowance gate; a `false` yields a 405 without invoking the
    /// hook.
    fn is_allowed(&self, _method: &Method) -> bool {
        true
    }
}
