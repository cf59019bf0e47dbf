//! # Router Module
//!
//! URL pattern compilation and route resolution.
//!
//! Patterns are compiled once at registration into a sequence of segments:
//! literal text, `{name}` parameters, or (when regex checking is enabled)
//! regex fragments. Resolution first tries an exact lookup on the normalised
//! URL and only then scans for the most specific matching pattern, ranked by
//! the `(piece_count, total_size)` tuple with insertion order breaking ties.
//!
//! A *family* pattern matches every URL that begins with its segments, which
//! is how a resource claims a whole subtree.

mod pattern;
mod table;

pub use pattern::{CaptureVec, EndpointPattern, PatternError, MAX_INLINE_CAPTURES};
pub use table::{RouteMatch, RouteTable};
