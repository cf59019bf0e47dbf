use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::resource::Resource;
use crate::router::pattern::{CaptureVec, EndpointPattern, PatternError};

/// Result of resolving a URL to a registered resource.
pub struct RouteMatch {
    pub resource: Arc<dyn Resource>,
    /// Method-not-acceptable override propagated at registration time.
    pub not_acceptable: Option<Arc<dyn Resource>>,
    pub captures: CaptureVec,
}

struct RouteEntry {
    pattern: EndpointPattern,
    resource: Arc<dyn Resource>,
    not_acceptable: Option<Arc<dyn Resource>>,
}

/// Mapping from endpoint pattern to resource.
///
/// Readers observe a consistent snapshot under the server's route lock;
/// registration during serving takes the writer side. Entries keep their
/// insertion order, which is what breaks specificity ties deterministically.
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    regex_checking: bool,
}

impl RouteTable {
    pub fn new(regex_checking: bool) -> Self {
        Self {
            entries: Vec::new(),
            regex_checking,
        }
    }

    /// Register a resource under a URL template. Re-registering the same
    /// normalised template replaces the resource in place.
    pub fn register(
        &mut self,
        template: &str,
        resource: Arc<dyn Resource>,
        family: bool,
        not_acceptable: Option<Arc<dyn Resource>>,
    ) -> Result<(), PatternError> {
        let pattern = EndpointPattern::parse(template, family, self.regex_checking)?;
        info!(
            route = %pattern.url(),
            family = family,
            total_routes = self.entries.len() + 1,
            "route registered"
        );
        if let Some(entry) = self.entries.iter_mut().find(|e| e.pattern == pattern) {
            entry.resource = resource;
            entry.not_acceptable = not_acceptable;
        } else {
            self.entries.push(RouteEntry {
                pattern,
                resource,
                not_acceptable,
            });
        }
        Ok(())
    }

    /// Remove a route by its template string.
    pub fn unregister(&mut self, template: &str) {
        let url = EndpointPattern::normalize(template);
        let before = self.entries.len();
        self.entries.retain(|e| e.pattern.url() != url);
        if self.entries.len() != before {
            debug!(route = %url, "route unregistered");
        }
    }

    /// Resolve a normalised URL to a resource.
    ///
    /// An exact-equality lookup on the pattern string runs first. On a miss,
    /// and only when regex checking is enabled, every entry is matched and
    /// the one maximising `(piece_count, total_size)` wins; the comparison
    /// is strict, so among equally specific patterns the first registered
    /// is kept.
    pub fn resolve(&self, url: &str) -> Option<RouteMatch> {
        if let Some(entry) = self.entries.iter().find(|e| e.pattern.url() == url) {
            debug!(url = %url, route = %entry.pattern.url(), "route matched exactly");
            return Some(RouteMatch {
                resource: entry.resource.clone(),
                not_acceptable: entry.not_acceptable.clone(),
                captures: CaptureVec::new(),
            });
        }
        if !self.regex_checking {
            return None;
        }

        let mut best: Option<(&RouteEntry, CaptureVec)> = None;
        let mut best_pieces = 0usize;
        let mut best_size = 0usize;
        for entry in &self.entries {
            let pieces = entry.pattern.piece_count();
            let size = entry.pattern.total_size();
            let more_specific = best.is_none()
                || pieces > best_pieces
                || (pieces == best_pieces && size > best_size);
            if !more_specific {
                continue;
            }
            if let Some(captures) = entry.pattern.matches(url) {
                best_pieces = pieces;
                best_size = size;
                best = Some((entry, captures));
            }
        }

        match best {
            Some((entry, captures)) => {
                debug!(
                    url = %url,
                    route = %entry.pattern.url(),
                    captures = captures.len(),
                    "route matched by pattern"
                );
                Some(RouteMatch {
                    resource: entry.resource.clone(),
                    not_acceptable: entry.not_acceptable.clone(),
                    captures,
                })
            }
            None => {
                warn!(url = %url, routes = self.entries.len(), "no route matched");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
