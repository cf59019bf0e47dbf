use std::fmt;
use std::sync::Arc;

use regex::Regex;
use smallvec::SmallVec;

/// Maximum number of captured parameters before the capture vector spills
/// to the heap. Deep REST paths rarely carry more than a handful.
pub const MAX_INLINE_CAPTURES: usize = 8;

/// Stack-allocated captured-parameter storage. Names come from the compiled
/// pattern and are shared `Arc<str>`s; values are per-request.
pub type CaptureVec = SmallVec<[(Arc<str>, String); MAX_INLINE_CAPTURES]>;

#[derive(Debug)]
pub enum PatternError {
    Regex(regex::Error),
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::Regex(e) => write!(f, "invalid pattern segment: {e}"),
        }
    }
}

impl std::error::Error for PatternError {}

impl From<regex::Error> for PatternError {
    fn from(e: regex::Error) -> Self {
        PatternError::Regex(e)
    }
}

#[derive(Debug)]
enum Segment {
    Literal(String),
    Param(Arc<str>),
    Pattern(Regex),
}

/// A compiled URL template.
///
/// Immutable after construction. Equality and hashing use the normalised
/// template string only; matching is a separate operation.
#[derive(Debug)]
pub struct EndpointPattern {
    url: String,
    segments: Vec<Segment>,
    family: bool,
    params: Vec<(Arc<str>, usize)>,
}

impl EndpointPattern {
    /// Compile a template such as `/users/{id}/posts/{pid}`.
    ///
    /// Segments wrapped in `{}` become named parameters. When
    /// `regex_checking` is set, any other segment containing regex
    /// metacharacters is compiled as an anchored regex fragment. Empty
    /// segments (leading, trailing or duplicate slashes) are discarded.
    pub fn parse(template: &str, family: bool, regex_checking: bool) -> Result<Self, PatternError> {
        let url = Self::normalize(template);
        let mut segments = Vec::new();
        let mut params = Vec::new();
        for piece in url.split('/').filter(|p| !p.is_empty()) {
            if piece.len() >= 2 && piece.starts_with('{') && piece.ends_with('}') {
                let name: Arc<str> = Arc::from(&piece[1..piece.len() - 1]);
                params.push((name.clone(), segments.len()));
                segments.push(Segment::Param(name));
            } else if regex_checking && piece.chars().any(is_regex_meta) {
                let re = Regex::new(&format!("^(?:{piece})$"))?;
                segments.push(Segment::Pattern(re));
            } else {
                segments.push(Segment::Literal(piece.to_string()));
            }
        }
        Ok(Self {
            url,
            segments,
            family,
            params,
        })
    }

    /// Normalised form of a template or URL: leading slash, duplicate
    /// slashes collapsed, trailing slash dropped.
    pub fn normalize(template: &str) -> String {
        crate::escape::standardize_path(template)
    }

    /// The normalised template string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of path segments; first component of the specificity tuple.
    pub fn piece_count(&self) -> usize {
        self.segments.len()
    }

    /// Character length of the normalised template; second component of the
    /// specificity tuple.
    pub fn total_size(&self) -> usize {
        self.url.len()
    }

    pub fn is_family(&self) -> bool {
        self.family
    }

    /// Match a normalised URL against this pattern, returning captured
    /// parameter values on success.
    ///
    /// Family patterns accept any URL with at least as many segments; exact
    /// patterns require equal counts. Literal segments compare by equality,
    /// parameter segments accept any non-empty segment, regex segments must
    /// fully match.
    pub fn matches(&self, url: &str) -> Option<CaptureVec> {
        let pieces: Vec<&str> = url.split('/').filter(|p| !p.is_empty()).collect();
        if self.family {
            if pieces.len() < self.segments.len() {
                return None;
            }
        } else if pieces.len() != self.segments.len() {
            return None;
        }
        for (segment, piece) in self.segments.iter().zip(pieces.iter()) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != piece {
                        return None;
                    }
                }
                Segment::Param(_) => {}
                Segment::Pattern(re) => {
                    if !re.is_match(piece) {
                        return None;
                    }
                }
            }
        }
        let mut captures = CaptureVec::new();
        for (name, pos) in &self.params {
            captures.push((name.clone(), pieces[*pos].to_string()));
        }
        Some(captures)
    }
}

impl PartialEq for EndpointPattern {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for EndpointPattern {}

impl std::hash::Hash for EndpointPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

fn is_regex_meta(c: char) -> bool {
    matches!(
        c,
        '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '|' | '\\' | '{' | '}'
    )
}
