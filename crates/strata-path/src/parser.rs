//! Path expression parser.
//!
//! Turns `layout/routes/*/name=home/blocks` into a list of segments once, so
//! evaluation never has to look ahead in the raw string.

use thiserror::Error;

/// Separator between segments.
pub const SEPARATOR: char = '/';

/// Wildcard segment, selecting one element of a sequence.
pub const WILDCARD: &str = "*";

/// Syntax errors in a path expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("empty segment at position {position} in {path:?}")]
    EmptySegment { path: String, position: usize },

    #[error("wildcard without a key=value predicate in {path:?}")]
    DanglingWildcard { path: String },

    #[error("malformed predicate {segment:?} in {path:?}, expected key=value")]
    MalformedPredicate { path: String, segment: String },
}

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Descend into a record key, or a sequence index.
    Literal(String),
    /// Pick the first sequence element whose `key` field equals `value`.
    Wildcard { key: String, value: String },
}

/// Parse a path expression into segments.
///
/// An empty expression yields no segments (the root).
pub fn parse_path(path: &str) -> Result<Vec<Segment>, QueryError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }

    let parts: Vec<&str> = path.split(SEPARATOR).collect();
    let mut segments = Vec::with_capacity(parts.len());
    let mut i = 0;

    while i < parts.len() {
        let part = parts[i];

        if part.is_empty() {
            return Err(QueryError::EmptySegment {
                path: path.to_string(),
                position: i,
            });
        }

        if part == WILDCARD {
            let predicate = parts
                .get(i + 1)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| QueryError::DanglingWildcard {
                    path: path.to_string(),
                })?;
            let (key, value) = parse_predicate(predicate).ok_or_else(|| {
                QueryError::MalformedPredicate {
                    path: path.to_string(),
                    segment: (*predicate).to_string(),
                }
            })?;
            segments.push(Segment::Wildcard { key, value });
            i += 2;
            continue;
        }

        segments.push(Segment::Literal(part.to_string()));
        i += 1;
    }

    Ok(segments)
}

/// Split `key=value`. Exactly one `=` and a non-empty key are required; the
/// value may be empty.
fn parse_predicate(segment: &str) -> Option<(String, String)> {
    let mut split = segment.split('=');
    let key = split.next()?;
    let value = split.next()?;
    if split.next().is_some() || key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
