//! Route patterns: ordered path segments, each literal or a named parameter.
//!
//! | Pattern            | Matches          | Binds             |
//! |--------------------|------------------|-------------------|
//! | `/`                | `/`              | *(nothing)*       |
//! | `/users`           | `/users`         | *(nothing)*       |
//! | `/users/:userId`   | `/users/123`     | `userId → "123"`  |
//!
//! A pattern matches a request path when both have the same number of segments
//! and every literal segment is equal (case-sensitive). Parameter positions
//! accept any value.

use std::cmp::Ordering;
use std::fmt;

use crate::context::Parameters;

/// Marks a directory name or pattern segment as a named parameter.
pub const PARAM_MARKER: char = ':';

/// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    /// Classifies a raw segment: a leading `:` makes it a parameter named by the rest.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(PARAM_MARKER) {
            Some(name) => Segment::Param(name.to_owned()),
            None => Segment::Literal(raw.to_owned()),
        }
    }

    pub fn is_param(&self) -> bool {
        matches!(self, Segment::Param(_))
    }

    fn accepts(&self, value: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == value,
            Segment::Param(_) => true,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(literal) => f.write_str(literal),
            Segment::Param(name) => write!(f, "{PARAM_MARKER}{name}"),
        }
    }
}

/// Compiled representation of a route's URL shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RoutePattern {
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Parses a pattern string such as `/users/:userId`. Empty segments are
    /// dropped, so `/` and `""` both yield the zero-segment root pattern.
    ///
    /// # Examples
    ///
    /// ```
    /// use treeroute::router::{RoutePattern, Segment};
    ///
    /// let pattern = RoutePattern::parse("/users/:userId");
    /// assert_eq!(
    ///     pattern.segments(),
    ///     &[Segment::Literal("users".into()), Segment::Param("userId".into())]
    /// );
    /// assert_eq!(pattern.to_string(), "/users/:userId");
    /// ```
    pub fn parse(pattern: &str) -> Self {
        pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(Segment::parse)
            .collect()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns `true` when `path` has this pattern's shape and literals.
    pub fn matches(&self, path: &[&str]) -> bool {
        self.segments.len() == path.len()
            && self
                .segments
                .iter()
                .zip(path)
                .all(|(segment, value)| segment.accepts(value))
    }

    /// Binds parameter names to the values at their positions in `path`.
    ///
    /// Only meaningful after [`matches`](Self::matches) returned `true`.
    pub fn bind(&self, path: &[&str]) -> Parameters {
        self.segments
            .iter()
            .zip(path)
            .filter_map(|(segment, value)| match segment {
                Segment::Param(name) => Some((name.as_str(), *value)),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Returns `true` when both patterns match exactly the same request paths,
    /// i.e. they differ at most in parameter names.
    pub fn same_shape(&self, other: &RoutePattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| match (a, b) {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    _ => false,
                })
    }

    /// Lookup precedence: at the first differing position a literal beats a
    /// parameter, literals compare lexicographically, and shorter patterns come
    /// first. Parameter names only break otherwise-exact ties.
    pub(crate) fn precedence(&self, other: &RoutePattern) -> Ordering {
        for (a, b) in self.segments.iter().zip(&other.segments) {
            let ordering = match (a, b) {
                (Segment::Literal(a), Segment::Literal(b)) => a.cmp(b),
                (Segment::Literal(_), Segment::Param(_)) => Ordering::Less,
                (Segment::Param(_), Segment::Literal(_)) => Ordering::Greater,
                (Segment::Param(_), Segment::Param(_)) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.segments
            .len()
            .cmp(&other.segments.len())
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

impl FromIterator<Segment> for RoutePattern {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}
