//! Child keys and paths.
//!
//! A [`Path`] is an immutable sequence of validated [`ChildKey`]s. Keys are
//! validated when they are constructed, so a malformed key is rejected with
//! [`CoreError::InvalidPathSegment`] before it can reach any tree.

use crate::error::{CoreError, CoreResult};
use crate::validation::ValidationLimits;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Characters that may never appear in a key.
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '#', '$', '[', ']', '/'];

/// A single validated path segment.
///
/// Keys order with integer collation: keys that read as 32-bit integers sort
/// first, numerically; every other key sorts after them, lexicographically.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ChildKey(Arc<str>);

impl ChildKey {
    /// Creates a key, validating it against the default limits.
    pub fn new(key: impl AsRef<str>) -> CoreResult<Self> {
        let key = key.as_ref();
        validate_key(key, ValidationLimits::default().max_key_bytes)?;
        Ok(Self(Arc::from(key)))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the integer value of this key if it uses integer collation.
    pub fn as_index(&self) -> Option<i32> {
        parse_index(&self.0)
    }
}

impl Ord for ChildKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_index(), other.as_index()) {
            (Some(a), Some(b)) => a
                .cmp(&b)
                .then_with(|| self.0.len().cmp(&other.0.len()))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ChildKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ChildKey {
    type Error = CoreError;

    fn try_from(value: &str) -> CoreResult<Self> {
        Self::new(value)
    }
}

/// Validates a single key.
pub(crate) fn validate_key(key: &str, max_bytes: usize) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_segment(key, "key must not be empty"));
    }
    if key.len() > max_bytes {
        return Err(CoreError::invalid_segment(
            key,
            format!("key exceeds {max_bytes} bytes"),
        ));
    }
    if let Some(c) = key
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_ascii_control())
    {
        return Err(CoreError::invalid_segment(
            key,
            format!("key contains forbidden character {c:?}"),
        ));
    }
    Ok(())
}

fn parse_index(key: &str) -> Option<i32> {
    let digits = key.strip_prefix('-').unwrap_or(key);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.trim_start_matches('0').len() > 10 {
        return None;
    }
    key.parse::<i64>()
        .ok()
        .and_then(|n| i32::try_from(n).ok())
}

/// A location in the tree.
///
/// The empty path denotes the root.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<ChildKey>,
}

impl Path {
    /// Returns the root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a slash-separated path such as `"/users/alice"`.
    ///
    /// Empty segments are ignored, so `""`, `"/"` and `"//"` all denote the root.
    pub fn parse(path: &str) -> CoreResult<Self> {
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(ChildKey::new)
            .collect::<CoreResult<Vec<_>>>()?;
        let path = Self { segments };
        path.validate(&ValidationLimits::default())?;
        Ok(path)
    }

    /// Builds a path from already validated keys.
    pub fn from_keys(keys: impl IntoIterator<Item = ChildKey>) -> Self {
        Self {
            segments: keys.into_iter().collect(),
        }
    }

    /// Checks depth and byte length against `limits`.
    pub fn validate(&self, limits: &ValidationLimits) -> CoreResult<()> {
        if self.segments.len() > limits.max_path_depth {
            return Err(CoreError::invalid_path(
                self.to_string(),
                format!("path is deeper than {} segments", limits.max_path_depth),
            ));
        }
        let bytes: usize = self.segments.iter().map(|s| s.as_str().len() + 1).sum();
        if bytes > limits.max_path_bytes {
            return Err(CoreError::invalid_path(
                self.to_string(),
                format!("path is longer than {} bytes", limits.max_path_bytes),
            ));
        }
        Ok(())
    }

    /// Returns the segments of this path.
    pub fn segments(&self) -> &[ChildKey] {
        &self.segments
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the first segment.
    pub fn front(&self) -> Option<&ChildKey> {
        self.segments.first()
    }

    /// Returns the last segment.
    pub fn back(&self) -> Option<&ChildKey> {
        self.segments.last()
    }

    /// Returns the path without its first segment.
    pub fn pop_front(&self) -> Path {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// Returns the parent path, or `None` at the root.
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns this path extended by one key.
    pub fn child(&self, key: &ChildKey) -> Path {
        let mut segments = self.segments.clone();
        segments.push(key.clone());
        Self { segments }
    }

    /// Returns this path extended by a relative path.
    pub fn join(&self, relative: &Path) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        Self { segments }
    }

    /// Returns true if `self` is an ancestor of, or equal to, `other`.
    pub fn contains(&self, other: &Path) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Returns true if either path contains the other.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Returns the path from `ancestor` to `self`, if `ancestor` contains `self`.
    pub fn relative_to(&self, ancestor: &Path) -> Option<Path> {
        if !ancestor.contains(self) {
            return None;
        }
        Some(Self {
            segments: self.segments[ancestor.len()..].to_vec(),
        })
    }
}

impl fmt::Display for Path {
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

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl std::str::FromStr for Path {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Self::parse(s)
    }
}

impl From<ChildKey> for Path {
    fn from(key: ChildKey) -> Self {
        Self {
            segments: vec![key],
        }
    }
}
