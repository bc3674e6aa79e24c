//! Discriminating keys and cache key construction.
//!
//! A cache key is built from the namespace prefix, the handle, the time bucket
//! and the caller's discriminating key. Scalars are type-tagged and sequences
//! are bracketed, so a sequence never encodes to the same text as any of its
//! elements, and `5` never collides with `"5"`.

use std::fmt;

/// Separates the top-level tokens of a cache key.
const TOKEN_DELIMITER: char = '|';
/// Separates the elements of a sequence.
const ELEMENT_DELIMITER: char = ',';
const ESCAPE: char = '\\';

/// Caller-supplied value that partitions one handle into independent counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum DiscriminatingKey {
    /// No key: one counter per handle and window
    #[default]
    Absent,
    /// A string scalar
    Str(String),
    /// An integer scalar
    Int(i64),
    /// A boolean scalar
    Bool(bool),
    /// An ordered sequence of keys
    Seq(Vec<DiscriminatingKey>),
}

impl DiscriminatingKey {
    /// Whether this is the absent key.
    pub fn is_absent(&self) -> bool {
        matches!(self, DiscriminatingKey::Absent)
    }

    /// Serialize the key into its cache key token.
    ///
    /// The absent key yields an empty token at the top level. Inside a
    /// sequence it yields `nil` so that `[]` and `[nil]` stay distinct.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out, true);
        out
    }

    fn encode_into(&self, out: &mut String, top_level: bool) {
        match self {
            DiscriminatingKey::Absent => {
                if !top_level {
                    out.push_str("nil");
                }
            }
            DiscriminatingKey::Str(s) => {
                out.push_str("str:");
                push_escaped(out, s);
            }
            DiscriminatingKey::Int(n) => {
                out.push_str("int:");
                out.push_str(&n.to_string());
            }
            DiscriminatingKey::Bool(b) => {
                out.push_str("bool:");
                out.push_str(if *b { "true" } else { "false" });
            }
            DiscriminatingKey::Seq(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(ELEMENT_DELIMITER);
                    }
                    item.encode_into(out, false);
                }
                out.push(']');
            }
        }
    }
}

/// Human-readable rendering used in rejection messages.
///
/// A top-level string prints bare. Strings inside a sequence are quoted so
/// `[5, "6"]` and `["5", 6]` read differently.
impl fmt::Display for DiscriminatingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_display(f, false)
    }
}

impl DiscriminatingKey {
    fn fmt_display(&self, f: &mut fmt::Formatter<'_>, nested: bool) -> fmt::Result {
        match self {
            DiscriminatingKey::Absent if nested => f.write_str("nil"),
            DiscriminatingKey::Absent => Ok(()),
            DiscriminatingKey::Str(s) if nested => write!(f, "{:?}", s),
            DiscriminatingKey::Str(s) => f.write_str(s),
            DiscriminatingKey::Int(n) => write!(f, "{}", n),
            DiscriminatingKey::Bool(b) => write!(f, "{}", b),
            DiscriminatingKey::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_display(f, true)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<()> for DiscriminatingKey {
    fn from(_: ()) -> Self {
        DiscriminatingKey::Absent
    }
}

impl From<&str> for DiscriminatingKey {
    fn from(value: &str) -> Self {
        DiscriminatingKey::Str(value.to_string())
    }
}

impl From<String> for DiscriminatingKey {
    fn from(value: String) -> Self {
        DiscriminatingKey::Str(value)
    }
}

impl From<&String> for DiscriminatingKey {
    fn from(value: &String) -> Self {
        DiscriminatingKey::Str(value.clone())
    }
}

impl From<i64> for DiscriminatingKey {
    fn from(value: i64) -> Self {
        DiscriminatingKey::Int(value)
    }
}

impl From<i32> for DiscriminatingKey {
    fn from(value: i32) -> Self {
        DiscriminatingKey::Int(i64::from(value))
    }
}

impl From<u32> for DiscriminatingKey {
    fn from(value: u32) -> Self {
        DiscriminatingKey::Int(i64::from(value))
    }
}

impl From<bool> for DiscriminatingKey {
    fn from(value: bool) -> Self {
        DiscriminatingKey::Bool(value)
    }
}

impl<T: Into<DiscriminatingKey>> From<Option<T>> for DiscriminatingKey {
    fn from(value: Option<T>) -> Self {
        value.map_or(DiscriminatingKey::Absent, Into::into)
    }
}

impl<T: Into<DiscriminatingKey>> From<Vec<T>> for DiscriminatingKey {
    fn from(items: Vec<T>) -> Self {
        DiscriminatingKey::Seq(items.into_iter().map(Into::into).collect())
    }
}

/// Address of one counter in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the cache key for a handle, discriminating key and bucket.
    ///
    /// Format: `{prefix}|{handle}|{bucket}|{key}` with the prefix and handle
    /// escaped so they cannot introduce extra delimiters.
    pub fn build(prefix: &str, handle: &str, key: &DiscriminatingKey, bucket: u64) -> Self {
        let mut out = String::with_capacity(prefix.len() + handle.len() + 32);
        push_escaped(&mut out, prefix);
        out.push(TOKEN_DELIMITER);
        push_escaped(&mut out, handle);
        out.push(TOKEN_DELIMITER);
        out.push_str(&bucket.to_string());
        out.push(TOKEN_DELIMITER);
        key.encode_into(&mut out, true);
        CacheKey(out)
    }

    /// The key as handed to the store.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        if matches!(c, '\\' | '|' | ',' | '[' | ']') {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}
