//! Dotted paths into the observed tree.
//!
//! A path is a sequence of segments, each either a map key or a sequence
//! index. Externally paths are dot-joined strings (`"users.0.name"`); a
//! segment made only of ASCII digits parses as an index.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A single segment in a path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seg {
    /// Map key access.
    Key(String),
    /// Sequence index access.
    Index(usize),
}

impl Seg {
    /// Parse one dotted segment. All-digit segments become [`Seg::Index`].
    pub fn parse(s: &str) -> Self {
        if is_index(s) {
            if let Ok(i) = s.parse::<usize>() {
                return Seg::Index(i);
            }
        }
        Seg::Key(s.to_string())
    }

    /// The segment as a map key.
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            Seg::Key(k) => Cow::Borrowed(k),
            Seg::Index(i) => Cow::Owned(i.to_string()),
        }
    }

    /// The segment as a sequence index, if it is one or a key that parses as one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Seg::Index(i) => Some(*i),
            Seg::Key(k) if is_index(k) => k.parse().ok(),
            Seg::Key(_) => None,
        }
    }
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seg::Key(k) => f.write_str(k),
            Seg::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Seg {
    fn from(s: &str) -> Self {
        Seg::Key(s.to_owned())
    }
}

impl From<String> for Seg {
    fn from(s: String) -> Self {
        Seg::Key(s)
    }
}

impl From<usize> for Seg {
    fn from(i: usize) -> Self {
        Seg::Index(i)
    }
}

/// A complete path from a store's root.
///
/// # Examples
///
/// ```
/// use pathwatch::{Path, Seg};
///
/// let path = Path::parse("users.0.name");
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.segments()[1], Seg::Index(0));
/// assert_eq!(path.to_string(), "users.0.name");
/// assert_eq!(path.to_accessor(), "users[0].name");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Seg>);

impl Path {
    /// The empty path, naming the root.
    pub fn root() -> Self {
        Path(Vec::new())
    }

    /// Parse a dotted path. The empty string is the root path.
    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            return Path::root();
        }
        Path(s.split('.').map(Seg::parse).collect())
    }

    pub fn segments(&self) -> &[Seg] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A new path with `seg` appended.
    pub fn child(&self, seg: impl Into<Seg>) -> Path {
        let mut segs = self.0.clone();
        segs.push(seg.into());
        Path(segs)
    }

    /// Render with bracketed indices (`items[0].name`) for evaluation layers.
    pub fn to_accessor(&self) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            match seg {
                Seg::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
                Seg::Key(k) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(k);
                }
            }
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&self.0))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::parse(s)
    }
}

impl From<Vec<Seg>> for Path {
    fn from(segs: Vec<Seg>) -> Self {
        Path(segs)
    }
}

/// Split a dotted path string into segments.
pub fn parse(path: &str) -> Vec<Seg> {
    Path::parse(path).0
}

/// Join segments with dots.
pub fn join(segs: &[Seg]) -> String {
    let mut out = String::new();
    for (i, seg) in segs.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&seg.as_key());
    }
    out
}

/// Canonical form of a segment string: indices lose leading zeros so that
/// numeric segments compare by value.
pub fn canonical_segment(s: &str) -> Cow<'_, str> {
    if is_index(s) && s.len() > 1 && s.starts_with('0') {
        if let Ok(i) = s.parse::<usize>() {
            return Cow::Owned(i.to_string());
        }
    }
    Cow::Borrowed(s)
}

/// Whether a segment string is a sequence index (non-empty, all ASCII digits).
pub fn is_index(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace standalone occurrences of `var` in `expr` with `real_path`.
///
/// An occurrence is standalone when it is not glued to other identifier
/// characters and is not a property access (`obj.var`).
///
/// # Examples
///
/// ```
/// use pathwatch::path::substitute_variable;
///
/// assert_eq!(substitute_variable("item.price * 2", "item", "cart.items.3"), "cart.items.3.price * 2");
/// assert_eq!(substitute_variable("order.item", "item", "cart.items.3"), "order.item");
/// assert_eq!(substitute_variable("items.length", "item", "x"), "items.length");
/// ```
pub fn substitute_variable(expr: &str, var: &str, real_path: &str) -> String {
    if var.is_empty() {
        return expr.to_string();
    }
    let mut out = String::with_capacity(expr.len());
    let mut prev: Option<char> = None;
    let mut rest = expr;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with(var) {
            let standalone_before = prev.is_none_or(|p| !is_var_char(p) && p != '.');
            let standalone_after = rest[var.len()..].chars().next().is_none_or(|n| !is_var_char(n));
            if standalone_before && standalone_after {
                out.push_str(real_path);
                prev = var.chars().last();
                rest = &rest[var.len()..];
                continue;
            }
        }
        out.push(c);
        prev = Some(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Turn an arbitrary path or expression into a valid identifier.
///
/// ```
/// use pathwatch::path::to_variable_name;
///
/// assert_eq!(to_variable_name("user.address-line"), "user_address_line");
/// assert_eq!(to_variable_name("0.name"), "_0_name");
/// ```
pub fn to_variable_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_gap = false;
    for c in input.chars() {
        if is_var_char(c) {
            out.push(c);
            in_gap = false;
        } else if !in_gap {
            out.push('_');
            in_gap = true;
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
