//! Hierarchical names and the operation ⇄ name mapping.
//!
//! Request names look like `<prefix>/<op>/<path...>[/seg=N]`; the producer
//! answers under the same name with a `v=N` component appended. The decoder
//! below accepts both forms.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

const SEGMENT_MARKER: &str = "seg=";
const VERSION_MARKER: &str = "v=";

/// One name component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    Generic(String),
    Segment(u64),
    Version(u64),
}

impl Component {
    pub fn as_segment(&self) -> Option<u64> {
        match self {
            Component::Segment(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_version(&self) -> bool {
        matches!(self, Component::Version(_))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Generic(s) => f.write_str(s),
            Component::Segment(n) => write!(f, "{SEGMENT_MARKER}{n}"),
            Component::Version(n) => write!(f, "{VERSION_MARKER}{n}"),
        }
    }
}

impl From<&str> for Component {
    /// `seg=N` and `v=N` become typed components, anything else is generic.
    fn from(s: &str) -> Self {
        if let Some(n) = s.strip_prefix(SEGMENT_MARKER).and_then(|d| d.parse().ok()) {
            return Component::Segment(n);
        }
        if let Some(n) = s.strip_prefix(VERSION_MARKER).and_then(|d| d.parse().ok()) {
            return Component::Version(n);
        }
        Component::Generic(s.to_string())
    }
}

/// Ordered sequence of components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_components(components: Vec<Component>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn last(&self) -> Option<&Component> {
        self.components.last()
    }

    pub fn append(mut self, c: Component) -> Self {
        self.components.push(c);
        self
    }

    pub fn append_segment(self, n: u64) -> Self {
        self.append(Component::Segment(n))
    }

    pub fn append_version(self, v: u64) -> Self {
        self.append(Component::Version(v))
    }

    /// Append every non-empty `/`-separated piece of `path` as a generic component.
    pub fn append_path(mut self, path: &str) -> Self {
        for piece in path.split('/').filter(|p| !p.is_empty()) {
            self.components.push(Component::Generic(piece.to_string()));
        }
        self
    }

    pub fn starts_with(&self, prefix: &Name) -> bool {
        self.components.starts_with(&prefix.components)
    }

    /// First `n` components (clamped).
    pub fn prefix(&self, n: usize) -> Name {
        let n = n.min(self.components.len());
        Name::from_components(self.components[..n].to_vec())
    }

    /// Name without its trailing version component, if it has one.
    pub fn without_version(&self) -> Name {
        match self.last() {
            Some(c) if c.is_version() => self.prefix(self.len() - 1),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if !s.starts_with('/') {
            bail!("name must start with '/': {s:?}");
        }
        let components = s
            .split('/')
            .filter(|p| !p.is_empty())
            .map(Component::from)
            .collect();
        Ok(Name { components })
    }
}

/// The four remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Open,
    Close,
    Stat,
    Read,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Open,
        Operation::Close,
        Operation::Stat,
        Operation::Read,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Close => "close",
            Operation::Stat => "stat",
            Operation::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Operation::ALL.into_iter().find(|op| op.as_str() == s)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<prefix>/<op>`: the prefix a producer answers for one operation.
pub fn filter_prefix(prefix: &Name, op: Operation) -> Name {
    prefix
        .clone()
        .append(Component::Generic(op.as_str().to_string()))
}

/// Build the request name for `op` on `path`. Only reads carry a segment.
pub fn encode(prefix: &Name, op: Operation, path: &str, segment: u64) -> Name {
    let name = filter_prefix(prefix, op).append_path(path);
    match op {
        Operation::Read => name.append_segment(segment),
        _ => name,
    }
}

/// Path and optional segment recovered from a request or response name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub path: String,
    pub segment: Option<u64>,
}

impl Decoded {
    pub fn segment_no(&self) -> u64 {
        self.segment.unwrap_or(0)
    }
}

/// Trailing segment number: the last component, or the one before a version.
pub fn segment_of(name: &Name) -> Option<u64> {
    let comps = name.components();
    match comps.last()? {
        Component::Segment(n) => Some(*n),
        Component::Version(_) if comps.len() >= 2 => comps[comps.len() - 2].as_segment(),
        _ => None,
    }
}

/// Strip `prefix_len` components (prefix plus operation) and split the rest
/// into path and segment. Never fails: names without a recognised suffix are
/// read whole as the path.
pub fn decode(name: &Name, prefix_len: usize) -> Decoded {
    let comps = name.components();
    let rest = if prefix_len <= comps.len() {
        &comps[prefix_len..]
    } else {
        &[][..]
    };

    let (body, segment) = match rest {
        [body @ .., Component::Segment(n)] => (body, Some(*n)),
        [body @ .., Component::Segment(n), Component::Version(_)] => (body, Some(*n)),
        [body @ .., Component::Version(_)] => (body, None),
        _ => (rest, None),
    };

    Decoded {
        path: path_string(body),
        segment,
    }
}

/// Operation named right after `prefix`, if `name` lives under it.
pub fn operation_of(name: &Name, prefix: &Name) -> Option<Operation> {
    if !name.starts_with(prefix) {
        return None;
    }
    match name.components().get(prefix.len())? {
        Component::Generic(s) => Operation::parse(s),
        _ => None,
    }
}

fn path_string(comps: &[Component]) -> String {
    let mut out = String::new();
    for c in comps {
        out.push('/');
        out.push_str(&c.to_string());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
