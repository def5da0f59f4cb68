//! Content tree nodes and textual paths

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A node in a document's content tree.
///
/// Composite nodes (`Array`, `Object`) hold ordered children addressed by
/// index or by name; everything else is a scalar leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Node>),
    Object(IndexMap<String, Node>),
}

impl Node {
    /// Empty object node
    pub fn object() -> Self {
        Node::Object(IndexMap::new())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "boolean",
            Node::Integer(_) => "integer",
            Node::Float(_) => "float",
            Node::String(_) => "string",
            Node::Array(_) => "array",
            Node::Object(_) => "object",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Node::Array(_) | Node::Object(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Node>> {
        match self {
            Node::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Node>> {
        match self {
            Node::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Structural position of `segment` among this node's children.
    pub fn child_position(&self, segment: &str) -> Result<usize> {
        match self {
            Node::Array(arr) => {
                let index = parse_index(segment)?;
                if index >= arr.len() {
                    return Err(Error::IndexOutOfRange { index, len: arr.len() });
                }
                Ok(index)
            }
            Node::Object(obj) => obj
                .get_index_of(segment)
                .ok_or_else(|| Error::InvalidPath(format!("no key '{}'", segment))),
            other => Err(Error::InvalidPath(format!(
                "'{}' addresses a child of a {} leaf",
                segment,
                other.type_name()
            ))),
        }
    }

    /// Child named by `segment`
    pub fn child(&self, segment: &str) -> Result<&Node> {
        let position = self.child_position(segment)?;
        self.child_at(position)
            .ok_or_else(|| Error::InvalidPath(segment.to_string()))
    }

    /// Mutable child named by `segment`
    pub fn child_mut(&mut self, segment: &str) -> Result<&mut Node> {
        let position = self.child_position(segment)?;
        self.child_at_mut(position)
            .ok_or_else(|| Error::InvalidPath(segment.to_string()))
    }

    /// Child at a structural position
    pub fn child_at(&self, position: usize) -> Option<&Node> {
        match self {
            Node::Array(arr) => arr.get(position),
            Node::Object(obj) => obj.get_index(position).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn child_at_mut(&mut self, position: usize) -> Option<&mut Node> {
        match self {
            Node::Array(arr) => arr.get_mut(position),
            Node::Object(obj) => obj.get_index_mut(position).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Walk `segments` from this node.
    pub fn descend(&self, segments: &[String]) -> Result<&Node> {
        segments
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    pub fn descend_mut(&mut self, segments: &[String]) -> Result<&mut Node> {
        let mut current = self;
        for segment in segments {
            current = current.child_mut(segment)?;
        }
        Ok(current)
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::Null
    }
}

impl From<bool> for Node {
    fn from(v: bool) -> Self {
        Node::Bool(v)
    }
}

impl From<i64> for Node {
    fn from(v: i64) -> Self {
        Node::Integer(v)
    }
}

impl From<f64> for Node {
    fn from(v: f64) -> Self {
        Node::Float(v)
    }
}

impl From<String> for Node {
    fn from(v: String) -> Self {
        Node::String(v)
    }
}

impl From<&str> for Node {
    fn from(v: &str) -> Self {
        Node::String(v.to_string())
    }
}

impl<T: Into<Node>> From<Vec<T>> for Node {
    fn from(v: Vec<T>) -> Self {
        Node::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Parse an array index segment
pub fn parse_index(segment: &str) -> Result<usize> {
    segment
        .parse::<usize>()
        .map_err(|_| Error::InvalidPath(format!("'{}' is not an array index", segment)))
}

/// A target path such as `"a/b/3/c"`.
///
/// Segments are kept as text; a segment is an array index when the node it
/// is resolved against is an array. The empty path is the document root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<String>);

impl Path {
    /// Parse a slash separated path; empty segments are skipped.
    pub fn parse(path: &str) -> Self {
        Path(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Segments leading to the parent node
    pub fn parent(&self) -> &[String] {
        match self.0.split_last() {
            Some((_, parent)) => parent,
            None => &[],
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Numeric value of the segment at `depth`, if it is one
    pub fn index_at(&self, depth: usize) -> Option<usize> {
        self.0.get(depth).and_then(|s| s.parse().ok())
    }

    /// Copy of this path with the segment at `depth` replaced by `index`
    pub fn with_index_at(&self, depth: usize, index: usize) -> Path {
        let mut segments = self.0.clone();
        if let Some(segment) = segments.get_mut(depth) {
            *segment = index.to_string();
        }
        Path(segments)
    }

    /// True if `other` lies strictly below this path
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl std::str::FromStr for Path {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Path::parse(s))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::parse(s)
    }
}

impl From<Vec<String>> for Path {
    fn from(segments: Vec<String>) -> Self {
        Path(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parsing() {
        let path = Path::parse("a/b/3/c");
        assert_eq!(path.segments(), &["a", "b", "3", "c"]);
        assert_eq!(path.index_at(2), Some(3));
        assert_eq!(path.index_at(1), None);
        assert_eq!(path.to_string(), "a/b/3/c");

        assert!(Path::parse("").is_root());
        assert_eq!(Path::parse("/a//b/"), Path::parse("a/b"));
    }

    #[test]
    fn test_path_ancestry() {
        let items = Path::parse("items");
        assert!(items.is_ancestor_of(&Path::parse("items/0")));
        assert!(!items.is_ancestor_of(&Path::parse("items")));
        assert!(!items.is_ancestor_of(&Path::parse("itemsx/0")));
        assert_eq!(Path::parse("items/4/name").with_index_at(1, 5).to_string(), "items/5/name");
    }

    #[test]
    fn test_node_from_json() {
        let node: Node = serde_json::from_str(r#"{"count": 0, "tags": ["x", 1.5, true, null]}"#).unwrap();
        let tags = node.child("tags").unwrap();
        assert_eq!(node.child("count").unwrap(), &Node::Integer(0));
        assert_eq!(tags.child("1").unwrap(), &Node::Float(1.5));
        assert_eq!(tags.child("3").unwrap(), &Node::Null);
    }

    #[test]
    fn test_object_keeps_insertion_order() {
        let node: Node = serde_json::from_str(r#"{"z": 1, "a": 2}"#).unwrap();
        assert_eq!(node.child_position("z").unwrap(), 0);
        assert_eq!(node.child_position("a").unwrap(), 1);
        assert_eq!(serde_json::to_string(&node).unwrap(), r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn test_child_errors() {
        let node: Node = serde_json::from_str(r#"{"list": [1], "n": 3}"#).unwrap();
        assert!(matches!(
            node.descend(&["list".into(), "4".into()]),
            Err(Error::IndexOutOfRange { index: 4, len: 1 })
        ));
        assert!(matches!(node.descend(&["n".into(), "x".into()]), Err(Error::InvalidPath(_))));
        assert!(matches!(node.child("missing"), Err(Error::InvalidPath(_))));
    }
}
