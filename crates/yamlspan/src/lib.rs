//! Source span lookups for YAML documents.
//!
//! `yamlspan` answers one question: "where in the original text does the
//! value at `jobs.build.steps[2].run` live?". Deserialization is left to
//! serde; this crate keeps a tree-sitter parse of the same text around so
//! that findings can point at precise byte and line/column spans.
//!
//! Aliases are not followed: routes that pass through `*alias` nodes fail
//! with [`QueryError::Alias`].

#![deny(missing_docs)]
#![forbid(unsafe_code)]

use std::borrow::Cow;

use line_index::{LineIndex, TextSize};
use serde::Serialize;
use thiserror::Error;
use tree_sitter::{Language, Node, Parser, Tree};

/// Node kind predicates for the subset of tree-sitter-yaml we walk.
trait YamlNode {
    fn is_kind(&self, kind: &str) -> bool;

    fn is_pair(&self) -> bool {
        self.is_kind("block_mapping_pair") || self.is_kind("flow_pair")
    }

    fn is_mapping(&self) -> bool {
        self.is_kind("block_mapping") || self.is_kind("flow_mapping")
    }

    fn is_sequence(&self) -> bool {
        self.is_kind("block_sequence") || self.is_kind("flow_sequence")
    }

    fn is_value_node(&self) -> bool {
        self.is_kind("block_node") || self.is_kind("flow_node")
    }

    fn is_quoted(&self) -> bool {
        self.is_kind("single_quote_scalar") || self.is_kind("double_quote_scalar")
    }

    fn is_decoration(&self) -> bool {
        self.is_kind("anchor") || self.is_kind("tag") || self.is_kind("comment")
    }
}

impl YamlNode for Node<'_> {
    fn is_kind(&self, kind: &str) -> bool {
        self.kind() == kind
    }
}

/// Errors produced while resolving a [`Route`].
#[derive(Debug, Error)]
pub enum QueryError {
    /// tree-sitter rejected the YAML grammar.
    #[error("unusable tree-sitter grammar")]
    Language(#[from] tree_sitter::LanguageError),
    /// The input isn't valid YAML.
    #[error("input is not valid YAML")]
    InvalidInput,
    /// The document has no top-level value.
    #[error("document is empty")]
    Empty,
    /// A key component was applied to something that isn't a mapping.
    #[error("expected a mapping containing `{0}`")]
    NotAMapping(String),
    /// An index component was applied to something that isn't a sequence.
    #[error("expected a sequence for index [{0}]")]
    NotASequence(usize),
    /// The mapping doesn't contain the key.
    #[error("no such key `{0}`")]
    MissingKey(String),
    /// The sequence is too short.
    #[error("index [{0}] is out of range for a sequence of {1}")]
    OutOfRange(usize, usize),
    /// The route runs through an alias.
    #[error("route passes through an alias")]
    Alias,
    /// The route must end in a key for this query mode.
    #[error("route must end with a key")]
    NotAKey,
}

/// A single step in a [`Route`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Component<'a> {
    /// A mapping key.
    Key(Cow<'a, str>),
    /// A sequence index.
    Index(usize),
}

impl From<usize> for Component<'_> {
    fn from(idx: usize) -> Self {
        Self::Index(idx)
    }
}

impl<'a> From<&'a str> for Component<'a> {
    fn from(key: &'a str) -> Self {
        Self::Key(Cow::Borrowed(key))
    }
}

impl From<String> for Component<'_> {
    fn from(key: String) -> Self {
        Self::Key(Cow::Owned(key))
    }
}

/// A path of keys and indices from the top of a document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Route<'a>(Vec<Component<'a>>);

impl<'a> Route<'a> {
    /// Returns a new route with every component in `components` appended.
    pub fn with_keys(&self, components: impl IntoIterator<Item = Component<'a>>) -> Self {
        let mut route = self.0.clone();
        route.extend(components);
        Self(route)
    }

    /// The route's components, top-down.
    pub fn components(&self) -> &[Component<'a>] {
        &self.0
    }

    /// Converts this route into one that owns all of its keys.
    pub fn into_owned(self) -> Route<'static> {
        Route(
            self.0
                .into_iter()
                .map(|c| match c {
                    Component::Key(k) => Component::Key(Cow::Owned(k.into_owned())),
                    Component::Index(i) => Component::Index(i),
                })
                .collect(),
        )
    }
}

impl<'a> From<Vec<Component<'a>>> for Route<'a> {
    fn from(components: Vec<Component<'a>>) -> Self {
        Self(components)
    }
}

/// Builds a [`Route`] from a list of keys and indices.
///
/// ```
/// let route = yamlspan::route!("jobs", "build", "steps", 0);
/// assert_eq!(route.components().len(), 4);
/// ```
#[macro_export]
macro_rules! route {
    ($($component:expr),* $(,)?) => {
        $crate::Route::from(vec![$($crate::Component::from($component)),*])
    };
}

/// How much of a matched node a query should cover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Only the value, e.g. `bar` in `foo: bar`.
    Exact,
    /// The whole pair when the route ends in a key, e.g. `foo: bar`.
    Pretty,
    /// Only the key, e.g. `foo` in `foo: bar`.
    KeyOnly,
}

/// A concrete span inside a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Location {
    /// Start and end byte offsets.
    pub byte_span: (usize, usize),
    /// Zero-based `(row, column)` start and end points.
    pub point_span: ((usize, usize), (usize, usize)),
}

impl From<Node<'_>> for Location {
    fn from(node: Node<'_>) -> Self {
        let (start, end) = (node.start_position(), node.end_position());

        Self {
            byte_span: (node.start_byte(), node.end_byte()),
            point_span: ((start.row, start.column), (end.row, end.column)),
        }
    }
}

/// A parsed YAML document that can be queried by [`Route`].
pub struct Document {
    source: String,
    tree: Tree,
    line_index: LineIndex,
}

impl Document {
    /// Parses `source`.
    pub fn new(source: impl Into<String>) -> Result<Self, QueryError> {
        let source = source.into();

        let mut parser = Parser::new();
        let language: Language = tree_sitter_yaml::LANGUAGE.into();
        parser.set_language(&language)?;

        let tree = parser
            .parse(&source, None)
            .ok_or(QueryError::InvalidInput)?;
        if tree.root_node().has_error() {
            return Err(QueryError::InvalidInput);
        }

        let line_index = LineIndex::new(&source);

        Ok(Self {
            source,
            tree,
            line_index,
        })
    }

    /// The original text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The line index for the original text.
    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    /// Returns the source text covered by `location`.
    pub fn extract(&self, location: &Location) -> &str {
        self.source
            .get(location.byte_span.0..location.byte_span.1)
            .unwrap_or_default()
    }

    /// Resolves `route` to a span.
    ///
    /// A key with no value (`foo:`) resolves to its pair in every mode.
    pub fn query(&self, route: &Route, mode: Mode) -> Result<Location, QueryError> {
        if mode == Mode::KeyOnly && !matches!(route.0.last(), Some(Component::Key(_))) {
            return Err(QueryError::NotAKey);
        }

        let mut focus = self.top_value()?;
        for component in &route.0 {
            focus = self.descend(focus, component)?;
        }

        let ends_in_key = matches!(route.0.last(), Some(Component::Key(_)));
        let node = match mode {
            Mode::Exact => focus,
            Mode::Pretty if ends_in_key && !focus.is_pair() => focus.parent().unwrap_or(focus),
            Mode::Pretty => focus,
            Mode::KeyOnly => {
                let pair = if focus.is_pair() {
                    focus
                } else {
                    focus.parent().unwrap_or(focus)
                };
                pair.child_by_field_name("key").unwrap_or(pair)
            }
        };

        Ok(node.into())
    }

    /// Finds the `nth` occurrence of `needle` inside `within`.
    ///
    /// Used to narrow a value's span down to a fragment, such as a single
    /// `${{ ... }}` inside a `run:` block.
    pub fn locate(&self, within: &Location, needle: &str, nth: usize) -> Option<Location> {
        if needle.is_empty() {
            return None;
        }

        let (start, end) = within.byte_span;
        let haystack = self.source.get(start..end)?;
        let (offset, _) = haystack.match_indices(needle).nth(nth)?;

        let span = (start + offset, start + offset + needle.len());
        Some(Location {
            byte_span: span,
            point_span: (self.point(span.0)?, self.point(span.1)?),
        })
    }

    /// Converts a byte offset into a zero-based `(row, column)` point.
    pub fn point(&self, offset: usize) -> Option<(usize, usize)> {
        let offset = TextSize::from(u32::try_from(offset).ok()?);
        let lc = self.line_index.try_line_col(offset)?;

        Some((lc.line as usize, lc.col as usize))
    }

    fn top_value(&self) -> Result<Node<'_>, QueryError> {
        let stream = self.tree.root_node();
        let mut cursor = stream.walk();

        let document = stream
            .named_children(&mut cursor)
            .find(|n| n.is_kind("document"))
            .ok_or(QueryError::Empty)?;

        let mut cursor = document.walk();
        document
            .named_children(&mut cursor)
            .find(|n| n.is_value_node())
            .ok_or(QueryError::Empty)
    }

    /// Steps from a `block_node`/`flow_node` into one of its children.
    fn descend<'t>(&'t self, node: Node<'t>, component: &Component) -> Result<Node<'t>, QueryError> {
        let mut cursor = node.walk();
        let inner = node
            .named_children(&mut cursor)
            .find(|n| !n.is_decoration())
            .ok_or_else(|| match component {
                Component::Key(key) => QueryError::NotAMapping(key.to_string()),
                Component::Index(idx) => QueryError::NotASequence(*idx),
            })?;

        if inner.is_kind("alias") {
            return Err(QueryError::Alias);
        }

        match component {
            Component::Key(key) if inner.is_mapping() => self.descend_mapping(inner, key),
            Component::Index(idx) if inner.is_sequence() => descend_sequence(inner, *idx),
            Component::Key(key) => Err(QueryError::NotAMapping(key.to_string())),
            Component::Index(idx) => Err(QueryError::NotASequence(*idx)),
        }
    }

    fn descend_mapping<'t>(&'t self, mapping: Node<'t>, wanted: &str) -> Result<Node<'t>, QueryError> {
        let mut cursor = mapping.walk();

        for pair in mapping.named_children(&mut cursor).filter(|n| n.is_pair()) {
            let Some(key) = pair.child_by_field_name("key") else {
                continue;
            };

            if self.key_text(key) == Some(wanted) {
                // `foo:` with no value terminates on the pair itself.
                return Ok(pair.child_by_field_name("value").unwrap_or(pair));
            }
        }

        Err(QueryError::MissingKey(wanted.into()))
    }

    /// Returns the unquoted text of a mapping key node.
    fn key_text(&self, key: Node<'_>) -> Option<&str> {
        let mut cursor = key.walk();
        let scalar = key
            .named_children(&mut cursor)
            .find(|n| !n.is_decoration())
            .unwrap_or(key);

        let mut text = scalar.utf8_text(self.source.as_bytes()).ok()?;
        if scalar.is_quoted() && text.len() >= 2 {
            text = &text[1..text.len() - 1];
        }

        Some(text)
    }
}

fn descend_sequence(sequence: Node<'_>, idx: usize) -> Result<Node<'_>, QueryError> {
    let mut cursor = sequence.walk();

    let items = sequence
        .named_children(&mut cursor)
        .filter_map(|child| match child.kind() {
            "block_sequence_item" => {
                let mut cursor = child.walk();
                child
                    .named_children(&mut cursor)
                    .find(|c| c.is_value_node())
            }
            "flow_node" => Some(child),
            "flow_pair" => Some(child.child_by_field_name("value").unwrap_or(child)),
            _ => None,
        })
        .collect::<Vec<_>>();

    items
        .get(idx)
        .copied()
        .ok_or(QueryError::OutOfRange(idx, items.len()))
}
