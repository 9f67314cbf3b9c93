//! Symbolic and concrete locations.

use std::{borrow::Cow, ops::Range};

use serde::Serialize;
use yamlspan::{Component, Document, Mode, Route};

use crate::registry::input::InputKey;

/// Represents a location's type.
#[derive(Serialize, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum LocationKind {
    /// The location a finding is "about", e.g. the offending expression.
    ///
    /// Ignore rules and exit positions are computed from this location.
    Primary,

    /// Supporting context, e.g. the privileged trigger that makes the
    /// primary location dangerous.
    ///
    /// This is the default location type.
    #[default]
    Related,
}

/// A fragment of a feature, found by text search within that feature.
///
/// Fragments let a finding point at a single `${{ ... }}` inside a
/// multi-line `run:` block rather than at the whole block.
#[derive(Serialize, Clone, Debug)]
pub(crate) struct Fragment<'doc> {
    pub(crate) needle: Cow<'doc, str>,
    /// Which occurrence of the needle to select, zero-based.
    pub(crate) nth: usize,
}

impl<'doc> Fragment<'doc> {
    pub(crate) fn new(needle: impl Into<Cow<'doc, str>>, nth: usize) -> Self {
        Self {
            needle: needle.into(),
            nth,
        }
    }
}

/// The kind of feature referred to by a symbolic location.
#[derive(Serialize, Clone, Debug)]
pub(crate) enum SymbolicFeature<'doc> {
    /// The whole feature, including its key if the route ends in one.
    Normal,
    /// A fragment within the feature's value.
    Fragment(Fragment<'doc>),
    /// Only the key of the feature.
    KeyOnly,
}

/// Represents a symbolic location.
#[derive(Serialize, Clone, Debug)]
pub(crate) struct SymbolicLocation<'doc> {
    /// The unique ID of the input, as it appears in the input registry.
    pub(crate) key: &'doc InputKey,

    /// An annotation for this location.
    pub(crate) annotation: String,

    /// A symbolic route (of keys and indices) to the final location.
    pub(crate) route: Route<'doc>,

    pub(crate) feature_kind: SymbolicFeature<'doc>,

    /// The kind of location.
    pub(crate) kind: LocationKind,
}

impl<'doc> SymbolicLocation<'doc> {
    pub(crate) fn new(key: &'doc InputKey) -> Self {
        Self {
            key,
            annotation: String::new(),
            route: Route::default(),
            feature_kind: SymbolicFeature::Normal,
            kind: LocationKind::default(),
        }
    }

    pub(crate) fn with_keys(&self, keys: &[Component<'doc>]) -> SymbolicLocation<'doc> {
        SymbolicLocation {
            key: self.key,
            annotation: self.annotation.clone(),
            route: self.route.with_keys(keys.iter().cloned()),
            feature_kind: SymbolicFeature::Normal,
            kind: self.kind,
        }
    }

    /// Narrows this location down to a fragment of its value.
    pub(crate) fn fragment(mut self, fragment: Fragment<'doc>) -> SymbolicLocation<'doc> {
        self.feature_kind = SymbolicFeature::Fragment(fragment);
        self
    }

    /// Mark this symbolic location as a "key-only" feature.
    pub(crate) fn key_only(mut self) -> SymbolicLocation<'doc> {
        self.feature_kind = SymbolicFeature::KeyOnly;
        self
    }

    /// Adds a human-readable annotation to the current `SymbolicLocation`.
    pub(crate) fn annotated(mut self, annotation: impl Into<String>) -> SymbolicLocation<'doc> {
        self.annotation = annotation.into();
        self
    }

    /// Mark the current `SymbolicLocation` as a "primary" location.
    pub(crate) fn primary(mut self) -> SymbolicLocation<'doc> {
        self.kind = LocationKind::Primary;
        self
    }

    pub(crate) fn is_primary(&self) -> bool {
        matches!(self.kind, LocationKind::Primary)
    }

    /// Concretize this `SymbolicLocation`, consuming it in the process.
    pub(crate) fn concretize(self, document: &'doc Document) -> anyhow::Result<Location<'doc>> {
        let location = match &self.feature_kind {
            SymbolicFeature::Normal => document.query(&self.route, Mode::Pretty)?,
            SymbolicFeature::KeyOnly => document.query(&self.route, Mode::KeyOnly)?,
            SymbolicFeature::Fragment(fragment) => {
                let feature = document.query(&self.route, Mode::Exact)?;

                // Fragments come from parsed YAML values, which don't always
                // match their source text byte-for-byte (escapes in quoted
                // scalars, folded blocks). Fall back to the whole value.
                document
                    .locate(&feature, &fragment.needle, fragment.nth)
                    .unwrap_or_else(|| {
                        tracing::debug!(
                            "couldn't find fragment {needle:?} in {key}, using whole feature",
                            needle = fragment.needle,
                            key = self.key,
                        );
                        feature
                    })
            }
        };

        Ok(Location {
            concrete: Feature {
                location: ConcreteLocation::from(&location),
                feature: document.extract(&location),
            },
            symbolic: self,
        })
    }
}

/// Gives models (e.g. workflow steps) the ability to express their symbolic location.
pub(crate) trait Locatable<'doc> {
    /// Returns the symbolic location of this model.
    fn location(&self) -> SymbolicLocation<'doc>;

    /// Returns an "enriched" symbolic location of this model, pointing
    /// at its `name:` when it has one.
    fn location_with_name(&self) -> SymbolicLocation<'doc> {
        self.location()
    }
}

pub(crate) trait Routable<'a, 'doc> {
    fn route(&'a self) -> Route<'doc>;
}

impl<'doc, T: Locatable<'doc>> Routable<'_, 'doc> for T {
    fn route(&self) -> Route<'doc> {
        self.location().route
    }
}

/// Represents a `(row, column)` point within a file.
#[derive(Copy, Clone, Debug, Serialize)]
pub(crate) struct Point {
    pub(crate) row: usize,
    pub(crate) column: usize,
}

/// A "concrete" location for some feature.
/// Every concrete location contains two spans: a line-and-column span,
/// and an offset range.
#[derive(Debug, Serialize)]
pub(crate) struct ConcreteLocation {
    pub(crate) start_point: Point,
    pub(crate) end_point: Point,
    pub(crate) offset_span: Range<usize>,
}

impl From<&yamlspan::Location> for ConcreteLocation {
    fn from(value: &yamlspan::Location) -> Self {
        let ((start_row, start_col), (end_row, end_col)) = value.point_span;

        Self {
            start_point: Point {
                row: start_row,
                column: start_col,
            },
            end_point: Point {
                row: end_row,
                column: end_col,
            },
            offset_span: value.byte_span.0..value.byte_span.1,
        }
    }
}

/// An extracted feature, along with its concrete location.
#[derive(Debug, Serialize)]
pub(crate) struct Feature<'doc> {
    /// The feature's concrete location, as both an offset range and point span.
    pub(crate) location: ConcreteLocation,

    /// The feature's textual content.
    pub(crate) feature: &'doc str,
}

/// A location within a workflow, with both symbolic and concrete components.
#[derive(Debug, Serialize)]
pub(crate) struct Location<'doc> {
    /// The symbolic workflow location.
    pub(crate) symbolic: SymbolicLocation<'doc>,
    /// The concrete location, including extracted feature.
    pub(crate) concrete: Feature<'doc>,
}

#[cfg(test)]
mod tests {
    use yamlspan::Document;

    use super::{Fragment, SymbolicLocation};
    use crate::registry::input::InputKey;

    const WORKFLOW: &str = r#"on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: |
          echo "${{ github.sha }}"
          echo "${{ github.sha }}"
"#;

    #[test]
    fn test_concretize_fragment() {
        let doc = Document::new(WORKFLOW).unwrap();
        let key = InputKey::local("ci.yml", None).unwrap();

        let run = SymbolicLocation::new(&key).with_keys(&[
            "jobs".into(),
            "build".into(),
            "steps".into(),
            0.into(),
            "run".into(),
        ]);

        let second = run
            .clone()
            .fragment(Fragment::new("${{ github.sha }}", 1))
            .concretize(&doc)
            .unwrap();
        assert_eq!(second.concrete.feature, "${{ github.sha }}");
        assert_eq!(second.concrete.location.start_point.row, 7);
        assert_eq!(second.concrete.location.start_point.column, 16);

        // A missing fragment degrades to the whole value.
        let missing = run
            .fragment(Fragment::new("${{ github.ref }}", 0))
            .concretize(&doc)
            .unwrap();
        assert!(missing.concrete.feature.starts_with('|'));
    }

    #[test]
    fn test_concretize_key_only() {
        let doc = Document::new(WORKFLOW).unwrap();
        let key = InputKey::local("ci.yml", None).unwrap();

        let loc = SymbolicLocation::new(&key)
            .with_keys(&["jobs".into(), "build".into()])
            .key_only()
            .primary()
            .concretize(&doc)
            .unwrap();

        assert!(loc.symbolic.is_primary());
        assert_eq!(loc.concrete.feature, "build");
        assert_eq!(loc.concrete.location.start_point.row, 2);
        assert_eq!(loc.concrete.location.start_point.column, 2);
    }
}
