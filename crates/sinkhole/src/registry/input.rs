//! Input registry and associated types.

use std::collections::{BTreeMap, btree_map};

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;

use crate::models::workflow::Workflow;

#[derive(Error, Debug)]
pub(crate) enum InputError {
    /// The input isn't valid YAML, or doesn't have the shape of a workflow.
    /// This typically indicates a user error.
    #[error("invalid workflow: {0}")]
    Syntax(#[source] serde_yaml::Error),
    /// The input parsed, but couldn't be indexed for source positions.
    #[error("couldn't build a source index for the input")]
    Document(#[source] yamlspan::QueryError),
    /// An I/O error occurred while loading the input.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The input's name is missing.
    #[error("invalid input: no filename component")]
    MissingName,
}

/// A unique identifying "key" for a workflow file in a given run.
///
/// Keys are the path the user gave us (absolute or relative), plus the
/// directory prefix they were collected under, if any.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Serialize, PartialOrd, Ord)]
pub(crate) struct InputKey {
    /// The path's nondeterministic prefix, if any.
    prefix: Option<Utf8PathBuf>,
    /// The given path to the input. This can be absolute or relative.
    pub(crate) given_path: Utf8PathBuf,
}

impl std::fmt::Display for InputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file://{path}", path = self.given_path)
    }
}

impl InputKey {
    pub(crate) fn local<P: AsRef<Utf8Path>>(
        path: P,
        prefix: Option<P>,
    ) -> Result<Self, InputError> {
        // All keys must have a filename component.
        if path.as_ref().file_name().is_none() {
            return Err(InputError::MissingName);
        }

        Ok(Self {
            prefix: prefix.map(|p| p.as_ref().to_path_buf()),
            given_path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the path relative to the collection prefix, e.g.
    /// `.github/workflows/ci.yml` when `sinkhole .` collected
    /// `./.github/workflows/ci.yml`.
    ///
    /// Falls back to the given path when there's no prefix to strip.
    pub(crate) fn relative_path(&self) -> &str {
        self.prefix
            .as_ref()
            .and_then(|pfx| self.given_path.strip_prefix(pfx).ok())
            .unwrap_or(&self.given_path)
            .as_str()
    }

    /// The path as the user gave it to us, for display.
    pub(crate) fn presentation_path(&self) -> &str {
        self.given_path.as_str()
    }

    /// Returns the filename component of this [`InputKey`].
    pub(crate) fn filename(&self) -> &str {
        // Every key has a filename, see `InputKey::local`.
        self.given_path.file_name().unwrap_or_default()
    }
}

pub(crate) struct InputRegistry {
    strict: bool,
    // NOTE: A BTreeMap keeps iteration (and therefore output) order
    // deterministic across runs.
    pub(crate) inputs: BTreeMap<InputKey, Workflow>,
}

impl InputRegistry {
    pub(crate) fn new(strict: bool) -> Self {
        Self {
            strict,
            inputs: Default::default(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Loads and registers a workflow.
    ///
    /// Unless the registry is strict, inputs that fail to parse are
    /// reported once and skipped.
    pub(crate) fn register(&mut self, contents: String, key: InputKey) -> anyhow::Result<()> {
        tracing::debug!("registering workflow input with key {key}");

        match Workflow::from_string(contents, key.clone()) {
            Ok(workflow) => self.register_input(workflow),
            Err(e @ (InputError::Syntax(_) | InputError::Document(_))) if !self.strict => {
                tracing::warn!("skipping {key}: {e}");
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!(e)).with_context(|| format!("failed to load {key}")),
        }
    }

    fn register_input(&mut self, workflow: Workflow) -> anyhow::Result<()> {
        if self.inputs.contains_key(&workflow.key) {
            return Err(anyhow::anyhow!(
                "can't register {key} more than once",
                key = workflow.key
            ));
        }

        self.inputs.insert(workflow.key.clone(), workflow);

        Ok(())
    }

    pub(crate) fn iter_inputs(&self) -> btree_map::Iter<'_, InputKey, Workflow> {
        self.inputs.iter()
    }

    pub(crate) fn get_input(&self, key: &InputKey) -> Option<&Workflow> {
        self.inputs.get(key)
    }
}
