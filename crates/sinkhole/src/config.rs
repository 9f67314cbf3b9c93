use std::{collections::HashMap, fs, num::NonZeroUsize, str::FromStr};

use anyhow::{Context as _, anyhow};
use camino::Utf8Path;
use serde::{Deserialize, de};
use thiserror::Error;

use crate::{App, finding::Finding};

const CONFIG_CANDIDATES: &[&str] = &[
    ".github/sinkhole.yml",
    ".github/sinkhole.yaml",
    "sinkhole.yml",
    "sinkhole.yaml",
];

#[derive(Error, Debug)]
#[error("configuration error in {path}")]
pub(crate) struct ConfigError {
    /// The path to the configuration file that caused this error.
    path: String,
    /// The source of this error.
    pub(crate) source: ConfigErrorInner,
}

#[derive(Error, Debug)]
pub(crate) enum ConfigErrorInner {
    /// An I/O error occurred while loading the configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is syntactically invalid, or has keys
    /// we don't know about.
    #[error("invalid configuration syntax")]
    Syntax(#[source] serde_yaml::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WorkflowRule {
    /// The workflow filename.
    pub(crate) filename: String,
    /// The (1-based) line within [`Self::filename`] that the rule occurs on.
    pub(crate) line: Option<usize>,
    /// The (1-based) column within [`Self::filename`] that the rule occurs on.
    pub(crate) column: Option<usize>,
}

impl FromStr for WorkflowRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self, Self::Err> {
        // A rule has three parts, delimited by `:`, two of which
        // are optional: `foobar.yml:line:col`, where `line` and `col`
        // are optional. `col` can only be provided if `line` is provided.
        let parts = s.rsplitn(3, ':').collect::<Vec<_>>();
        let mut parts = parts.iter().rev();

        let filename = parts
            .next()
            .ok_or_else(|| anyhow!("rule is missing a filename component"))?;

        if !filename.ends_with(".yml") && !filename.ends_with(".yaml") {
            return Err(anyhow!("invalid workflow filename: {filename}"));
        }

        let line = parts
            .next()
            .map(|line| NonZeroUsize::from_str(line).map(|line| line.get()))
            .transpose()
            .with_context(|| "invalid line number component (must be 1-based)")?;
        let column = parts
            .next()
            .map(|col| NonZeroUsize::from_str(col).map(|col| col.get()))
            .transpose()
            .with_context(|| "invalid column number component (must be 1-based)")?;

        Ok(Self {
            filename: filename.to_string(),
            line,
            column,
        })
    }
}

impl<'de> Deserialize<'de> for WorkflowRule {
    fn deserialize<D>(deserializer: D) -> anyhow::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        WorkflowRule::from_str(&raw).map_err(de::Error::custom)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AuditRuleConfig {
    /// Disables the audit entirely if `true`.
    #[serde(default)]
    disable: bool,
    /// A list of ignore rules for findings from this audit.
    #[serde(default)]
    ignore: Vec<WorkflowRule>,
}

/// sinkhole's configuration, as loaded from a `sinkhole.yml`.
///
/// Rules are keyed by their full identifier, tier suffix included, so
/// `code-injection-medium` can be disabled without touching
/// `code-injection-critical`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default)]
    rules: HashMap<String, AuditRuleConfig>,
}

impl Config {
    /// Loads a [`Config`] from the given contents.
    fn load(contents: &str) -> Result<Self, ConfigErrorInner> {
        serde_yaml::from_str(contents).map_err(ConfigErrorInner::Syntax)
    }

    fn load_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError {
            path: path.to_string(),
            source: ConfigErrorInner::Io(err),
        })?;

        Self::load(&contents).map_err(|err| ConfigError {
            path: path.to_string(),
            source: err,
        })
    }

    /// Loads the [`Config`] for this run.
    ///
    /// Precedence:
    /// 1. `--no-config` disables all config loading.
    /// 2. `--config <file>` (or `SINKHOLE_CONFIG`) is used as given.
    /// 3. Otherwise, a config is discovered relative to the first input.
    pub(crate) fn new(app: &App) -> Result<Self, ConfigError> {
        if app.no_config {
            tracing::debug!("skipping config discovery: explicitly disabled");
            return Ok(Self::default());
        }

        if let Some(path) = &app.config {
            tracing::debug!("loading config from `{path}`");
            return Self::load_file(path);
        }

        match app.inputs.first() {
            Some(input) => Self::discover(Utf8Path::new(input)).map(Option::unwrap_or_default),
            None => Ok(Self::default()),
        }
    }

    /// Discover a [`Config`] using rules applicable to the given path.
    ///
    /// Files start the search at their parent directory, directories at
    /// themselves.
    fn discover(path: &Utf8Path) -> Result<Option<Self>, ConfigError> {
        tracing::debug!("discovering config for input `{path}`");

        let dir = if path.is_dir() {
            path
        } else {
            match path.parent().map(|p| p.as_str()) {
                // `parent()` returns `Some("")` for bare filenames.
                Some("") => Utf8Path::new("."),
                Some(p) => p.into(),
                None => {
                    tracing::debug!("no parent for {path}, cannot discover config");
                    return Ok(None);
                }
            }
        };

        Self::discover_in_dir(dir)
    }

    /// Discover a [`Config`] in the given directory.
    ///
    /// This uses the following discovery procedure:
    /// 1. If the given directory is `blahblah/.github/workflows/`,
    ///    start at the parent (i.e. `blahblah/.github/`). Otherwise, start
    ///    at the given directory.
    /// 2. Look for each of the config candidates in the candidate path.
    ///    If found, load and return it.
    /// 3. Otherwise, continue the search in the candidate path's
    ///    parent directory, repeating step 2, terminating when
    ///    we reach the filesystem root or the first .git directory.
    fn discover_in_dir(path: &Utf8Path) -> Result<Option<Self>, ConfigError> {
        tracing::debug!("attempting config discovery in `{path}`");

        let canonical = path.canonicalize_utf8().map_err(|err| ConfigError {
            path: path.to_string(),
            source: ConfigErrorInner::Io(err),
        })?;

        let mut candidate_path = if canonical.file_name() == Some("workflows") {
            let Some(parent) = canonical.parent() else {
                tracing::debug!("no parent for `{canonical}`, cannot discover config");
                return Ok(None);
            };

            parent
        } else {
            canonical.as_path()
        };

        loop {
            for candidate in CONFIG_CANDIDATES {
                let candidate_path = candidate_path.join(candidate);
                if candidate_path.is_file() {
                    tracing::debug!("found config candidate at `{candidate_path}`");
                    return Self::load_file(&candidate_path).map(Some);
                }
            }

            if candidate_path.join(".git").is_dir() {
                tracing::debug!("found `{candidate_path}/.git`, stopping search");
                return Ok(None);
            }

            let Some(parent) = candidate_path.parent() else {
                tracing::debug!("reached filesystem root without finding a config");
                return Ok(None);
            };

            candidate_path = parent;
        }
    }

    /// Returns the configured rule identifiers that aren't in `known`.
    pub(crate) fn unknown_rules<'a>(&'a self, known: &[&str]) -> Vec<&'a str> {
        let mut unknown = self
            .rules
            .keys()
            .map(String::as_str)
            .filter(|ident| !known.contains(ident))
            .collect::<Vec<_>>();
        unknown.sort_unstable();
        unknown
    }

    /// Returns `true` if this [`Config`] disables the given audit rule.
    pub(crate) fn disables(&self, ident: &str) -> bool {
        self.rules
            .get(ident)
            .is_some_and(|rule_config| rule_config.disable)
    }

    /// Returns `true` if this [`Config`] has an ignore rule matching the
    /// given finding's primary location.
    pub(crate) fn ignores(&self, finding: &Finding<'_>) -> bool {
        let Some(rule_config) = self.rules.get(finding.ident) else {
            return false;
        };
        let Some(primary) = finding.primary_location() else {
            return false;
        };

        let start = primary.concrete.location.start_point;

        rule_config
            .ignore
            .iter()
            .filter(|rule| rule.filename == primary.symbolic.key.filename())
            .any(|rule| match rule.line {
                Some(line) => {
                    line == start.row + 1 && rule.column.is_none_or(|col| col == start.column + 1)
                }
                // Rule has no line/col, so we match by virtue of the filename matching.
                None => true,
            })
    }
}
