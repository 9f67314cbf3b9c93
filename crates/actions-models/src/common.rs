//! Building blocks shared between workflow-level, job-level and step-level
//! models.

use std::fmt::{self, Display};

use indexmap::IndexMap;
use self_cell::self_cell;
use serde::{Deserialize, Deserializer, Serialize, de};

/// An `env:` block, or any other mapping that GitHub Actions stringifies
/// (`with:` inputs, for example).
pub type Env = IndexMap<String, EnvValue>;

/// A value in an [`Env`]-like mapping.
///
/// GitHub Actions turns every one of these into a string at runtime; we
/// keep the original YAML type around for display purposes.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum EnvValue {
    /// A string value. `foo:` with no value is an empty string.
    #[serde(deserialize_with = "null_to_default")]
    String(String),
    /// A number.
    Number(f64),
    /// A boolean.
    Boolean(bool),
}

impl EnvValue {
    /// Returns the value if it's a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// An `if:` guard on a job or step.
///
/// Guards are either YAML booleans or expressions, which may be written
/// with or without the `${{ }}` fence.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum If {
    /// `if: true` / `if: false`.
    Bool(bool),
    /// Any expression.
    Expr(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// Accepts either `key: value` or `key: [value, ...]`.
pub(crate) fn one_or_many<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::One(v) => vec![v],
        OneOrMany::Many(vs) => vs,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    String(String),
}

/// Accepts a YAML boolean where GitHub Actions expects a string, e.g.
/// `run: true`.
pub(crate) fn bool_is_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match BoolOrString::deserialize(de)? {
        BoolOrString::Bool(b) => b.to_string(),
        BoolOrString::String(s) => s,
    })
}

fn null_to_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// A malformed `uses:` clause.
#[derive(Debug, PartialEq, thiserror::Error)]
#[error("malformed `uses` ref: {0}")]
pub struct UsesError(String);

/// A `uses:` clause on a step or a job.
#[derive(Debug, PartialEq)]
pub enum Uses {
    /// `uses: ./path/to/action` or `uses: ./.github/workflows/x.yml`.
    Local {
        /// The path as written.
        path: String,
    },
    /// `uses: owner/repo[/subpath]@ref`.
    Repository(RepositoryUses),
    /// `uses: docker://image`.
    Docker {
        /// Everything after `docker://`.
        image: String,
    },
}

impl Uses {
    /// Parses a `uses:` clause.
    pub fn parse(uses: impl Into<String>) -> Result<Self, UsesError> {
        let uses = uses.into();

        if uses.starts_with("./") {
            Ok(Self::Local { path: uses })
        } else if let Some(image) = uses.strip_prefix("docker://") {
            Ok(Self::Docker {
                image: image.into(),
            })
        } else {
            RepositoryUses::parse(uses).map(Self::Repository)
        }
    }

    /// The clause as written.
    pub fn raw(&self) -> &str {
        match self {
            Self::Local { path } => path,
            Self::Repository(repo) => repo.raw(),
            Self::Docker { image } => image,
        }
    }

    /// Returns whether this is a repository `uses:` for `pattern`.
    ///
    /// `pattern` is `owner/repo` or `owner/repo/subpath`, compared
    /// case-insensitively and ignoring the ref.
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Repository(repo) => repo.matches(pattern),
            _ => false,
        }
    }
}

#[derive(Debug, PartialEq)]
struct RepoRef<'a> {
    owner: &'a str,
    repo: &'a str,
    subpath: Option<&'a str>,
    git_ref: Option<&'a str>,
}

impl<'a> RepoRef<'a> {
    fn split(uses: &'a str) -> Result<Self, UsesError> {
        let (path, git_ref) = match uses.rsplit_once('@') {
            Some((path, git_ref)) => (path, Some(git_ref)),
            None => (uses, None),
        };

        let mut parts = path.splitn(3, '/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner,
                repo,
                subpath: parts.next(),
                git_ref,
            }),
            _ => Err(UsesError(format!("expected owner/repo, got {uses}"))),
        }
    }
}

self_cell!(
    /// A `uses: owner/repo[/subpath]@ref` clause.
    pub struct RepositoryUses {
        owner: String,
        #[covariant]
        dependent: RepoRef,
    }
    impl {Debug, PartialEq}
);

impl RepositoryUses {
    /// Parses a repository `uses:` clause.
    pub fn parse(uses: impl Into<String>) -> Result<Self, UsesError> {
        Self::try_new(uses.into(), |raw| RepoRef::split(raw))
    }

    /// The clause as written.
    pub fn raw(&self) -> &str {
        self.borrow_owner()
    }

    /// The owning user or organization.
    pub fn owner(&self) -> &str {
        self.borrow_dependent().owner
    }

    /// The repository name.
    pub fn repo(&self) -> &str {
        self.borrow_dependent().repo
    }

    /// The path inside the repository, if any.
    pub fn subpath(&self) -> Option<&str> {
        self.borrow_dependent().subpath
    }

    /// The pinned ref, if any.
    pub fn git_ref(&self) -> Option<&str> {
        self.borrow_dependent().git_ref
    }

    /// See [`Uses::is`].
    pub fn matches(&self, pattern: &str) -> bool {
        let mut parts = pattern.splitn(3, '/');
        let (Some(owner), Some(repo)) = (parts.next(), parts.next()) else {
            return false;
        };

        let subpath_matches = match (parts.next(), self.subpath()) {
            (None, None) => true,
            (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
            _ => false,
        };

        owner.eq_ignore_ascii_case(self.owner())
            && repo.eq_ignore_ascii_case(self.repo())
            && subpath_matches
    }
}

impl Display for RepositoryUses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw())
    }
}

/// Logs a deserialization failure before handing it back to serde, since
/// untagged enums swallow the original message.
fn custom_error<'de, D>(msg: impl Display) -> D::Error
where
    D: Deserializer<'de>,
{
    let msg = msg.to_string();
    tracing::debug!(msg);
    de::Error::custom(msg)
}

/// Deserializes a step-level `uses:`.
pub(crate) fn step_uses<'de, D>(de: D) -> Result<Uses, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(de)?;
    let uses = Uses::parse(raw).map_err(custom_error::<D>)?;

    match &uses {
        Uses::Repository(repo) if repo.git_ref().is_none() => {
            Err(custom_error::<D>(format!("missing `@<ref>` in {}", repo.raw())))
        }
        _ => Ok(uses),
    }
}

/// Deserializes a job-level `uses:`, which must name a reusable workflow.
pub(crate) fn reusable_uses<'de, D>(de: D) -> Result<Uses, D::Error>
where
    D: Deserializer<'de>,
{
    let uses = step_uses(de)?;

    match &uses {
        Uses::Docker { .. } => Err(custom_error::<D>(
            "docker images can't be used as reusable workflows",
        )),
        Uses::Local { path } if path.contains('@') => Err(custom_error::<D>(
            "local reusable workflows can't be pinned",
        )),
        _ => Ok(uses),
    }
}
