//! Workflow definitions, i.e. files under `.github/workflows/`.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::common::{Env, EnvValue, If, Uses, bool_is_string, one_or_many, reusable_uses, step_uses};

/// A workflow file.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct Workflow {
    /// The workflow's display name.
    pub name: Option<String>,
    /// The events that trigger the workflow.
    pub on: Trigger,
    /// Workflow-wide environment.
    #[serde(default)]
    pub env: Env,
    /// The workflow's jobs, in declaration order.
    pub jobs: IndexMap<String, Job>,
}

/// The `on:` block of a workflow.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum Trigger {
    /// `on: push`
    BareEvent(String),
    /// `on: [push, pull_request]`
    BareEvents(Vec<String>),
    /// `on: { push: { branches: [main] }, workflow_dispatch: }`
    Events(IndexMap<String, serde_yaml::Value>),
}

impl Trigger {
    /// Returns the declared event names in declaration order, as written.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::BareEvent(event) => vec![event.as_str()],
            Self::BareEvents(events) => events.iter().map(String::as_str).collect(),
            Self::Events(events) => events.keys().map(String::as_str).collect(),
        }
    }
}

/// A single job.
///
/// Jobs either run steps themselves or call a reusable workflow.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum Job {
    /// `uses: org/repo/.github/workflows/x.yml@ref`
    ReusableWorkflowCallJob(Box<ReusableWorkflowCallJob>),
    /// A job with `steps:`.
    NormalJob(Box<NormalJob>),
}

/// A job that runs its own steps.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct NormalJob {
    /// The job's display name.
    pub name: Option<String>,
    /// The job's guard.
    pub r#if: Option<If>,
    /// Jobs that must complete first.
    #[serde(default, deserialize_with = "one_or_many")]
    pub needs: Vec<String>,
    /// Job-wide environment.
    #[serde(default)]
    pub env: Env,
    /// The job's steps, in execution order.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Values this job exports to dependent jobs.
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

/// A job that calls a reusable workflow.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct ReusableWorkflowCallJob {
    /// The job's display name.
    pub name: Option<String>,
    /// The job's guard.
    pub r#if: Option<If>,
    /// Jobs that must complete first.
    #[serde(default, deserialize_with = "one_or_many")]
    pub needs: Vec<String>,
    /// The called workflow.
    #[serde(deserialize_with = "reusable_uses")]
    pub uses: Uses,
    /// Inputs passed to the called workflow.
    #[serde(default)]
    pub with: Env,
}

/// A step within a [`NormalJob`].
#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    /// The step's ID, used to reference its outputs.
    pub id: Option<String>,
    /// The step's guard.
    pub r#if: Option<If>,
    /// The step's display name.
    pub name: Option<String>,
    /// Step-level environment.
    #[serde(default)]
    pub env: Env,
    /// What the step does.
    #[serde(flatten)]
    pub body: StepBody,
}

/// The two kinds of step.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum StepBody {
    /// `uses: owner/repo@ref` with optional `with:` inputs.
    Uses {
        /// The action.
        #[serde(deserialize_with = "step_uses")]
        uses: Uses,
        /// The action's inputs.
        #[serde(default)]
        with: Env,
    },
    /// `run: ...`
    Run {
        /// The script.
        #[serde(deserialize_with = "bool_is_string")]
        run: String,
        /// The shell the script runs under, if overridden.
        shell: Option<String>,
        /// The directory the script runs in.
        #[serde(rename = "working-directory")]
        working_directory: Option<String>,
    },
}

impl StepBody {
    /// Returns the `with:` value for `key` if this is a `uses:` step.
    pub fn input(&self, key: &str) -> Option<&EnvValue> {
        match self {
            Self::Uses { with, .. } => with.get(key),
            Self::Run { .. } => None,
        }
    }
}
