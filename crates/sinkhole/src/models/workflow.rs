//! GitHub Actions workflow models.
//!
//! These models enrich the models under [`actions_models::workflow`],
//! giving every job and step a handle on its parent and its position
//! in the source document.

use actions_models::{
    common::Uses,
    workflow::{self, StepBody},
};

use crate::{
    finding::location::{Locatable, SymbolicLocation},
    registry::input::{InputError, InputKey},
};

/// Represents an entire GitHub Actions workflow.
///
/// This type implements [`std::ops::Deref`] for [`workflow::Workflow`],
/// providing access to the underlying data model.
pub(crate) struct Workflow {
    /// This workflow's unique key into the input registry.
    pub(crate) key: InputKey,
    document: yamlspan::Document,
    inner: workflow::Workflow,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{key}", key = self.key)
    }
}

impl std::ops::Deref for Workflow {
    type Target = workflow::Workflow;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Workflow {
    /// Load a workflow from a buffer, with an assigned name.
    pub(crate) fn from_string(contents: String, key: InputKey) -> Result<Self, InputError> {
        let inner = serde_yaml::from_str(&contents).map_err(InputError::Syntax)?;
        let document = yamlspan::Document::new(contents).map_err(InputError::Document)?;

        Ok(Self {
            key,
            document,
            inner,
        })
    }

    /// The source document this workflow was loaded from.
    pub(crate) fn document(&self) -> &yamlspan::Document {
        &self.document
    }

    /// A [`Jobs`] iterator over this workflow's constituent [`Job`]s.
    pub(crate) fn jobs(&self) -> Jobs<'_> {
        Jobs::new(self)
    }

    /// Returns this workflow's [`SymbolicLocation`].
    ///
    /// NOTE: This lives on `Workflow` itself rather than behind
    /// [`Locatable`], since the workflow owns the key that every
    /// other location borrows.
    pub(crate) fn location(&self) -> SymbolicLocation<'_> {
        SymbolicLocation::new(&self.key).annotated("this workflow")
    }
}

/// Represents a single "normal" GitHub Actions job.
#[derive(Clone)]
pub(crate) struct NormalJob<'doc> {
    /// The job's unique ID (i.e., its key in the workflow's `jobs:` block).
    id: &'doc str,
    /// The underlying job.
    inner: &'doc workflow::NormalJob,
    /// The job's parent [`Workflow`].
    parent: &'doc Workflow,
}

impl<'doc> NormalJob<'doc> {
    pub(crate) fn new(id: &'doc str, inner: &'doc workflow::NormalJob, parent: &'doc Workflow) -> Self {
        Self { id, inner, parent }
    }

    /// An iterator of this job's constituent [`Step`]s.
    pub(crate) fn steps(&self) -> Steps<'doc> {
        Steps::new(self)
    }

    /// The underlying model, with the document's lifetime.
    pub(crate) fn model(&self) -> &'doc workflow::NormalJob {
        self.inner
    }
}

impl<'doc> JobExt<'doc> for NormalJob<'doc> {
    fn id(&self) -> &'doc str {
        self.id
    }

    fn name(&self) -> Option<&'doc str> {
        self.inner.name.as_deref()
    }

    fn parent(&self) -> &'doc Workflow {
        self.parent
    }
}

impl<'doc> std::ops::Deref for NormalJob<'doc> {
    type Target = &'doc workflow::NormalJob;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Represents a reusable workflow call job.
#[derive(Clone)]
pub(crate) struct ReusableWorkflowCallJob<'doc> {
    /// The job's unique ID (i.e., its key in the workflow's `jobs:` block).
    id: &'doc str,
    /// The underlying job.
    inner: &'doc workflow::ReusableWorkflowCallJob,
    /// The job's parent [`Workflow`].
    parent: &'doc Workflow,
}

impl<'doc> ReusableWorkflowCallJob<'doc> {
    pub(crate) fn new(
        id: &'doc str,
        inner: &'doc workflow::ReusableWorkflowCallJob,
        parent: &'doc Workflow,
    ) -> Self {
        Self { id, inner, parent }
    }

    /// The underlying model, with the document's lifetime.
    pub(crate) fn model(&self) -> &'doc workflow::ReusableWorkflowCallJob {
        self.inner
    }
}

impl<'doc> JobExt<'doc> for ReusableWorkflowCallJob<'doc> {
    fn id(&self) -> &'doc str {
        self.id
    }

    fn name(&self) -> Option<&'doc str> {
        self.inner.name.as_deref()
    }

    fn parent(&self) -> &'doc Workflow {
        self.parent
    }
}

impl<'doc> std::ops::Deref for ReusableWorkflowCallJob<'doc> {
    type Target = &'doc workflow::ReusableWorkflowCallJob;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Common behavior across both normal and reusable jobs.
pub(crate) trait JobExt<'doc> {
    /// The job's unique ID (i.e., its key in the workflow's `jobs:` block).
    fn id(&self) -> &'doc str;

    // The job's name, if it has one.
    fn name(&self) -> Option<&'doc str>;

    /// The job's parent [`Workflow`].
    fn parent(&self) -> &'doc Workflow;
}

impl<'doc, T: JobExt<'doc>> Locatable<'doc> for T {
    /// Returns this job's [`SymbolicLocation`].
    fn location(&self) -> SymbolicLocation<'doc> {
        self.parent()
            .location()
            .annotated("this job")
            .with_keys(&["jobs".into(), self.id().into()])
    }

    fn location_with_name(&self) -> SymbolicLocation<'doc> {
        match self.name() {
            Some(_) => self.location().with_keys(&["name".into()]),
            None => self.location(),
        }
    }
}

/// Represents a single GitHub Actions job.
#[derive(Clone)]
pub(crate) enum Job<'doc> {
    NormalJob(NormalJob<'doc>),
    ReusableWorkflowCallJob(ReusableWorkflowCallJob<'doc>),
}

impl<'doc> Job<'doc> {
    fn new(id: &'doc str, inner: &'doc workflow::Job, parent: &'doc Workflow) -> Self {
        match inner {
            workflow::Job::NormalJob(normal) => Job::NormalJob(NormalJob::new(id, normal, parent)),
            workflow::Job::ReusableWorkflowCallJob(reusable) => {
                Job::ReusableWorkflowCallJob(ReusableWorkflowCallJob::new(id, reusable, parent))
            }
        }
    }

    /// The job's ID.
    pub(crate) fn id(&self) -> &'doc str {
        match self {
            Job::NormalJob(job) => job.id(),
            Job::ReusableWorkflowCallJob(job) => job.id(),
        }
    }

    /// The job's `if:` guard, if any.
    pub(crate) fn guard(&self) -> Option<&'doc actions_models::common::If> {
        match self {
            Job::NormalJob(job) => job.model().r#if.as_ref(),
            Job::ReusableWorkflowCallJob(job) => job.model().r#if.as_ref(),
        }
    }
}

/// An iterable container for jobs within a [`Workflow`].
pub(crate) struct Jobs<'doc> {
    parent: &'doc Workflow,
    inner: indexmap::map::Iter<'doc, String, workflow::Job>,
}

impl<'doc> Jobs<'doc> {
    fn new(workflow: &'doc Workflow) -> Self {
        Self {
            parent: workflow,
            inner: workflow.jobs.iter(),
        }
    }
}

impl<'doc> Iterator for Jobs<'doc> {
    type Item = Job<'doc>;

    fn next(&mut self) -> Option<Self::Item> {
        let (id, job) = self.inner.next()?;
        Some(Job::new(id, job, self.parent))
    }
}

/// A script embedded in a step, along with the symbolic location of its body.
pub(crate) struct Script<'doc> {
    pub(crate) kind: ScriptKind,
    pub(crate) body: &'doc str,
    pub(crate) location: SymbolicLocation<'doc>,
}

/// The interpreter a [`Script`] is handed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScriptKind {
    /// A `run:` block, executed by a shell.
    Shell,
    /// An `actions/github-script` `script:` input, executed as JavaScript.
    GithubScript,
}

/// Represents a single step in a normal workflow job.
///
/// This type implements [`std::ops::Deref`] for [`workflow::Step`], which
/// provides access to the step's actual fields.
#[derive(Clone)]
pub(crate) struct Step<'doc> {
    /// The step's index within its parent job.
    pub(crate) index: usize,
    /// The inner step model.
    inner: &'doc workflow::Step,
    /// The parent [`Job`].
    pub(crate) parent: NormalJob<'doc>,
}

impl<'doc> std::ops::Deref for Step<'doc> {
    type Target = &'doc workflow::Step;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'doc> Locatable<'doc> for Step<'doc> {
    /// This step's [`SymbolicLocation`].
    fn location(&self) -> SymbolicLocation<'doc> {
        self.parent
            .location()
            .with_keys(&["steps".into(), self.index.into()])
            .annotated("this step")
    }

    fn location_with_name(&self) -> SymbolicLocation<'doc> {
        match self.inner.name {
            Some(_) => self.location().with_keys(&["name".into()]),
            None => self.location(),
        }
    }
}

impl<'doc> Step<'doc> {
    fn new(index: usize, inner: &'doc workflow::Step, parent: NormalJob<'doc>) -> Self {
        Self {
            index,
            inner,
            parent,
        }
    }

    /// The step's `id:`, if it has one.
    pub(crate) fn id(&self) -> Option<&'doc str> {
        self.inner.id.as_deref()
    }

    /// The step's own `env:` block.
    pub(crate) fn env(&self) -> &'doc actions_models::common::Env {
        &self.inner.env
    }

    /// Returns the step's `uses:`, if it's an action step.
    pub(crate) fn uses(&self) -> Option<&'doc Uses> {
        match &self.inner.body {
            StepBody::Uses { uses, .. } => Some(uses),
            StepBody::Run { .. } => None,
        }
    }

    /// Returns the string value of the `with:` input `key`, if this is
    /// an action step that sets it.
    pub(crate) fn input(&self, key: &str) -> Option<&'doc str> {
        self.inner.body.input(key)?.as_str()
    }

    /// Returns the code this step executes, if any: either its `run:`
    /// block, or the `script:` input of `actions/github-script`.
    pub(crate) fn script(&self) -> Option<Script<'doc>> {
        match &self.inner.body {
            StepBody::Run { run, .. } => Some(Script {
                kind: ScriptKind::Shell,
                body: run,
                location: self.location().with_keys(&["run".into()]),
            }),
            StepBody::Uses { uses, with } if uses.is("actions/github-script") => {
                let body = with.get("script")?.as_str()?;
                Some(Script {
                    kind: ScriptKind::GithubScript,
                    body,
                    location: self.location().with_keys(&["with".into(), "script".into()]),
                })
            }
            StepBody::Uses { .. } => None,
        }
    }

    /// Returns this step's parent [`NormalJob`].
    pub(crate) fn job(&self) -> &NormalJob<'doc> {
        &self.parent
    }

    /// Returns this step's (grand)parent [`Workflow`].
    pub(crate) fn workflow(&self) -> &'doc Workflow {
        self.parent.parent()
    }
}

/// An iterable container for steps within a [`NormalJob`].
pub(crate) struct Steps<'doc> {
    inner: std::iter::Enumerate<std::slice::Iter<'doc, workflow::Step>>,
    parent: NormalJob<'doc>,
}

impl<'doc> Steps<'doc> {
    /// Create a new [`Steps`].
    fn new(job: &NormalJob<'doc>) -> Self {
        Self {
            inner: job.model().steps.iter().enumerate(),
            parent: job.clone(),
        }
    }
}

impl<'doc> Iterator for Steps<'doc> {
    type Item = Step<'doc>;

    fn next(&mut self) -> Option<Self::Item> {
        let (idx, step) = self.inner.next()?;
        Some(Step::new(idx, step, self.parent.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Job, ScriptKind, Workflow};
    use crate::{
        finding::location::{Locatable, Routable},
        registry::input::InputKey,
    };

    const WORKFLOW: &str = r#"on: push
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - run: make lint
      - uses: actions/github-script@v7
        with:
          script: console.log(context.sha)
      - uses: actions/checkout@v4
  call:
    uses: ./.github/workflows/reusable.yml
"#;

    #[test]
    fn test_jobs_and_steps() {
        let key = InputKey::local("ci.yml", None).unwrap();
        let workflow = Workflow::from_string(WORKFLOW.into(), key).unwrap();

        let jobs = workflow.jobs().collect::<Vec<_>>();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id(), "lint");
        assert!(matches!(jobs[1], Job::ReusableWorkflowCallJob(_)));

        let Job::NormalJob(lint) = &jobs[0] else {
            panic!("expected a normal job");
        };

        let steps = lint.steps().collect::<Vec<_>>();
        assert_eq!(steps.len(), 3);
        let run = steps[0].script().unwrap();
        assert_eq!(run.kind, ScriptKind::Shell);
        assert_eq!(run.body, "make lint");
        assert_eq!(steps[1].route().components().len(), 4);

        let script = steps[1].script().unwrap();
        assert_eq!(script.kind, ScriptKind::GithubScript);
        assert_eq!(script.body, "console.log(context.sha)");
        assert!(steps[2].script().is_none());

        let loc = steps[0].location().concretize(workflow.document()).unwrap();
        assert_eq!(loc.concrete.location.start_point.row, 5);
    }

    #[test]
    fn test_from_string_rejects_non_workflows() {
        let key = InputKey::local("ci.yml", None).unwrap();
        assert!(Workflow::from_string("just a string".into(), key).is_err());
    }
}
