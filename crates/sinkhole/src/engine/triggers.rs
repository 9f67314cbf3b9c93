//! Trigger privilege classification and `on:` extraction.

use actions_models::workflow::Trigger;

use crate::{finding::location::SymbolicLocation, models::workflow::Workflow};

/// Events whose runs get write credentials or secrets even when an
/// outside contributor starts them.
pub(crate) const PRIVILEGED_TRIGGERS: &[&str] = &[
    "pull_request_target",
    "workflow_run",
    "issue_comment",
    "issues",
    "discussion_comment",
];

/// Returns whether `name` is a privileged trigger.
pub(crate) fn is_privileged(name: &str) -> bool {
    PRIVILEGED_TRIGGERS
        .iter()
        .any(|t| t.eq_ignore_ascii_case(name))
}

/// Like [`is_privileged`], but also counts `workflow_call`: a reusable
/// workflow inherits whatever privilege its caller runs with.
pub(crate) fn is_dangerous_for_analysis(name: &str) -> bool {
    is_privileged(name) || name.eq_ignore_ascii_case("workflow_call")
}

/// A single trigger declared in a workflow's `on:` block.
#[derive(Clone, Debug)]
pub(crate) struct TriggerDecl<'doc> {
    /// The canonical (lowercase) event name.
    pub(crate) name: String,
    /// Where the trigger is declared.
    pub(crate) location: SymbolicLocation<'doc>,
}

impl TriggerDecl<'_> {
    pub(crate) fn is_privileged(&self) -> bool {
        is_privileged(&self.name)
    }

    pub(crate) fn is_dangerous_for_analysis(&self) -> bool {
        is_dangerous_for_analysis(&self.name)
    }
}

/// The triggers a workflow declares, in declaration order.
#[derive(Clone, Debug, Default)]
pub(crate) struct WorkflowTriggerSet<'doc> {
    triggers: Vec<TriggerDecl<'doc>>,
}

impl<'doc> WorkflowTriggerSet<'doc> {
    /// Extracts the trigger set from a workflow's `on:` block.
    ///
    /// All three forms are accepted: `on: push`, `on: [push, issues]`
    /// and `on: { push: ..., issues: ... }`. Duplicate names keep their
    /// first declaration.
    pub(crate) fn extract(workflow: &'doc Workflow) -> Self {
        let on = workflow.location().with_keys(&["on".into()]);
        let annotate = |loc: SymbolicLocation<'doc>, name: &str| {
            let annotation = if is_dangerous_for_analysis(name) {
                format!("{name} is a privileged trigger")
            } else {
                format!("triggered by {name}")
            };
            loc.annotated(annotation)
        };

        let mut set = Self::default();
        match &workflow.on {
            Trigger::BareEvent(name) => {
                set.push(name, annotate(on.clone(), name));
            }
            Trigger::BareEvents(names) => {
                for (idx, name) in names.iter().enumerate() {
                    set.push(name, annotate(on.with_keys(&[idx.into()]), name));
                }
            }
            Trigger::Events(events) => {
                for name in events.keys() {
                    set.push(
                        name,
                        annotate(on.with_keys(&[name.as_str().into()]).key_only(), name),
                    );
                }
            }
        }

        set
    }

    fn push(&mut self, name: &str, location: SymbolicLocation<'doc>) {
        let name = name.to_ascii_lowercase();
        if self.contains(&name) {
            tracing::debug!("ignoring duplicate trigger {name}");
            return;
        }

        self.triggers.push(TriggerDecl { name, location });
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.triggers.iter().any(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.triggers.iter().map(|t| t.name.as_str())
    }

    /// Returns the subset of this set whose names satisfy `keep`,
    /// preserving declaration order.
    pub(crate) fn restrict(&self, keep: impl Fn(&str) -> bool) -> EffectiveTriggerSet<'doc> {
        EffectiveTriggerSet {
            triggers: self
                .triggers
                .iter()
                .filter(|t| keep(&t.name))
                .cloned()
                .collect(),
        }
    }

    /// The whole set, as the effective set of an unguarded job.
    pub(crate) fn all(&self) -> EffectiveTriggerSet<'doc> {
        self.restrict(|_| true)
    }
}

/// The triggers that can actually reach a particular job, once its
/// `if:` guard is accounted for. Always a subset of the workflow's
/// [`WorkflowTriggerSet`].
#[derive(Clone, Debug, Default)]
pub(crate) struct EffectiveTriggerSet<'doc> {
    triggers: Vec<TriggerDecl<'doc>>,
}

impl<'doc> EffectiveTriggerSet<'doc> {
    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.triggers.iter().map(|t| t.name.as_str())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Whether any privileged trigger can reach the job.
    pub(crate) fn has_privileged_trigger(&self) -> bool {
        self.triggers.iter().any(TriggerDecl::is_privileged)
    }

    /// Whether any privileged trigger, or `workflow_call`, can reach the job.
    pub(crate) fn has_unsafe_trigger(&self) -> bool {
        self.triggers.iter().any(TriggerDecl::is_dangerous_for_analysis)
    }

    /// The first privileged trigger that reaches the job, if any.
    pub(crate) fn first_privileged(&self) -> Option<&TriggerDecl<'doc>> {
        self.triggers.iter().find(|t| t.is_privileged())
    }

    /// The first privileged trigger or `workflow_call` that reaches the job.
    pub(crate) fn first_unsafe(&self) -> Option<&TriggerDecl<'doc>> {
        self.triggers.iter().find(|t| t.is_dangerous_for_analysis())
    }
}
