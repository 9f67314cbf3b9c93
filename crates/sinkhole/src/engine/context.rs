//! Per-visit analysis state.

use std::ops::Range;

use actions_expressions::Expr;
use actions_models::common::Env;

use super::{
    job_triggers::analyze_job_triggers,
    shell::{EnvFile, ShellFacts},
    taint::{
        EnvFileWrite, JobOutputTaint, Sources, StepOutputTaint, TaintedVariable, env_file_writes,
    },
    triggers::{EffectiveTriggerSet, WorkflowTriggerSet},
    trust,
};
use crate::{
    finding::location::{Fragment, Locatable as _, SymbolicLocation},
    models::workflow::{Job, JobExt as _, NormalJob, Script, ScriptKind, Step, Workflow},
    utils::{ExtractedExpr, extract_expressions},
};

/// An expression in a script that expands to untrusted data.
#[derive(Clone, Debug)]
pub(crate) struct TaintedExpr<'doc> {
    pub(crate) expr: ExtractedExpr<'doc>,
    /// The expression's span within the script.
    pub(crate) span: Range<usize>,
    pub(crate) sources: Sources,
}

/// A shell variable assigned from tainted data inside the script itself.
#[derive(Clone, Debug)]
pub(crate) struct LocalTaint {
    pub(crate) name: String,
    /// The end of the assignment; only later usages see the value.
    pub(crate) from: usize,
    pub(crate) sources: Sources,
    /// Whether the value came from a tainted `env:` variable rather than
    /// an interpolated expression.
    pub(crate) via_env: bool,
}

/// Everything the rules need to know about the step being visited.
pub(crate) struct StepFacts<'doc> {
    pub(crate) script: Option<Script<'doc>>,
    /// Shell syntax facts, for `run:` scripts that parse.
    pub(crate) shell: Option<ShellFacts>,
    /// Tainted expressions interpolated into the script, in order.
    pub(crate) exprs: Vec<TaintedExpr<'doc>>,
    /// Environment variables visible to the step whose values are
    /// untrusted.
    pub(crate) env: Vec<TaintedVariable<'doc>>,
    pub(crate) locals: Vec<LocalTaint>,
    /// In a reusable workflow, environment variables bound to `inputs.*`.
    pub(crate) input_env: Vec<TaintedVariable<'doc>>,
}

impl<'doc> StepFacts<'doc> {
    /// A symbolic location for the script text at `span`.
    pub(crate) fn fragment(&self, span: &Range<usize>) -> Option<SymbolicLocation<'doc>> {
        let script = self.script.as_ref()?;
        let body: &'doc str = script.body;
        let needle = body.get(span.clone())?;
        let nth = body
            .match_indices(needle)
            .position(|(idx, _)| idx == span.start)
            .unwrap_or(0);

        Some(
            script
                .location
                .clone()
                .fragment(Fragment::new(needle, nth)),
        )
    }

    /// The untrusted sources whose data ends up in the script text at
    /// `span`, either through interpolation or through tainted variables.
    pub(crate) fn sources_in(&self, span: &Range<usize>) -> Sources {
        let mut sources = Sources::new();

        for expr in &self.exprs {
            if expr.span.start >= span.start && expr.span.end <= span.end {
                sources.extend(expr.sources.iter().cloned());
            }
        }

        if let Some(shell) = &self.shell {
            for (name, used) in shell.variables_in(span) {
                let local = self
                    .locals
                    .iter()
                    .rev()
                    .find(|l| l.name == name && l.from <= used.start);

                match local {
                    Some(local) => sources.extend(local.sources.iter().cloned()),
                    None => {
                        if let Some(var) = self.env.iter().find(|v| v.name == name) {
                            sources.extend(var.sources.iter().cloned());
                        }
                    }
                }
            }
        }

        sources
    }

    /// Every name the script writes to an environment file, with the
    /// untrusted sources of the written value.
    pub(crate) fn env_file_writes(&self) -> Vec<(EnvFileWrite, Sources)> {
        let Some(shell) = &self.shell else {
            return vec![];
        };

        env_file_writes(&shell.emitted_lines())
            .into_iter()
            .map(|write| {
                let sources = self.sources_in(&write.span);
                (write, sources)
            })
            .collect()
    }
}

/// State for a single workflow visit.
///
/// Workflow-level state lives for the whole visit; job-level and
/// step-level state is replaced as the visit enters each job and step.
pub(crate) struct AnalysisContext<'doc> {
    workflow: &'doc Workflow,
    triggers: WorkflowTriggerSet<'doc>,
    effective: EffectiveTriggerSet<'doc>,
    job: Option<&'doc str>,
    step: Option<StepFacts<'doc>>,
    step_outputs: StepOutputTaint,
    job_outputs: JobOutputTaint,
}

impl<'doc> AnalysisContext<'doc> {
    pub(crate) fn new(workflow: &'doc Workflow) -> Self {
        let triggers = WorkflowTriggerSet::extract(workflow);
        let effective = triggers.all();

        Self {
            workflow,
            triggers,
            effective,
            job: None,
            step: None,
            step_outputs: StepOutputTaint::default(),
            job_outputs: JobOutputTaint::default(),
        }
    }

    /// The triggers that can reach the current job.
    pub(crate) fn effective(&self) -> &EffectiveTriggerSet<'doc> {
        &self.effective
    }

    pub(crate) fn has_privileged_trigger(&self) -> bool {
        self.effective.has_privileged_trigger()
    }

    pub(crate) fn has_unsafe_trigger(&self) -> bool {
        self.effective.has_unsafe_trigger()
    }

    /// Whether the workflow being visited is itself reusable.
    pub(crate) fn is_reusable(&self) -> bool {
        self.triggers.contains("workflow_call")
    }

    /// The facts for the step being visited.
    pub(crate) fn step(&self) -> Option<&StepFacts<'doc>> {
        self.step.as_ref()
    }

    /// Returns the untrusted sources that can flow into `expr`'s
    /// expansion: untrusted contexts, and step or job outputs that were
    /// previously recorded as tainted.
    pub(crate) fn untrusted_sources(&self, expr: &Expr) -> Sources {
        let mut sources = trust::untrusted_paths(expr)
            .into_iter()
            .map(str::to_string)
            .collect::<Sources>();

        for ctx in expr.dataflow_contexts() {
            let is = |idx, name: &str| ctx.segment(idx).is_some_and(|s| s.eq_ignore_ascii_case(name));
            if ctx.parts.len() != 4 || !is(2, "outputs") {
                continue;
            }

            let (Some(owner), Some(output)) = (ctx.segment(1), ctx.segment(3)) else {
                continue;
            };

            let found = if is(0, "steps") {
                self.job
                    .and_then(|job| self.step_outputs.is_tainted_expr(job, ctx.as_str()))
            } else if is(0, "needs") {
                self.job_outputs.lookup(owner, output)
            } else {
                None
            };

            if let Some(found) = found {
                sources.extend(found.iter().cloned());
            }
        }

        sources
    }

    /// Returns every expression in `text` with untrusted sources.
    pub(crate) fn tainted_exprs<'a>(&self, text: &'a str) -> Vec<(ExtractedExpr<'a>, Range<usize>, Sources)> {
        extract_expressions(text)
            .into_iter()
            .filter_map(|(expr, span)| {
                let sources = self.untrusted_sources(&expr.parse()?);
                (!sources.is_empty()).then_some((expr, span, sources))
            })
            .collect()
    }

    fn text_sources(&self, text: &str) -> Sources {
        self.tainted_exprs(text)
            .into_iter()
            .flat_map(|(_, _, sources)| sources)
            .collect()
    }

    /// Enters `job`, resetting per-job state.
    pub(crate) fn enter_job(&mut self, job: &Job<'doc>) {
        self.job = Some(job.id());
        self.step = None;
        self.effective = analyze_job_triggers(&self.triggers, job.guard());

        tracing::debug!(
            "job {id} reachable from [{triggers}]",
            id = job.id(),
            triggers = self.effective.names().collect::<Vec<_>>().join(", ")
        );
    }

    /// Enters `step`, computing its facts.
    pub(crate) fn enter_step(&mut self, step: &Step<'doc>) {
        let script = step.script();

        let shell = script
            .as_ref()
            .filter(|s| s.kind == ScriptKind::Shell)
            .and_then(|s| match ShellFacts::parse(s.body) {
                Ok(facts) => {
                    if facts.has_dangerous_pattern() {
                        tracing::debug!("step {idx} re-parses shell code", idx = step.index);
                    }
                    Some(facts)
                }
                Err(err) => {
                    tracing::warn!("couldn't parse script in step {idx}: {err:#}", idx = step.index);
                    None
                }
            });

        let exprs = script
            .as_ref()
            .map(|s| {
                self.tainted_exprs(s.body)
                    .into_iter()
                    .map(|(expr, span, sources)| TaintedExpr { expr, span, sources })
                    .collect()
            })
            .unwrap_or_default();

        let env = self.env_layers(step, |_, value| self.text_sources(value));
        let input_env = if self.is_reusable() {
            self.env_layers(step, |_, value| {
                super::reusable::input_refs(value)
                    .into_iter()
                    .map(|r| r.input.to_string())
                    .collect()
            })
        } else {
            vec![]
        };

        let mut facts = StepFacts {
            script,
            shell,
            exprs,
            env,
            locals: vec![],
            input_env,
        };
        facts.locals = Self::local_taint(&facts);

        self.step = Some(facts);
    }

    /// Shell variables assigned from tainted data, one hop from the
    /// source: an interpolated expression or a tainted `env:` variable.
    fn local_taint(facts: &StepFacts) -> Vec<LocalTaint> {
        let Some(shell) = &facts.shell else {
            return vec![];
        };

        shell
            .assignments()
            .into_iter()
            .filter_map(|assignment| {
                let mut sources = Sources::new();
                let mut via_env = false;

                for expr in &facts.exprs {
                    if expr.span.start >= assignment.value.start
                        && expr.span.end <= assignment.value.end
                    {
                        sources.extend(expr.sources.iter().cloned());
                    }
                }

                for (name, _) in shell.variables_in(&assignment.value) {
                    if let Some(var) = facts.env.iter().find(|v| v.name == name) {
                        sources.extend(var.sources.iter().cloned());
                        via_env = true;
                    }
                }

                (!sources.is_empty()).then_some(LocalTaint {
                    name: assignment.name,
                    from: assignment.value.end,
                    sources,
                    via_env,
                })
            })
            .collect()
    }

    /// Resolves the environment visible to `step` (workflow, then job,
    /// then step, with later layers overriding earlier ones), keeping the
    /// variables for which `sources_of` finds any sources.
    fn env_layers(
        &self,
        step: &Step<'doc>,
        sources_of: impl Fn(&str, &str) -> Sources,
    ) -> Vec<TaintedVariable<'doc>> {
        let job = step.job();
        let layers: [(&'doc Env, SymbolicLocation<'doc>); 3] = [
            (&self.workflow.env, self.workflow.location()),
            (&job.model().env, job.location()),
            (step.env(), step.location()),
        ];

        let mut vars: Vec<TaintedVariable<'doc>> = vec![];
        for (env, location) in layers {
            for (name, value) in env {
                vars.retain(|v| v.name != *name);

                let sources = value
                    .as_str()
                    .map(|value| sources_of(name, value))
                    .unwrap_or_default();
                if sources.is_empty() {
                    continue;
                }

                vars.push(TaintedVariable {
                    name: name.clone(),
                    sources,
                    location: Some(location.with_keys(&["env".into(), name.as_str().into()])),
                });
            }
        }

        vars
    }

    /// Folds the current step's `$GITHUB_OUTPUT` writes into the step
    /// output table. Steps without an `id:` can't be referenced, so they
    /// contribute nothing.
    pub(crate) fn record_step(&mut self, step: &Step<'doc>) {
        let (Some(job), Some(id)) = (self.job, step.id()) else {
            return;
        };
        let Some(facts) = &self.step else {
            return;
        };

        let outputs = facts
            .env_file_writes()
            .into_iter()
            .filter(|(w, _)| w.file == EnvFile::Output)
            .map(|(w, sources)| (w.name, sources))
            .collect::<Vec<_>>();

        for (name, sources) in outputs {
            if !sources.is_empty() {
                tracing::debug!("steps.{id}.outputs.{name} is tainted");
            }
            self.step_outputs.record(job, id, &name, sources);
        }
    }

    /// Records the job's `outputs:` once all of its steps have been seen.
    pub(crate) fn record_job_outputs(&mut self, job: &NormalJob<'doc>) {
        let outputs = job
            .model()
            .outputs
            .iter()
            .map(|(name, value)| (name, self.text_sources(value)))
            .collect::<Vec<_>>();

        for (name, sources) in outputs {
            self.job_outputs.record(job.id(), name, sources);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AnalysisContext;
    use crate::{
        models::workflow::{Job, Workflow},
        registry::input::InputKey,
    };

    fn workflow(src: &str) -> Workflow {
        Workflow::from_string(src.into(), InputKey::local("ci.yml", None).unwrap()).unwrap()
    }

    /// Visits every step, the way the engine does, returning the context.
    fn visit(wf: &Workflow) -> AnalysisContext<'_> {
        let mut cx = AnalysisContext::new(wf);
        for job in wf.jobs() {
            cx.enter_job(&job);
            if let Job::NormalJob(normal) = &job {
                for step in normal.steps() {
                    cx.enter_step(&step);
                    cx.record_step(&step);
                }
                cx.record_job_outputs(normal);
            }
        }
        cx
    }

    #[test]
    fn test_step_outputs() {
        let wf = workflow(
            r#"on: pull_request_target
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - id: direct
        run: echo "title=${{ github.event.pull_request.title }}" >> "$GITHUB_OUTPUT"
      - id: indirect
        run: |
          REF="${{ github.event.pull_request.head.ref }}"
          echo "ref=$REF" >> "$GITHUB_OUTPUT"
      - id: static
        run: echo "sha=${{ github.sha }}" >> "$GITHUB_OUTPUT"
      - run: echo "anon=${{ github.event.pull_request.title }}" >> "$GITHUB_OUTPUT"
      - id: action
        uses: actions/github-script@v7
        with:
          script: core.setOutput('x', '${{ github.event.pull_request.title }}')
"#,
        );
        let cx = visit(&wf);
        let table = &cx.step_outputs;

        assert!(table.lookup("build", "direct", "title").is_some());
        assert_eq!(
            table
                .lookup("build", "indirect", "ref")
                .unwrap()
                .iter()
                .collect::<Vec<_>>(),
            ["github.event.pull_request.head.ref"]
        );
        assert!(table.lookup("build", "static", "sha").is_none());
        assert!(table.lookup("build", "action", "x").is_none());
        assert!(table.is_tainted_expr("build", "steps.direct.outputs.title").is_some());

        // The step without an `id:` writes a tainted output but can't be
        // referenced, so nothing is recorded for it.
        assert!(table.lookup("build", "", "anon").is_none());
        assert_eq!(
            table.table["build"].keys().collect::<Vec<_>>(),
            ["direct", "indirect"]
        );
    }

    #[test]
    fn test_untrusted_sources_through_outputs() {
        let wf = workflow(
            r#"on: issues
jobs:
  meta:
    runs-on: ubuntu-latest
    outputs:
      title: ${{ steps.meta.outputs.title }}
      fixed: constant
    steps:
      - id: meta
        run: |
          cat <<EOF >> "$GITHUB_OUTPUT"
          title<<DELIM
          ${{ github.event.issue.title }}
          DELIM
          EOF
  use:
    needs: meta
    runs-on: ubuntu-latest
    steps:
      - run: echo "${{ needs.meta.outputs.title }} ${{ needs.meta.outputs.fixed }}"
"#,
        );
        let mut cx = AnalysisContext::new(&wf);

        let jobs = wf.jobs().collect::<Vec<_>>();
        let Job::NormalJob(meta) = &jobs[0] else {
            panic!("expected a normal job");
        };
        cx.enter_job(&jobs[0]);
        for step in meta.steps() {
            cx.enter_step(&step);
            cx.record_step(&step);
        }
        cx.record_job_outputs(meta);

        let Job::NormalJob(user) = &jobs[1] else {
            panic!("expected a normal job");
        };
        cx.enter_job(&jobs[1]);
        let step = user.steps().next().unwrap();
        cx.enter_step(&step);

        let facts = cx.step().unwrap();
        assert_eq!(facts.exprs.len(), 1);
        assert_eq!(
            facts.exprs[0].sources.iter().collect::<Vec<_>>(),
            ["github.event.issue.title"]
        );
    }

    #[test]
    fn test_env_layers() {
        let wf = workflow(
            r#"on: pull_request_target
env:
  TITLE: ${{ github.event.pull_request.title }}
  BODY: ${{ github.event.pull_request.body }}
jobs:
  build:
    runs-on: ubuntu-latest
    env:
      BODY: safe
    steps:
      - env:
          REF: ${{ github.head_ref }}
        run: |
          COPY=$REF
          echo "$COPY"
"#,
        );
        let mut cx = AnalysisContext::new(&wf);
        let job = wf.jobs().next().unwrap();
        cx.enter_job(&job);
        let Job::NormalJob(normal) = &job else {
            panic!("expected a normal job");
        };
        let step = normal.steps().next().unwrap();
        cx.enter_step(&step);

        let facts = cx.step().unwrap();
        assert_eq!(
            facts.env.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(),
            ["TITLE", "REF"]
        );
        assert_eq!(facts.locals.len(), 1);
        assert_eq!(facts.locals[0].name, "COPY");
        assert!(facts.locals[0].via_env);
        assert!(facts.input_env.is_empty());
    }

    #[test]
    fn test_effective_set_resets_per_job() {
        let wf = workflow(
            r#"on: [pull_request, pull_request_target]
jobs:
  safe:
    if: github.event_name == 'pull_request'
    runs-on: ubuntu-latest
    steps:
      - run: echo hi
  unsafe:
    runs-on: ubuntu-latest
    steps:
      - run: echo hi
"#,
        );
        let mut cx = AnalysisContext::new(&wf);
        let jobs = wf.jobs().collect::<Vec<_>>();

        cx.enter_job(&jobs[0]);
        assert!(!cx.has_privileged_trigger());

        cx.enter_job(&jobs[1]);
        assert!(cx.has_privileged_trigger());
    }
}
