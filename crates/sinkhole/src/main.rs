#![warn(clippy::all, clippy::dbg_macro)]

use std::{
    io::{Write, stdout},
    process::ExitCode,
    sync::Mutex,
};

use annotate_snippets::{Group, Level, Renderer};
use anstream::{eprintln, stream::IsTerminal};
use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use clap_verbosity_flag::InfoLevel;
use config::Config;
use finding::{Confidence, Severity};
use ignore::WalkBuilder;
use indicatif::ProgressStyle;
use owo_colors::OwoColorize;
use registry::{
    AuditRegistry, FindingRegistry,
    input::{InputKey, InputRegistry},
};
use tracing::{Span, instrument};
use tracing_indicatif::{IndicatifLayer, span_ext::IndicatifSpanExt};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

mod audit;
mod config;
mod engine;
mod finding;
mod models;
mod output;
mod registry;
mod utils;

/// Finds attacker-controlled data flowing into dangerous places in
/// GitHub Actions workflows.
#[derive(Parser)]
#[command(about, version)]
struct App {
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity<InfoLevel>,

    /// Never draw a progress bar.
    #[arg(long)]
    no_progress: bool,

    /// How findings are printed.
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,

    /// When to use color. Without this flag, `NO_COLOR`, `FORCE_COLOR`
    /// and `CLICOLOR_FORCE` are honored.
    #[arg(long, value_enum, value_name = "MODE")]
    color: Option<ColorMode>,

    /// The configuration file to load. By default, a config is
    /// discovered relative to the first input.
    #[arg(short, long, env = "SINKHOLE_CONFIG", group = "conf")]
    config: Option<Utf8PathBuf>,

    /// Run every rule with no ignores, even if a config file exists.
    #[arg(long, group = "conf")]
    no_config: bool,

    /// Exit 0 even when there are findings. Fatal errors still exit 1.
    #[arg(long)]
    no_exit_codes: bool,

    /// Drop findings below this severity.
    #[arg(long)]
    min_severity: Option<Severity>,

    /// Drop findings below this confidence.
    #[arg(long)]
    min_confidence: Option<Confidence>,

    /// Fail instead of warning on invalid workflows among the collected
    /// inputs.
    #[arg(long)]
    strict_collection: bool,

    /// Print a completion script for SHELL and exit.
    #[arg(long, value_enum, value_name = "SHELL", exclusive = true)]
    completions: Option<Shell>,

    /// Workflow files or directories.
    ///
    /// Directories are searched for `.github/workflows/*.yml`, honoring
    /// `.gitignore` files.
    #[arg(required = true)]
    inputs: Vec<String>,
}

#[derive(Debug, Default, Copy, Clone, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Annotated source snippets, one per finding.
    #[default]
    Plain,
    /// JSON-formatted output, including any fixes as edit operations.
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum ColorMode {
    /// Color when writing to a terminal.
    Auto,
    /// Always color.
    Always,
    /// Never color.
    Never,
}

impl ColorMode {
    /// Picks the mode when `--color` is absent. `NO_COLOR` beats
    /// `FORCE_COLOR` and `CLICOLOR_FORCE`; otherwise it's left to the
    /// terminal.
    fn from_env(is_set: impl Fn(&str) -> bool) -> Self {
        match (is_set("NO_COLOR"), is_set("FORCE_COLOR") || is_set("CLICOLOR_FORCE")) {
            (true, _) => ColorMode::Never,
            (false, true) => ColorMode::Always,
            (false, false) => ColorMode::Auto,
        }
    }

    /// Diagnostics go through a type-erased writer, so `Auto` has to be
    /// settled against stderr up front.
    fn stderr_choice(self) -> anstream::ColorChoice {
        match self {
            ColorMode::Auto if std::io::stderr().is_terminal() => anstream::ColorChoice::Always,
            ColorMode::Auto => anstream::ColorChoice::Never,
            mode => mode.into(),
        }
    }
}

impl From<ColorMode> for anstream::ColorChoice {
    fn from(value: ColorMode) -> Self {
        match value {
            ColorMode::Auto => Self::Auto,
            ColorMode::Always => Self::Always,
            ColorMode::Never => Self::Never,
        }
    }
}

pub(crate) fn tips(err: impl AsRef<str>, tips: &[impl AsRef<str>]) -> String {
    let mut group = Group::with_title(Level::ERROR.primary_title(err.as_ref()));
    for tip in tips {
        group = group.element(Level::NOTE.message(tip.as_ref()));
    }

    let renderer = Renderer::styled();
    renderer.render(&[group])
}

#[instrument(skip(registry))]
fn collect_from_dir(input_path: &Utf8Path, registry: &mut InputRegistry) -> Result<()> {
    // `.gitignore` and friends are honored even without a `.git/`,
    // since source archives typically don't have one.
    let mut walker = WalkBuilder::new(input_path);
    walker
        .standard_filters(false)
        .require_git(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true);

    for entry in walker.build() {
        let entry = entry?;
        let entry = <&Utf8Path>::try_from(entry.path())?;

        if entry.is_file()
            && matches!(entry.extension(), Some("yml" | "yaml"))
            && entry
                .parent()
                .is_some_and(|dir| dir.ends_with(".github/workflows"))
        {
            let key = InputKey::local(entry, Some(input_path))?;
            let contents = std::fs::read_to_string(entry)?;
            registry.register(contents, key)?;
        }
    }

    Ok(())
}

#[instrument(skip_all)]
fn collect_inputs(inputs: &[String], strict: bool) -> Result<InputRegistry> {
    let mut registry = InputRegistry::new(strict);

    for input in inputs {
        let input_path = Utf8Path::new(input);
        if input_path.is_file() {
            if !matches!(input_path.extension(), Some("yml" | "yaml")) {
                return Err(anyhow!(tips(
                    format!("invalid input: {input}"),
                    &["inputs must be workflow files (.yml or .yaml) or directories"]
                )));
            }

            // When collecting individual files, we don't know which part
            // of the input path is the prefix.
            let key = InputKey::local(input_path, None)?;
            let contents = std::fs::read_to_string(input_path)
                .with_context(|| format!("couldn't read {input}"))?;
            registry.register(contents, key)?;
        } else if input_path.is_dir() {
            collect_from_dir(input_path, &mut registry)?;
        } else {
            return Err(anyhow!(tips(
                format!("invalid input: {input}"),
                &[format!(
                    "pass a workflow {file} or a {directory} containing .github/workflows/",
                    file = "file".green(),
                    directory = "directory".green(),
                )]
            )));
        }
    }

    if registry.len() == 0 {
        return Err(anyhow!("no inputs collected"));
    }

    Ok(registry)
}

fn completions<G: clap_complete::Generator>(generator: G, cmd: &mut clap::Command) {
    clap_complete::generate(
        generator,
        cmd,
        cmd.get_name().to_string(),
        &mut std::io::stdout(),
    );
}

/// Installs the log subscriber. Progress bars are skipped without color,
/// since `anstream` strips the line control they draw with.
fn init_tracing(app: &App, color_mode: ColorMode) -> Result<()> {
    let progress = IndicatifLayer::new();
    let writer = Mutex::new(anstream::AutoStream::new(
        Box::new(progress.get_stderr_writer()) as Box<dyn Write + Send>,
        color_mode.stderr_choice(),
    ));
    let show_progress = !app.no_progress && !matches!(color_mode, ColorMode::Never);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(writer),
        )
        .with(
            EnvFilter::builder()
                .with_default_directive(app.verbose.tracing_level_filter().into())
                .from_env()?,
        )
        .with(show_progress.then_some(progress))
        .init();

    Ok(())
}

/// Runs every enabled rule over every collected workflow, ticking the
/// progress bar once per workflow.
#[instrument(name = "audit", skip_all)]
fn audit_inputs<'doc>(
    inputs: &'doc InputRegistry,
    audits: &AuditRegistry,
    results: &mut FindingRegistry<'doc>,
) -> Result<()> {
    let span = Span::current();
    span.pb_set_length(inputs.len() as u64);
    span.pb_set_style(&ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:!30.cyan/blue} {msg}",
    )?);

    for (key, input) in inputs.iter_inputs() {
        span.pb_set_message(key.relative_path());
        tracing::debug!("running {n} audits on {key}", n = audits.len());

        let findings = audits
            .audit(input)
            .with_context(|| format!("audit failed on {input}", input = key.filename()))?;
        results.extend(findings);
        span.pb_inc(1);

        tracing::info!(
            "{completed} {input}",
            completed = "completed".green(),
            input = key.presentation_path()
        );
    }

    Ok(())
}

fn run() -> Result<ExitCode> {
    human_panic::setup_panic!();

    let app = App::parse();

    if let Some(shell) = app.completions {
        let mut cmd = App::command();
        completions(shell, &mut cmd);
        return Ok(ExitCode::SUCCESS);
    }

    let color_mode = app
        .color
        .unwrap_or_else(|| ColorMode::from_env(|var| std::env::var_os(var).is_some()));
    anstream::ColorChoice::write_global(color_mode.into());
    init_tracing(&app, color_mode)?;

    let config = Config::new(&app).map_err(|e| {
        anyhow!(tips(
            format!("failed to load config: {e:#}"),
            &[
                "check your configuration file for errors",
                "see: https://sinkhole.dev/configuration/"
            ]
        ))
    })?;

    for ident in config.unknown_rules(&AuditRegistry::known_idents()) {
        tracing::warn!("configuration mentions unknown rule `{ident}`");
    }

    let registry = collect_inputs(&app.inputs, app.strict_collection)?;
    let audit_registry = AuditRegistry::default_audits(&config);

    let mut results = FindingRegistry::new(app.min_severity, app.min_confidence, &config);
    audit_inputs(&registry, &audit_registry, &mut results)?;

    match app.format {
        OutputFormat::Plain => output::plain::render_findings(&registry, &results),
        OutputFormat::Json => output::json::output(stdout(), results.findings())?,
    };

    if app.no_exit_codes {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(results.exit_code())
    }
}

fn main() -> ExitCode {
    // Returning an ExitCode (rather than calling `process::exit`) lets
    // destructors run before we exit.
    match run() {
        Ok(exit) => exit,
        Err(err) => {
            eprintln!(
                "{fatal}: no audit was performed",
                fatal = "fatal".red().bold()
            );
            eprintln!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ColorMode;

    #[test]
    fn test_color_mode_from_env() {
        for (set, expected) in [
            (&[][..], ColorMode::Auto),
            (&["NO_COLOR"][..], ColorMode::Never),
            (&["FORCE_COLOR"][..], ColorMode::Always),
            (&["CLICOLOR_FORCE"][..], ColorMode::Always),
            (&["NO_COLOR", "FORCE_COLOR"][..], ColorMode::Never),
        ] {
            assert_eq!(ColorMode::from_env(|var| set.contains(&var)), expected);
        }
    }
}
