//! Syntactic facts about `run:` scripts.
//!
//! Scripts are parsed with tree-sitter-bash after every `${{ ... }}`
//! expression has been masked out with a run of `%` of the same byte
//! length. Masking keeps spans aligned with the original script while
//! stopping expression syntax (`'`, `}`, `||`) from confusing the parser.

use std::{collections::HashSet, fmt, ops::Range};

use anyhow::Context as _;
use tree_sitter::{Node, Parser, Tree};

use crate::utils::extract_expressions;

/// Commands that run their arguments through a fresh shell parse.
const NESTED_SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];

/// Prefix commands that run the rest of their arguments as a command.
const WRAPPERS: &[&str] = &["sudo", "exec", "command", "env", "time", "nohup"];

/// Nodes at which an upward search for quoting stops.
const QUOTE_BOUNDARIES: &[&str] = &[
    "command",
    "declaration_command",
    "redirected_statement",
    "pipeline",
    "list",
    "subshell",
    "compound_statement",
    "command_substitution",
    "process_substitution",
    "test_command",
    "file_redirect",
    "program",
];

/// A construct that re-parses its input as shell code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DangerousPattern {
    Eval,
    NestedShell,
    CommandSubstitution,
}

impl fmt::Display for DangerousPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DangerousPattern::Eval => "eval",
            DangerousPattern::NestedShell => "nested shell invocation",
            DangerousPattern::CommandSubstitution => "command substitution",
        })
    }
}

/// How a variable (or an interpolated expression) is used at one
/// position in a script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Usage {
    pub(crate) span: Range<usize>,
    /// Whether the shell will not word-split the value here: inside
    /// double quotes, in a heredoc body, or on the right-hand side of an
    /// assignment.
    pub(crate) quoted: bool,
    pub(crate) in_eval: bool,
    pub(crate) in_shell_cmd: bool,
    pub(crate) in_cmd_subst: bool,
}

/// A `NAME=value` assignment in a script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Assignment {
    pub(crate) name: String,
    pub(crate) value: Range<usize>,
}

/// A simple command, after stripping wrappers like `sudo`.
#[derive(Clone, Debug)]
pub(crate) struct Command<'a> {
    pub(crate) name: &'a str,
    pub(crate) span: Range<usize>,
    pub(crate) args: Vec<(Range<usize>, &'a str)>,
}

impl Command<'_> {
    /// Whether an `--` end-of-options marker appears before `offset`.
    pub(crate) fn ends_options_before(&self, offset: usize) -> bool {
        self.args
            .iter()
            .any(|(span, text)| *text == "--" && span.end <= offset)
    }

    /// Returns the argument that begins with the text at `offset`,
    /// ignoring a leading quote.
    pub(crate) fn arg_starting_at(&self, offset: usize) -> Option<&Range<usize>> {
        self.args.iter().map(|(span, _)| span).find(|span| {
            span.start == offset || (span.start + 1 == offset && span.len() > 1)
        })
    }
}

/// One of the environment files a step can write to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum EnvFile {
    /// `$GITHUB_OUTPUT`, the step's outputs.
    Output,
    /// `$GITHUB_ENV`, the environment of every later step in the job.
    Env,
}

impl EnvFile {
    fn targeted_by(text: &str) -> Option<Self> {
        if text.contains("GITHUB_OUTPUT") {
            Some(EnvFile::Output)
        } else if text.contains("GITHUB_ENV") {
            Some(EnvFile::Env)
        } else {
            None
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            EnvFile::Output => "GITHUB_OUTPUT",
            EnvFile::Env => "GITHUB_ENV",
        }
    }
}

/// A line of text a script appends to an [`EnvFile`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EmittedLine {
    pub(crate) file: EnvFile,
    /// The line as the file will receive it, modulo shell expansion.
    pub(crate) text: String,
    /// The script span whose expansions end up in the line.
    pub(crate) span: Range<usize>,
}

/// Replaces every `${{ ... }}` in `script` with `%` of the same byte length.
fn mask_expressions(script: &str) -> String {
    let mut masked = String::with_capacity(script.len());
    let mut last = 0;

    for (_, span) in extract_expressions(script) {
        masked.push_str(&script[last..span.start]);
        masked.extend(std::iter::repeat_n('%', span.len()));
        last = span.end;
    }
    masked.push_str(&script[last..]);

    masked
}

fn strip_quotes(span: Range<usize>, text: &str) -> Range<usize> {
    let quoted = text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')));

    if quoted {
        span.start + 1..span.end - 1
    } else {
        span
    }
}

pub(crate) struct ShellFacts {
    original: String,
    masked: String,
    tree: Tree,
}

impl ShellFacts {
    /// Parses a script.
    pub(crate) fn parse(script: &str) -> anyhow::Result<Self> {
        let masked = mask_expressions(script);

        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_bash::LANGUAGE.into())
            .context("failed to load bash parser")?;
        let tree = parser
            .parse(&masked, None)
            .context("failed to parse `run:` body as bash")?;

        Ok(Self {
            original: script.into(),
            masked,
            tree,
        })
    }

    /// The script, as given to [`ShellFacts::parse`].
    pub(crate) fn script(&self) -> &str {
        &self.original
    }

    fn text(&self, node: Node) -> &str {
        self.masked.get(node.byte_range()).unwrap_or_default()
    }

    /// All named nodes, in document order.
    fn nodes(&self) -> Vec<Node<'_>> {
        let mut out = vec![];
        let mut stack = vec![self.tree.root_node()];

        while let Some(node) = stack.pop() {
            out.push(node);
            let children = node.named_children(&mut node.walk()).collect::<Vec<_>>();
            stack.extend(children.into_iter().rev());
        }

        out
    }

    /// Resolves a `command` node into its effective command.
    fn command<'a>(&'a self, node: Node<'a>) -> Option<Command<'a>> {
        let name = node.child_by_field_name("name")?;

        let mut words = std::iter::once((name.byte_range(), self.text(name)))
            .chain(
                node.children_by_field_name("argument", &mut node.walk())
                    .map(|arg| (arg.byte_range(), self.text(arg))),
            )
            .collect::<Vec<_>>();

        // `sudo -E git ...` runs `git`.
        while let Some((_, head)) = words.first() {
            if !WRAPPERS.contains(head) {
                break;
            }

            words.remove(0);
            while words
                .first()
                .is_some_and(|(_, w)| w.starts_with('-') || w.contains('='))
            {
                words.remove(0);
            }
        }

        if words.is_empty() {
            return None;
        }
        let (_, name) = words.remove(0);

        Some(Command {
            name: name.rsplit('/').next().unwrap_or(name),
            span: node.byte_range(),
            args: words,
        })
    }

    fn dangerous_pattern_of(&self, node: Node) -> Option<DangerousPattern> {
        match node.kind() {
            "command_substitution" | "process_substitution" => {
                Some(DangerousPattern::CommandSubstitution)
            }
            "command" => {
                let cmd = self.command(node)?;
                if cmd.name == "eval" {
                    Some(DangerousPattern::Eval)
                } else if NESTED_SHELLS.contains(&cmd.name)
                    && cmd.args.iter().any(|(_, a)| {
                        a.starts_with('-') && !a.starts_with("--") && a.contains('c')
                    })
                {
                    Some(DangerousPattern::NestedShell)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn usage_of(&self, node: Node) -> Usage {
        let mut usage = Usage {
            span: node.byte_range(),
            quoted: false,
            in_eval: false,
            in_shell_cmd: false,
            in_cmd_subst: false,
        };

        let mut quoting_settled = false;
        let mut cur = Some(node);
        while let Some(n) = cur {
            if !quoting_settled {
                match n.kind() {
                    "string" | "heredoc_body" | "variable_assignment" => {
                        usage.quoted = true;
                        quoting_settled = true;
                    }
                    kind if QUOTE_BOUNDARIES.contains(&kind) => quoting_settled = true,
                    _ => {}
                }
            }

            match self.dangerous_pattern_of(n) {
                Some(DangerousPattern::Eval) => usage.in_eval = true,
                Some(DangerousPattern::NestedShell) => usage.in_shell_cmd = true,
                Some(DangerousPattern::CommandSubstitution) => usage.in_cmd_subst = true,
                None => {}
            }

            cur = n.parent();
        }

        usage
    }

    fn expansions(&self) -> impl Iterator<Item = (Node<'_>, &str)> {
        self.nodes().into_iter().filter_map(move |node| {
            if !matches!(node.kind(), "simple_expansion" | "expansion") {
                return None;
            }

            let var = node
                .named_children(&mut node.walk())
                .find(|c| c.kind() == "variable_name")?;
            Some((node, self.text(var)))
        })
    }

    /// Returns every usage of `$name` / `${name}` in the script.
    pub(crate) fn find_usages(&self, name: &str) -> Vec<Usage> {
        self.expansions()
            .filter(|(_, var)| *var == name)
            .map(|(node, _)| self.usage_of(node))
            .collect()
    }

    /// Returns the variables expanded within `span`, with their spans.
    pub(crate) fn variables_in(&self, span: &Range<usize>) -> Vec<(&str, Range<usize>)> {
        self.expansions()
            .map(|(node, var)| (var, node.byte_range()))
            .filter(|(_, r)| r.start >= span.start && r.end <= span.end)
            .collect()
    }

    /// Describes the position of an interpolated expression at `span`.
    pub(crate) fn interpolation(&self, span: &Range<usize>) -> Option<Usage> {
        let node = self
            .tree
            .root_node()
            .descendant_for_byte_range(span.start, span.end)?;

        Some(Usage {
            span: span.clone(),
            ..self.usage_of(node)
        })
    }

    /// Whether the script uses any construct that re-parses shell code.
    pub(crate) fn has_dangerous_pattern(&self) -> bool {
        self.dangerous_pattern_type().is_some()
    }

    /// The first construct in the script that re-parses shell code.
    pub(crate) fn dangerous_pattern_type(&self) -> Option<DangerousPattern> {
        self.nodes()
            .into_iter()
            .find_map(|n| self.dangerous_pattern_of(n))
    }

    /// Returns every variable assignment in the script, in order.
    pub(crate) fn assignments(&self) -> Vec<Assignment> {
        self.nodes()
            .into_iter()
            .filter(|n| n.kind() == "variable_assignment")
            .filter_map(|n| {
                let name = n.child_by_field_name("name")?;
                let value = n.child_by_field_name("value")?;
                Some(Assignment {
                    name: self.text(name).into(),
                    value: value.byte_range(),
                })
            })
            .collect()
    }

    /// Returns every simple command in the script, in order.
    pub(crate) fn commands(&self) -> Vec<Command<'_>> {
        self.nodes()
            .into_iter()
            .filter(|n| n.kind() == "command")
            .filter_map(|n| self.command(n))
            .collect()
    }

    /// Returns the innermost command whose arguments include `offset`.
    pub(crate) fn command_at(&self, offset: usize) -> Option<Command<'_>> {
        self.commands()
            .into_iter()
            .filter(|c| c.args.iter().any(|(span, _)| span.contains(&offset)))
            .min_by_key(|c| c.span.len())
    }

    /// Returns every line the script writes to `$GITHUB_OUTPUT` or
    /// `$GITHUB_ENV`, in order.
    ///
    /// Recognized writers are `echo` and `printf`, and heredocs fed to
    /// `cat`, whether redirected directly (`>> "$GITHUB_OUTPUT"`), as a
    /// `{ ...; } >>` group, or piped through `tee`.
    pub(crate) fn emitted_lines(&self) -> Vec<EmittedLine> {
        let mut lines = vec![];
        let mut seen = HashSet::new();

        for node in self.nodes() {
            match node.kind() {
                "file_redirect" => {
                    let text = self.text(node);
                    let Some(file) = EnvFile::targeted_by(text).filter(|_| text.contains('>'))
                    else {
                        continue;
                    };

                    let mut owner = node.parent();
                    while let Some(n) = owner {
                        if matches!(n.kind(), "command" | "redirected_statement") {
                            break;
                        }
                        owner = n.parent();
                    }

                    if let Some(owner) = owner
                        && seen.insert((owner.id(), file))
                    {
                        self.emit(owner, file, &mut lines);
                    }
                }
                "pipeline" => {
                    let stages = node.named_children(&mut node.walk()).collect::<Vec<_>>();
                    let Some((last, writers)) = stages.split_last() else {
                        continue;
                    };

                    let Some(file) = self
                        .command(*last)
                        .filter(|c| c.name == "tee")
                        .and_then(|c| c.args.iter().find_map(|(_, a)| EnvFile::targeted_by(a)))
                    else {
                        continue;
                    };

                    for writer in writers {
                        if seen.insert((writer.id(), file)) {
                            self.emit(*writer, file, &mut lines);
                        }
                    }
                }
                _ => {}
            }
        }

        lines.sort_by_key(|l| l.span.start);
        lines
    }

    fn emit(&self, node: Node, file: EnvFile, out: &mut Vec<EmittedLine>) {
        match node.kind() {
            "command" => self.emit_command(node, file, out),
            "heredoc_body" => self.emit_heredoc(node, file, out),
            _ => {
                for child in node.named_children(&mut node.walk()) {
                    self.emit(child, file, out);
                }
            }
        }
    }

    fn emit_command(&self, node: Node, file: EnvFile, out: &mut Vec<EmittedLine>) {
        let Some(cmd) = self.command(node) else {
            return;
        };

        let mut line = |text: &str, span: Range<usize>| {
            if !text.is_empty() {
                out.push(EmittedLine {
                    file,
                    text: text.into(),
                    span,
                });
            }
        };

        match cmd.name {
            "echo" => {
                let mut args = cmd.args.as_slice();
                let mut escapes = false;
                while let Some(((_, flag), rest)) = args.split_first()
                    && flag.len() > 1
                    && flag.starts_with('-')
                    && flag[1..].chars().all(|c| matches!(c, 'n' | 'e' | 'E'))
                {
                    escapes |= flag.contains('e');
                    args = rest;
                }

                let (Some((first, first_text)), Some((last, last_text))) =
                    (args.first(), args.last())
                else {
                    return;
                };

                let start = strip_quotes(first.clone(), first_text).start;
                let end = strip_quotes(last.clone(), last_text).end;
                let Some(text) = self.original.get(start..end) else {
                    return;
                };

                if escapes {
                    let mut offset = start;
                    for piece in text.split("\\n") {
                        line(piece, offset..offset + piece.len());
                        offset += piece.len() + 2;
                    }
                } else {
                    line(text, start..end);
                }
            }
            "printf" => {
                let Some(((fmt, fmt_text), rest)) = cmd.args.split_first() else {
                    return;
                };
                let fmt = strip_quotes(fmt.clone(), fmt_text);
                let Some(text) = self.original.get(fmt.clone()) else {
                    return;
                };
                let args_end = rest.last().map_or(fmt.end, |(span, _)| span.end);
                let mut args = rest.iter();

                let mut offset = fmt.start;
                for piece in text.split("\\n") {
                    let directives = piece.replace("%%", "").matches('%').count();
                    let taken = args.by_ref().take(directives).collect::<Vec<_>>();

                    // A piece of nothing but `%s` prints its arguments verbatim.
                    if directives > 0
                        && piece.replace("%s", "").is_empty()
                        && let (Some((first, first_text)), Some((last, last_text))) =
                            (taken.first(), taken.last())
                    {
                        let start = strip_quotes(first.clone(), first_text).start;
                        let end = strip_quotes(last.clone(), last_text).end;
                        if let Some(text) = self.original.get(start..end) {
                            line(text, start..end);
                        }
                    } else {
                        // Format directives pull in the trailing arguments.
                        let end = if directives > 0 {
                            args_end
                        } else {
                            offset + piece.len()
                        };
                        line(piece, offset..end);
                    }
                    offset += piece.len() + 2;
                }
            }
            _ => {}
        }
    }

    fn emit_heredoc(&self, node: Node, file: EnvFile, out: &mut Vec<EmittedLine>) {
        let range = node.byte_range();
        let Some(body) = self.original.get(range.clone()) else {
            return;
        };

        let mut offset = range.start;
        for raw in body.split_inclusive('\n') {
            let content = raw.trim_end_matches(['\n', '\r']);
            let text = content.trim_start_matches('\t');
            let lead = content.len() - text.len();

            if !text.is_empty() {
                out.push(EmittedLine {
                    file,
                    text: text.into(),
                    span: offset + lead..offset + content.len(),
                });
            }
            offset += raw.len();
        }
    }
}
