use std::{env::current_dir, sync::LazyLock};

use anyhow::Result;
use assert_cmd::{Command, cargo};
use camino::Utf8PathBuf;

static TEST_PREFIX: LazyLock<Utf8PathBuf> = LazyLock::new(|| {
    let current_dir = current_dir().expect("Cannot figure out current directory");

    let file_path = current_dir
        .join("tests")
        .join("integration")
        .join("test-data");

    if !file_path.exists() {
        panic!("Cannot find test data directory: {}", file_path.display());
    }

    Utf8PathBuf::try_from(file_path).expect("Cannot create UTF-8 path from test data directory")
});

pub fn input_under_test(name: &str) -> String {
    let file_path = TEST_PREFIX.join(name);

    if !file_path.exists() {
        panic!("Cannot find input under test: {file_path}");
    }

    file_path.to_string()
}

/// The result of a single `sinkhole` run.
pub struct Run {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

pub struct Sinkhole {
    cmd: Command,
    inputs: Vec<String>,
    config: Option<String>,
    no_config: bool,
    expects_failure: bool,
}

impl Sinkhole {
    /// Create a new sinkhole runner.
    pub fn new() -> Self {
        let mut cmd = Command::new(cargo::cargo_bin!());

        // Our child process starts with a clean environment, so that
        // `SINKHOLE_CONFIG` and `RUST_LOG` from the outer environment
        // don't leak into the tests.
        cmd.env_clear();

        Self {
            cmd,
            inputs: vec![],
            config: None,
            // Discovery walks up from the input, so by default tests
            // shouldn't pick up whatever config the checkout has.
            no_config: true,
            expects_failure: false,
        }
    }

    pub fn args<'a>(mut self, args: impl IntoIterator<Item = &'a str>) -> Self {
        self.cmd.args(args);
        self
    }

    pub fn setenv(mut self, key: &str, value: &str) -> Self {
        self.cmd.env(key, value);
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self.no_config = false;
        self
    }

    pub fn no_config(mut self, flag: bool) -> Self {
        self.no_config = flag;
        self
    }

    pub fn expects_failure(mut self, flag: bool) -> Self {
        self.expects_failure = flag;
        self
    }

    /// Runs sinkhole, returning its raw output with paths normalized.
    pub fn output(mut self) -> Result<Run> {
        if self.no_config && self.config.is_some() {
            anyhow::bail!("API misuse: cannot set both --no-config and --config");
        }

        if self.no_config {
            self.cmd.arg("--no-config");
        }

        if let Some(config) = &self.config {
            self.cmd.arg("--config").arg(config);
        }

        // Progress bars need a terminal, which tests never have.
        self.cmd.arg("--no-progress");

        for input in &self.inputs {
            self.cmd.arg(input);
        }

        let output = self.cmd.output()?;
        let code = output.status.code();

        // 1 is a fatal error and 101 is Rust's panic exit code; findings
        // exit with 11 and up.
        let is_failure = matches!(code, Some(1 | 2 | 101));
        let normalize = |raw: Vec<u8>| -> Result<String> {
            let mut raw = String::from_utf8(raw)?;
            for input in &self.inputs {
                raw = raw.replace(input, "@@INPUT@@");
            }
            Ok(raw.replace(TEST_PREFIX.as_str(), "@@TEST_PREFIX@@"))
        };

        let run = Run {
            stdout: normalize(output.stdout)?,
            stderr: normalize(output.stderr)?,
            code,
        };

        if is_failure != self.expects_failure {
            anyhow::bail!(
                "sinkhole exited with unexpected code {code:?}: {stderr}",
                stderr = run.stderr
            );
        }

        Ok(run)
    }

    /// Runs sinkhole in plain mode, returning stdout.
    pub fn run(self) -> Result<String> {
        Ok(self.output()?.stdout)
    }

    /// Runs sinkhole in JSON mode, returning one line per finding:
    /// its ident, the 1-based position of its primary location and
    /// the text there.
    pub fn findings(self) -> Result<String> {
        let stdout = self.args(["--format", "json"]).run()?;
        let findings: serde_json::Value = serde_json::from_str(&stdout)?;

        let mut lines = vec![];
        for finding in findings.as_array().into_iter().flatten() {
            let primary = finding["locations"]
                .as_array()
                .into_iter()
                .flatten()
                .find(|loc| loc["symbolic"]["kind"] == "Primary")
                .ok_or_else(|| anyhow::anyhow!("finding without a primary location"))?;

            let start = &primary["concrete"]["location"]["start_point"];
            lines.push(format!(
                "{ident} {row}:{column} {feature}",
                ident = finding["ident"].as_str().unwrap_or_default(),
                row = start["row"].as_u64().unwrap_or_default() + 1,
                column = start["column"].as_u64().unwrap_or_default() + 1,
                feature = primary["concrete"]["feature"].as_str().unwrap_or_default(),
            ));
        }

        Ok(lines.join("\n"))
    }
}

pub fn sinkhole() -> Sinkhole {
    Sinkhole::new()
}
