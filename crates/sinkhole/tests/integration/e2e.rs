//! End-to-end integration tests.

use anyhow::Result;

use crate::common::{input_under_test, sinkhole};

#[test]
fn test_exit_codes() -> Result<()> {
    let critical = sinkhole()
        .input(input_under_test("argument-injection/argument-injection.yml"))
        .output()?;
    assert_eq!(critical.code, Some(15));

    let clean = sinkhole()
        .input(input_under_test("code-injection/env-quoted.yml"))
        .output()?;
    assert_eq!(clean.code, Some(0));
    assert!(clean.stdout.contains("No findings to report. Good job!"));

    let silenced = sinkhole()
        .input(input_under_test("argument-injection/argument-injection.yml"))
        .args(["--no-exit-codes"])
        .output()?;
    assert_eq!(silenced.code, Some(0));

    Ok(())
}

#[test]
fn test_min_severity() -> Result<()> {
    let run = sinkhole()
        .input(input_under_test("code-injection/guarded-job.yml"))
        .args(["--min-severity", "high"])
        .output()?;

    assert_eq!(run.code, Some(0));
    assert!(run.stdout.contains("No findings to report. Good job! (1 ignored)"));

    Ok(())
}

#[test]
fn test_min_confidence() -> Result<()> {
    // Callee findings through direct interpolation are medium confidence.
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("reusable-workflow-taint/reusable-callee.yml"))
            .args(["--min-confidence", "high"])
            .findings()?,
        @""
    );

    Ok(())
}

#[test]
fn test_multiple_inputs() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("envvar-injection/envvar-injection.yml"))
            .input(input_under_test("untrusted-cache-key/untrusted-cache-key.yml"))
            .findings()?,
        @r"
    envvar-injection-critical 10:17 COMMENT=$BODY
    untrusted-cache-key-critical 10:20 ${{ github.head_ref }}
    "
    );

    Ok(())
}

#[test]
fn test_collect_directory() -> Result<()> {
    // Only `.github/workflows/` is collected; `docs/not-collected.yml`
    // would otherwise produce critical findings.
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("collection"))
            .findings()?,
        @"code-injection-medium 8:20 ${{ github.event.pull_request.title }}"
    );

    Ok(())
}

#[test]
fn test_json_output() -> Result<()> {
    let stdout = sinkhole()
        .input(input_under_test("envvar-injection/envvar-injection.yml"))
        .args(["--format", "json"])
        .run()?;
    let findings: serde_json::Value = serde_json::from_str(&stdout)?;

    let finding = &findings[0];
    assert_eq!(finding["ident"], "envvar-injection-critical");
    assert_eq!(finding["determinations"]["severity"], "Critical");
    assert_eq!(finding["ignored"], false);

    Ok(())
}

#[test]
fn test_invalid_inputs() -> Result<()> {
    let run = sinkhole()
        .input(input_under_test("invalid/not-yaml.txt"))
        .expects_failure(true)
        .output()?;
    assert!(run.stderr.contains("invalid input"));

    let run = sinkhole()
        .input("does-not-exist.yml")
        .expects_failure(true)
        .output()?;
    assert!(run.stderr.contains("invalid input"));

    // Nothing left to audit once the broken workflow is skipped.
    let run = sinkhole()
        .input(input_under_test("invalid/not-a-workflow.yml"))
        .expects_failure(true)
        .output()?;
    assert!(run.stderr.contains("no inputs collected"));

    Ok(())
}

#[test]
fn test_strict_collection() -> Result<()> {
    let lenient = sinkhole()
        .input(input_under_test("invalid/not-a-workflow.yml"))
        .input(input_under_test("code-injection/env-quoted.yml"))
        .output()?;
    assert_eq!(lenient.code, Some(0));
    assert!(lenient.stderr.contains("skipping"));

    sinkhole()
        .input(input_under_test("invalid/not-a-workflow.yml"))
        .input(input_under_test("code-injection/env-quoted.yml"))
        .args(["--strict-collection"])
        .expects_failure(true)
        .output()?;

    Ok(())
}

#[test]
fn test_rust_log_overrides_verbosity() -> Result<()> {
    let run = sinkhole()
        .input(input_under_test("code-injection/env-quoted.yml"))
        .setenv("RUST_LOG", "sinkhole=debug")
        .output()?;

    assert!(run.stderr.contains("running 11 audits"));

    Ok(())
}
