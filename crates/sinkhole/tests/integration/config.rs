use anyhow::Result;

use crate::common::{input_under_test, sinkhole};

#[test]
fn test_discover_config_from_directory() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("config-scenarios/disables"))
            .no_config(false)
            .findings()?,
        @"argument-injection-critical 8:23 ${{ github.event.pull_request.head.ref }}"
    );

    Ok(())
}

#[test]
fn test_discover_config_from_file() -> Result<()> {
    // Discovery starts at `.github/`, then walks up to the directory
    // holding `sinkhole.yml`.
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test(
                "config-scenarios/disables/.github/workflows/ci.yml"
            ))
            .no_config(false)
            .findings()?,
        @"argument-injection-critical 8:23 ${{ github.event.pull_request.head.ref }}"
    );

    Ok(())
}

#[test]
fn test_no_config_skips_discovery() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("config-scenarios/disables"))
            .findings()?,
        @r"
    code-injection-critical 8:23 ${{ github.event.pull_request.head.ref }}
    argument-injection-critical 8:23 ${{ github.event.pull_request.head.ref }}
    code-injection-critical 10:26 ${{ github.event.pull_request.head.ref }}
    "
    );

    Ok(())
}

#[test]
fn test_ignore_rules() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("config-scenarios/ignores"))
            .no_config(false)
            .findings()?,
        @"code-injection-critical 10:26 ${{ github.event.pull_request.head.ref }}"
    );

    let stdout = sinkhole()
        .input(input_under_test("config-scenarios/ignores"))
        .no_config(false)
        .run()?;
    assert!(stdout.contains("2 ignored"));

    Ok(())
}

#[test]
fn test_explicit_config() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("argument-injection/argument-injection.yml"))
            .config(input_under_test("config-scenarios/disables/sinkhole.yml"))
            .findings()?,
        @"argument-injection-critical 8:23 ${{ github.event.pull_request.head.ref }}"
    );

    Ok(())
}

#[test]
fn test_config_from_env() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("argument-injection/argument-injection.yml"))
            .no_config(false)
            .setenv(
                "SINKHOLE_CONFIG",
                &input_under_test("config-scenarios/disables/sinkhole.yml"),
            )
            .findings()?,
        @"argument-injection-critical 8:23 ${{ github.event.pull_request.head.ref }}"
    );

    Ok(())
}

#[test]
fn test_invalid_config() -> Result<()> {
    let run = sinkhole()
        .input(input_under_test("argument-injection/argument-injection.yml"))
        .config(input_under_test("config-scenarios/invalid/sinkhole.yml"))
        .expects_failure(true)
        .output()?;

    assert!(run.stderr.contains("failed to load config"));

    Ok(())
}

#[test]
fn test_unknown_rule_warning() -> Result<()> {
    let run = sinkhole()
        .input(input_under_test("code-injection/env-quoted.yml"))
        .config(input_under_test("config-scenarios/unknown-rule.yml"))
        .output()?;

    assert!(
        run.stderr
            .contains("configuration mentions unknown rule `template-injection`")
    );

    Ok(())
}
