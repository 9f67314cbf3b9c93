/// Audit-specific tests.
mod audit;
/// Helpers.
mod common;
/// Configuration discovery tests.
mod config;
/// "Big picture" end-to-end tests, i.e. tests that exercise the whole
/// CLI or several audits at once.
mod e2e;
