use std::path::Path;

use fm_conformance::{DiffReport, HarnessConfig, init_test_tracing, run_fixture};

fn assert_clean(report: &DiffReport) {
    assert!(report.total > 0, "{} ran no cases", report.suite);
    assert_eq!(report.total, report.passed, "{:#?}", report.failed);
    assert!(report.failed.is_empty());
}

#[test]
fn fixtures_are_present() {
    let cfg = HarnessConfig::default_paths();
    for name in [
        "http_matching.json",
        "resp_matching.json",
        "bytes_cycling.json",
        "strict_mode.json",
        "legacy_capture.json",
    ] {
        assert!(Path::new(&cfg.fixture_root.join(name)).exists(), "{name}");
    }
}

#[test]
fn http_matching_conformance() {
    init_test_tracing();
    let cfg = HarnessConfig::default_paths();
    let report = run_fixture(&cfg, "http_matching.json").expect("http fixture");
    assert_eq!(report.suite, "http_matching");
    assert_clean(&report);
}

#[test]
fn resp_matching_conformance() {
    init_test_tracing();
    let cfg = HarnessConfig::default_paths();
    let report = run_fixture(&cfg, "resp_matching.json").expect("resp fixture");
    assert_clean(&report);
}

#[test]
fn bytes_cycling_conformance() {
    init_test_tracing();
    let cfg = HarnessConfig::default_paths();
    let report = run_fixture(&cfg, "bytes_cycling.json").expect("bytes fixture");
    assert_clean(&report);
}

#[test]
fn strict_mode_conformance() {
    init_test_tracing();
    let cfg = HarnessConfig::default_paths();
    let report = run_fixture(&cfg, "strict_mode.json").expect("strict fixture");
    assert_clean(&report);
}

#[test]
fn legacy_capture_conformance() {
    init_test_tracing();
    let cfg = HarnessConfig::default_paths();
    let report = run_fixture(&cfg, "legacy_capture.json").expect("capture fixture");
    assert_clean(&report);
}

#[test]
fn missing_fixture_is_an_error() {
    let cfg = HarnessConfig::default_paths();
    assert!(run_fixture(&cfg, "does_not_exist.json").is_err());
}
