//! CLI test cases.
//!
//! Tests which need a model server expect Ollama on its default port, with
//! the relevant models pulled. Tests which need `tesseract` or poppler are
//! ignored by default, too.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// API base URL for local Ollama instance.
static OLLAMA_API_BASE: &str = "http://localhost:11434/v1";

/// Fake API key for local Ollama instance.
static OLLAMA_API_KEY: &str = "sk-1234";

/// Our two-page PDF fixture.
static TWO_PAGE_PDF: &str = "tests/fixtures/two_pages.pdf";

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("pagescribe").unwrap()
}

#[test]
fn test_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("classify"))
        .stdout(predicate::str::contains("OPENAI_API_BASE"));
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_sources_are_required() {
    cmd().arg("classify").assert().failure();
}

#[test]
fn test_schema_page() {
    cmd()
        .args(["schema", "page"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"page_count\""))
        .stdout(predicate::str::contains("\"parsed\""));
}

#[test]
fn test_schema_analysis_to_file() {
    let dir = tempfile::TempDir::with_prefix("cli-test").unwrap();
    let path = dir.path().join("analysis.json");
    cmd()
        .args(["schema", "analysis", "-o"])
        .arg(&path)
        .assert()
        .success();
    let schema = std::fs::read_to_string(&path).unwrap();
    assert!(schema.contains("\"classification\""));
}

#[test]
fn test_zero_max_pages_is_rejected() {
    cmd()
        .args(["ocr", "--max-pages", "0", "page.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--max-pages"))
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_missing_file_fails_the_run() {
    cmd()
        .args(["classify", "does-not-exist.png"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("→ Failed:"))
        .stdout(predicate::str::contains("no such file"));
}

#[test]
fn test_missing_file_within_allowed_failure_rate() {
    cmd()
        .args(["ocr", "does-not-exist.png", "--allowed-failure-rate", "1.0"])
        .assert()
        .success();
}

#[test]
fn test_missing_file_jsonl_record() {
    cmd()
        .args([
            "transcribe",
            "does-not-exist.png",
            "--format",
            "jsonl",
            "--allowed-failure-rate",
            "1.0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\":\"document\""))
        .stdout(predicate::str::contains("\"status\":\"failed\""));
}

#[test]
fn test_unsupported_file_type() {
    let dir = tempfile::TempDir::with_prefix("cli-test").unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "hello").unwrap();
    cmd()
        .arg("classify")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("unsupported MIME type"));
}

#[test]
#[ignore = "Needs tesseract and poppler-utils"]
fn test_ocr_pdf() {
    cmd()
        .args(["ocr", TWO_PAGE_PDF])
        .assert()
        .success()
        .stdout(predicate::str::contains("--- Page 1/2 ---"))
        .stdout(predicate::str::contains("--- Page 2/2 ---"))
        .stdout(predicate::str::contains("Invoice"));
}

#[test]
#[ignore = "Needs poppler-utils"]
fn test_max_pages_truncates_with_warning() {
    cmd()
        .args(["ocr", TWO_PAGE_PDF, "--max-pages", "1", "--format", "jsonl"])
        .args(["--allowed-failure-rate", "1.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"page_count\":1"))
        .stdout(predicate::str::contains("\"warnings\""));
}

#[test]
#[ignore = "Needs poppler-utils and Ollama running"]
fn test_analyze_pdf_text_layer_ollama() {
    cmd()
        .env("OPENAI_API_KEY", OLLAMA_API_KEY)
        .env("OPENAI_API_BASE", OLLAMA_API_BASE)
        .args(["analyze", TWO_PAGE_PDF, "--category", "invoice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("→ Classification:"));
}

#[test]
#[ignore = "Needs poppler-utils, tesseract and a Donut-capable model server"]
fn test_classify_pdf_with_fallback() {
    cmd()
        .env("OPENAI_API_KEY", OLLAMA_API_KEY)
        .env("OPENAI_API_BASE", OLLAMA_API_BASE)
        .args(["classify", TWO_PAGE_PDF, "--jobs", "2", "--timeout", "60"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--- Page 1/2 ---"));
}
