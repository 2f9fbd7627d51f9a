use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rqe_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rqe");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("nested")).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "---\nauthors: Ada Lovelace\ndate: 1843\n---\nThe analytical engine could compute Bernoulli numbers.\n\nIt was designed by Charles Babbage.",
    )
    .unwrap();
    fs::write(
        files_dir.join("nested/beta.txt"),
        "Machine learning builds models that learn patterns from data.",
    )
    .unwrap();
    fs::write(files_dir.join("ignored.bin"), "binary blob").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/rqe.sqlite"

[embedding]
provider = "hashing"
dims = 64

[server]
bind = "127.0.0.1:0"
"#,
        root.display()
    );

    let config_path = config_dir.join("rqe.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rqe(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rqe_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rqe binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn files_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .display()
        .to_string()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rqe(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_rqe(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_directory_then_skip_on_rerun() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (stdout, stderr, success) = run_rqe(&config_path, &["ingest", &files]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents loaded: 2"), "got: {}", stdout);
    assert!(stdout.contains("chunks skipped:   0"), "got: {}", stdout);

    let (stdout, _, success) = run_rqe(&config_path, &["ingest", &files]);
    assert!(success);
    assert!(stdout.contains("chunks ingested:  0"), "got: {}", stdout);
    assert!(stdout.contains("errors:           0"), "got: {}", stdout);
}

#[test]
fn test_evaluate_and_show() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rqe(
        &config_path,
        &[
            "evaluate",
            "--query",
            "What did the analytical engine compute?",
            "--answer",
            "The analytical engine could compute Bernoulli numbers [1].",
            "--context",
            "The analytical engine could compute Bernoulli numbers.",
        ],
    );
    assert!(success, "evaluate failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("citation_coverage: 1.00"), "got: {}", stdout);

    let record_id = stdout
        .lines()
        .find_map(|l| l.strip_prefix("evaluation "))
        .unwrap()
        .trim()
        .to_string();

    let (shown, _, success) = run_rqe(&config_path, &["show-evaluation", &record_id]);
    assert!(success);
    assert!(shown.contains(&record_id));

    let (_, stderr, success) = run_rqe(&config_path, &["show-evaluation", "nope"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_query_without_generation_provider_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_rqe(&config_path, &["query", "What is machine learning?"]);
    assert!(!success);
    assert!(stderr.contains("service unavailable"), "got: {}", stderr);
}

#[test]
fn test_query_rejects_unknown_language() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_rqe(&config_path, &["query", "q", "--language", "it"]);
    assert!(!success);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_rqe(&tmp.path().join("missing.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("missing.toml"), "got: {}", stderr);
}
