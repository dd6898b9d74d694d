use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn docqa_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docqa"))
}

/// Config pointing both model backends at a closed local port, so any
/// command that needs an embedding fails fast.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("nested")).unwrap();
    fs::write(files_dir.join("sky.txt"), "The sky is blue.").unwrap();
    fs::write(
        files_dir.join("nested").join("planets.csv"),
        "planet,color\nMars,red\n",
    )
    .unwrap();
    fs::write(files_dir.join("image.png"), [0u8, 1, 2]).unwrap();

    let config_path = root.join("docqa.toml");
    fs::write(
        &config_path,
        format!(
            r#"[storage]
base_dir = "{}/data"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
url = "http://127.0.0.1:9"
timeout_secs = 5

[llm]
provider = "ollama"
model = "llama3"
url = "http://127.0.0.1:9"
timeout_secs = 5
"#,
            root.display()
        ),
    )
    .unwrap();

    (tmp, config_path)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(docqa_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run docqa")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_init_creates_layout() {
    let (tmp, config) = setup_test_env();
    let output = run(&config, &["init"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Initialized"));

    let data = tmp.path().join("data");
    assert!(data.join("uploads").is_dir());
    assert!(data.join("cache").is_dir());
    assert!(data.join("feedback").is_dir());
}

#[test]
fn test_empty_listings() {
    let (_tmp, config) = setup_test_env();

    let docs = run(&config, &["docs"]);
    assert!(docs.status.success());
    assert!(stdout(&docs).contains("No documents."));

    let history = run(&config, &["history", "show"]);
    assert!(history.status.success());
    assert!(stdout(&history).contains("No chat history."));

    let search = run(&config, &["search", "   "]);
    assert!(search.status.success());
    assert!(stdout(&search).contains("No results."));
}

#[test]
fn test_ingest_rolls_back_when_embeddings_unavailable() {
    let (tmp, config) = setup_test_env();
    let files = tmp.path().join("files");

    let image = files.join("image.png");
    let output = run(
        &config,
        &["ingest", files.to_str().unwrap(), image.to_str().unwrap()],
    );
    assert!(!output.status.success());
    let out = stdout(&output);
    assert!(out.contains("image.png"));
    assert!(out.contains("rolled back: 2"));

    let docs = run(&config, &["docs"]);
    assert!(stdout(&docs).contains("No documents."));
    assert!(!tmp.path().join("data/cache/vector_index.json").exists());
}

#[test]
fn test_ingest_missing_path_fails() {
    let (tmp, config) = setup_test_env();
    let missing = tmp.path().join("nope");
    let output = run(&config, &["ingest", missing.to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn test_feedback_and_delete_need_history() {
    let (_tmp, config) = setup_test_env();
    assert!(!run(&config, &["feedback", "up"]).status.success());
    assert!(!run(&config, &["history", "delete", "0"]).status.success());
    assert!(run(&config, &["history", "clear"]).status.success());
}

#[test]
fn test_clear_commands() {
    let (_tmp, config) = setup_test_env();
    let cache = run(&config, &["clear-cache"]);
    assert!(cache.status.success());
    assert!(stdout(&cache).contains("Vector index cache cleared."));

    let clear = run(&config, &["clear"]);
    assert!(clear.status.success());
    assert!(stdout(&clear).contains("Removed 0 documents"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let tmp = TempDir::new().unwrap();
    let output = run(&tmp.path().join("absent.toml"), &["docs"]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "[chunking]\nmax_chars = 10\noverlap_chars = 50\n").unwrap();
    let output = run(&config, &["docs"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("overlap_chars"));
}
