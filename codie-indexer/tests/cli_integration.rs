use anyhow::Result;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

/// Run the built binary from `cwd` with no credential in the environment
fn run_cli(cwd: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_codie"))
        .current_dir(cwd)
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env_remove("OPENAI_BASE_URL")
        .env_remove("CODIE_EMBEDDING_MODEL")
        .env("RUST_LOG", "error")
        .output()?;
    Ok(output)
}

#[test]
fn test_help() -> Result<()> {
    let dir = tempdir()?;
    let output = run_cli(dir.path(), &["--help"])?;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--max-chunk-size"));
    assert!(stdout.contains("index"));
    Ok(())
}

#[test]
fn test_index_help() -> Result<()> {
    let dir = tempdir()?;
    let output = run_cli(dir.path(), &["index", "--help"])?;
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--skip-verify"));
    Ok(())
}

#[test]
fn test_missing_credential_fails_before_indexing() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("main.go"), "package main\n\nfunc main() {}\n")?;

    let output = run_cli(dir.path(), &["index", ".", "--skip-verify"])?;
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "stderr: {stderr}");
    assert!(stderr.contains("authentication"), "stderr: {stderr}");
    assert!(!dir.path().join("embeddings.json").exists());
    Ok(())
}

#[test]
fn test_invalid_config_file_is_reported() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("codie.toml"), "[indexing]\nworkers = \"many\"\n")?;

    let output = run_cli(dir.path(), &["."])?;
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid config codie.toml"), "stderr: {stderr}");
    Ok(())
}
