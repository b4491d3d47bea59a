//! CLI tests spawning the `shellai` binary against a temporary config file.

use std::path::Path;
use std::process::{Command, Output};

use shellai::exit_codes;

fn shellai(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shellai"))
        .current_dir(config.parent().expect("parent"))
        .env("SHELLAI_CONFIG", config)
        .env_remove("OPENAI_API_KEY")
        .env_remove("SHELLAI_MODEL")
        .env_remove("SHELLAI_API_URL")
        .env_remove("SHELLAI_WIRE_FORMAT")
        .env_remove("SHELLAI_SANDBOX_DIR")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("spawn shellai")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn config_init_set_and_show() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("config.toml");

    let out = shellai(&config, &["config", "path"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&out).trim(), config.display().to_string());

    let out = shellai(&config, &["config", "init"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(config.exists());

    let out = shellai(&config, &["config", "init"]);
    assert_eq!(out.status.code(), Some(exit_codes::ERROR));
    assert!(String::from_utf8_lossy(&out.stderr).contains("already exists"));

    let out = shellai(&config, &["config", "set", "model", "gpt-4o-mini"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let out = shellai(&config, &["config", "set", "api_key", "sk-secret-value"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));

    let out = shellai(&config, &["config", "set", "max_chain_iterations", "0"]);
    assert_eq!(out.status.code(), Some(exit_codes::ERROR));

    let out = shellai(&config, &["config", "show"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let shown = stdout(&out);
    assert!(shown.contains("model = \"gpt-4o-mini\""));
    assert!(shown.contains("max_chain_iterations = 5"));
    assert!(shown.contains("sk-s****"));
    assert!(!shown.contains("sk-secret-value"));
}

#[test]
fn one_shot_without_api_key_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("config.toml");
    let out = shellai(&config, &["config", "set", "send_system_info", "false"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));

    let out = shellai(&config, &["ask", "-m", "list files"]);
    assert_eq!(out.status.code(), Some(exit_codes::ERROR));
    assert!(stdout(&out).contains("no API key"));
}
