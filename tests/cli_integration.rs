//! CLI smoke tests: apply, status, and list over tempdir fixtures.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const DUMP: &str = r#"{
  "routine": "Game::chat_parse_command",
  "ops": [
    { "opcode": "load-arg", "operand": { "arg": 1 } },
    { "opcode": "call", "operand": { "routine": "String::to_lower" } },
    { "opcode": "store-local", "operand": { "local": 2 } },
    { "opcode": "return" }
  ]
}
"#;

const PATCH: &str = r#"
[meta]
name = "chat-hooks"
host_range = ">=1.0.0, <2.0.0"

[[patches]]
id = "chat-command-hook"
routine = "Game::chat_parse_command"

[patches.anchor]
type = "call-to"
routine = "String::to_lower"
shift = 1

[patches.expect]
type = "opcode"
opcode = "store-local"

[patches.mode]
type = "insert-after"

[[patches.ops]]
op = "load-local"
index = 2

[[patches.ops]]
op = "call"
routine = "Hooks::in_chat_parse_command"

[[patches.ops]]
op = "jump-if-false"
target = "resume"

[[patches.ops]]
op = "return"

[[patches.ops]]
op = "nop"
mark = "resume"
"#;

fn setup_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();

    let dumps = dir.path().join("dumps");
    fs::create_dir(&dumps).unwrap();
    fs::write(dumps.join("chat_parse_command.json"), DUMP).unwrap();

    let patches = dir.path().join("patches");
    fs::create_dir(&patches).unwrap();
    fs::write(patches.join("chat-hooks.toml"), PATCH).unwrap();

    dir
}

fn run(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_method-patcher"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("failed to run method-patcher")
}

#[test]
fn apply_patches_a_dump_in_place() {
    let dir = setup_workspace();

    let output = run(
        dir.path(),
        &[
            "apply",
            "--dumps",
            "dumps",
            "--patches",
            "patches",
            "--host-version",
            "1.2.0",
        ],
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {stdout}");
    assert!(stdout.contains("chat-command-hook"));
    assert!(stdout.contains("1 applied"));

    let patched = fs::read_to_string(dir.path().join("dumps/chat_parse_command.json")).unwrap();
    assert!(patched.contains("Hooks::in_chat_parse_command"));
    assert!(patched.contains("jump-if-false"));
}

#[test]
fn dry_run_leaves_dumps_untouched() {
    let dir = setup_workspace();

    let output = run(
        dir.path(),
        &[
            "apply",
            "--dumps",
            "dumps",
            "--patches",
            "patches",
            "--host-version",
            "1.2.0",
            "--dry-run",
        ],
    );

    assert!(output.status.success());
    let dump = fs::read_to_string(dir.path().join("dumps/chat_parse_command.json")).unwrap();
    assert_eq!(dump, DUMP);
}

#[test]
fn status_reports_drift_with_nonzero_exit() {
    let dir = setup_workspace();

    // A host update removed the lowercase call.
    fs::write(
        dir.path().join("dumps/chat_parse_command.json"),
        r#"{
  "routine": "Game::chat_parse_command",
  "ops": [
    { "opcode": "load-arg", "operand": { "arg": 1 } },
    { "opcode": "return" }
  ]
}
"#,
    )
    .unwrap();

    let output = run(
        dir.path(),
        &[
            "status",
            "--dumps",
            "dumps",
            "--patches",
            "patches",
            "--host-version",
            "1.2.0",
        ],
    );

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 drifted"));
}

#[test]
fn status_never_writes_dumps() {
    let dir = setup_workspace();

    let output = run(
        dir.path(),
        &[
            "status",
            "--dumps",
            "dumps",
            "--patches",
            "patches",
            "--host-version",
            "1.2.0",
        ],
    );

    assert!(output.status.success());
    let dump = fs::read_to_string(dir.path().join("dumps/chat_parse_command.json")).unwrap();
    assert_eq!(dump, DUMP);
}

#[test]
fn list_shows_patch_metadata() {
    let dir = setup_workspace();

    let output = run(dir.path(), &["list", "--patches", "patches"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("chat-hooks"));
    assert!(stdout.contains(">=1.0.0, <2.0.0"));
    assert!(stdout.contains("chat-command-hook -> Game::chat_parse_command"));
}

#[test]
fn out_of_range_host_skips_and_succeeds() {
    let dir = setup_workspace();

    let output = run(
        dir.path(),
        &[
            "apply",
            "--dumps",
            "dumps",
            "--patches",
            "patches",
            "--host-version",
            "2.5.0",
        ],
    );

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 skipped by host version"));
    let dump = fs::read_to_string(dir.path().join("dumps/chat_parse_command.json")).unwrap();
    assert_eq!(dump, DUMP);
}
