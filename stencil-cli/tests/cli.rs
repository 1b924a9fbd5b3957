use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn stencil() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("stencil"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).expect("write fixture");
    path.display().to_string()
}

#[test]
fn renders_stdin_to_stdout() {
    stencil()
        .args(["render"])
        .env("HOST", "db1")
        .write_stdin("host={{ Env.HOST }}")
        .assert()
        .success()
        .stdout("host=db1");
}

#[test]
fn renders_values_into_output_file() {
    let dir = TempDir::new().expect("tmp");
    let input = write(dir.path(), "db.conf.tpl", "host={{ Env.HOST }}\nport={{ Values.port }}");
    let values = write(dir.path(), "values.json", r#"{"port": 5432}"#);
    let out = dir.path().join("db.conf");

    stencil()
        .args(["render", "-i", &input, "-v", &values, "-o"])
        .arg(&out)
        .env("HOST", "db1")
        .assert()
        .success()
        .stdout(contains("1 written"));

    assert_eq!(fs::read_to_string(out).expect("read"), "host=db1\nport=5432");
}

#[test]
fn directory_output_keeps_good_templates_and_names_the_broken_one() {
    let dir = TempDir::new().expect("tmp");
    let templates = dir.path().join("templates");
    fs::create_dir_all(&templates).expect("mkdir");
    write(&templates, "one.conf.tpl", "one");
    write(&templates, "two.conf.tpl", "{% if %}");
    write(&templates, "three.conf.j2", "three");
    let out = dir.path().join("out");

    stencil()
        .args(["render", "-i", &format!("{}/*", templates.display()), "-o"])
        .arg(format!("{}/", out.display()))
        .assert()
        .failure()
        .stderr(contains("two.conf.tpl").and(contains("failed to complete 1 inputs")));

    assert_eq!(fs::read_to_string(out.join("one.conf")).expect("one"), "one");
    assert_eq!(fs::read_to_string(out.join("three.conf")).expect("three"), "three");
    assert!(!out.join("two.conf").exists());
}

#[test]
fn missing_keys_render_empty_unless_strict() {
    stencil()
        .args(["render"])
        .write_stdin("[{{ Values.nope }}]")
        .assert()
        .success()
        .stdout("[]");

    stencil()
        .args(["render", "--strict"])
        .write_stdin("[{{ Values.nope }}]")
        .assert()
        .failure()
        .stderr(contains("missing key"));
}

#[test]
fn unmatched_input_glob_is_an_error() {
    let dir = TempDir::new().expect("tmp");
    stencil()
        .args(["render", "-i", &format!("{}/*.tpl", dir.path().display())])
        .assert()
        .failure()
        .stderr(contains("no files match"));
}

#[test]
fn dry_run_reports_and_writes_nothing() {
    let dir = TempDir::new().expect("tmp");
    let input = write(dir.path(), "app.conf.tpl", "port=2\n");
    let out = dir.path().join("app.conf");
    fs::write(&out, "port=1\n").expect("seed");

    stencil()
        .args(["render", "--dry-run", "-i", &input, "-o"])
        .arg(&out)
        .assert()
        .success()
        .stdout(contains("[dry-run]").and(contains("+port=2")));

    assert_eq!(fs::read_to_string(out).expect("read"), "port=1\n");
}

#[test]
fn reference_templates_and_file_bundle() {
    let dir = TempDir::new().expect("tmp");
    let refs = write(dir.path(), "greet", "Hello, {{ this }}");
    let bundle = dir.path().join("bundle");
    fs::create_dir_all(&bundle).expect("mkdir");
    write(&bundle, "motd", "welcome");

    stencil()
        .args(["render", "-r", &refs, "-f"])
        .arg(&bundle)
        .write_stdin(format!(
            "{{{{ template(\"{refs}\", \"Ana\") }}}} {{{{ Files.get(\"motd\") }}}}"
        ))
        .assert()
        .success()
        .stdout("Hello, Ana welcome");
}

#[test]
fn ensure_checks_environment() {
    stencil()
        .args(["ensure", "STENCIL_A", "STENCIL_B"])
        .env("STENCIL_A", "1")
        .env("STENCIL_B", "2")
        .assert()
        .success();

    stencil()
        .args(["ensure", "STENCIL_A", "STENCIL_B"])
        .env("STENCIL_A", "1")
        .env_remove("STENCIL_B")
        .assert()
        .failure()
        .stderr(contains("environment variables are missing: [STENCIL_B]"));

    stencil()
        .args(["ensure", "-a", "STENCIL_A", "STENCIL_B"])
        .env_remove("STENCIL_A")
        .env("STENCIL_B", "2")
        .assert()
        .success();
}

#[test]
fn path_waits_then_gives_up() {
    let dir = TempDir::new().expect("tmp");
    let present = write(dir.path(), "present", "x");

    stencil().args(["path", "-r", &present]).assert().success();

    stencil()
        .args(["path", "-t", "200ms"])
        .arg(dir.path().join("absent"))
        .assert()
        .failure()
        .stderr(contains("absent"));
}
