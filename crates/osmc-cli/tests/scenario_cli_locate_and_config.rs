use assert_cmd::Command;
use predicates::prelude::*;

#[allow(deprecated)]
fn osmc() -> Command {
    let mut cmd = Command::cargo_bin("osmc").unwrap();
    cmd.env_remove("OSMC_DATABASE_URL");
    cmd
}

#[test]
fn locate_prints_partitioned_path_and_url() {
    let dir = tempfile::tempdir().unwrap();
    osmc()
        .current_dir(dir.path())
        .args(["locate", "123456789"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sequence=123456789"))
        .stdout(predicate::str::contains("path=123/456/789.osm.gz"))
        .stdout(predicate::str::contains(
            "url=https://planet.osm.org/replication/changesets/123/456/789.osm.gz",
        ))
        .stdout(predicate::str::contains("123456789.jsonl"));
}

#[test]
fn locate_rejects_ten_digit_sequence() {
    let dir = tempfile::tempdir().unwrap();
    osmc()
        .current_dir(dir.path())
        .args(["locate", "1000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("9 decimal digits"));
}

#[test]
fn config_hash_is_printed_and_stable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("base.yaml");
    std::fs::write(&path, "feed:\n  timeout_secs: 10\n").unwrap();

    let run = || {
        let out = osmc()
            .current_dir(dir.path())
            .args(["config-hash", path.to_str().unwrap()])
            .output()
            .unwrap();
        assert!(out.status.success());
        String::from_utf8(out.stdout).unwrap()
    };

    let first = run();
    assert!(first.starts_with("config_hash="));
    assert!(first.contains(r#"{"feed":{"timeout_secs":10}}"#));
    assert_eq!(first, run());
}

#[test]
fn config_with_embedded_password_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, "db:\n  url: \"postgres://u:secret@h/db\"\n").unwrap();

    osmc()
        .current_dir(dir.path())
        .args(["config-hash", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("u:secret@").not());
}
