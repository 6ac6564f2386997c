//! Effective config hash is a function of merged content, not of key order or
//! of how many times it is loaded.

use osmc_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
feed:
  base_url: "https://planet.osm.org/replication/changesets"
  timeout_secs: 60
paths:
  cache_dir: "./source"
  output_dir: "./output"
"#;

const BASE_YAML_REORDERED: &str = r#"
paths:
  output_dir: "./output"
  cache_dir: "./source"
feed:
  timeout_secs: 60
  base_url: "https://planet.osm.org/replication/changesets"
"#;

const OVERLAY_YAML: &str = r#"
feed:
  timeout_secs: 15
run:
  fail_fast: true
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64);
}

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_changes_hash_and_overrides_only_named_leaves() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let layered = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(base.config_hash, layered.config_hash);

    let cfg = layered.ingest().unwrap();
    assert_eq!(cfg.feed.timeout_secs, 15);
    assert_eq!(cfg.feed.base_url, "https://planet.osm.org/replication/changesets");
    assert!(cfg.run.fail_fast);
}

#[test]
fn files_load_like_strings() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::write(&base, BASE_YAML).unwrap();
    std::fs::write(&overlay, OVERLAY_YAML).unwrap();

    let from_files = osmc_config::load_layered_yaml(&[
        base.to_str().unwrap(),
        overlay.to_str().unwrap(),
    ])
    .unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);
}

#[test]
fn missing_file_is_an_error_naming_the_path() {
    let err = osmc_config::load_layered_yaml(&["/definitely/not/here.yaml"]).unwrap_err();
    assert!(format!("{err:#}").contains("/definitely/not/here.yaml"));
}
