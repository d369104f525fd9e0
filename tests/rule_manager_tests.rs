//! Rule manager lifecycle against real rule directories

use std::path::Path;
use std::sync::Arc;

use supply_matcher::rules::{HeuristicRule, RuleDirection, RuleError, RuleManager, RuleSetFormat, RuleType};
use tempfile::TempDir;

const MANUFACTURING: &str = r#"
domain: manufacturing
version: "2.1.0"
rules:
  cnc_abbreviation:
    type: abbreviation
    key: cnc
    values: [computer numerical control]
    direction: bidirectional
    base_confidence: 0.9
    tags: [machining]
  milling_synonym:
    type: synonym
    key: milling
    values: [cnc milling, mill]
    base_confidence: 0.85
"#;

const COOKING_JSON: &str = r#"{
  "domain": "cooking",
  "rules": {
    "bake_synonym": {
      "type": "synonym",
      "key": "bake",
      "values": ["roast"],
      "direction": "bidirectional",
      "base_confidence": 0.8
    }
  }
}"#;

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).expect("Failed to write rule file");
}

fn rules_dir() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write(dir.path(), "manufacturing.yaml", MANUFACTURING);
    write(dir.path(), "cooking.json", COOKING_JSON);
    dir
}

#[tokio::test]
async fn test_initialize_loads_every_file() {
    let dir = rules_dir();
    let manager = RuleManager::new(dir.path());
    let report = manager.initialize().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.loaded, vec!["cooking", "manufacturing"]);
    assert_eq!(manager.list_domains(), vec!["cooking", "manufacturing"]);
    assert_eq!(manager.get_rule_set("manufacturing").unwrap().version, "2.1.0");
    assert_eq!(manager.get_rules_by_tag("manufacturing", "machining").len(), 1);
    assert_eq!(
        manager
            .get_rules_by_type("manufacturing", RuleType::Synonym)
            .len(),
        1
    );
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let dir = rules_dir();
    let manager = RuleManager::new(dir.path());
    manager.initialize().await.unwrap();
    let first = manager.snapshot();

    // A second initialize must not pick up directory changes
    std::fs::remove_file(dir.path().join("cooking.json")).unwrap();
    manager.initialize().await.unwrap();
    assert!(Arc::ptr_eq(&first, &manager.snapshot()));
}

#[tokio::test]
async fn test_malformed_file_is_skipped() {
    let dir = rules_dir();
    write(dir.path(), "broken.yaml", "domain: broken\nrules: [this is: not valid");
    write(
        dir.path(),
        "unknown_type.yaml",
        "domain: other\nrules:\n  r1:\n    type: homonym\n    key: a\n    values: [b]\n",
    );
    write(
        dir.path(),
        "bad_direction.yaml",
        "domain: third\nrules:\n  r1:\n    type: synonym\n    key: a\n    values: [b]\n    direction: sideways\n",
    );
    write(dir.path(), "notes.txt", "not a rule set");

    let manager = RuleManager::new(dir.path());
    let report = manager.initialize().await.unwrap();

    assert_eq!(report.failures.len(), 3);
    assert_eq!(report.loaded, vec!["cooking", "manufacturing"]);
    assert!(manager.get_rule("manufacturing", "cnc_abbreviation").is_some());
}

#[tokio::test]
async fn test_duplicate_domain_file_is_reported() {
    let dir = rules_dir();
    write(dir.path(), "zz_manufacturing_copy.yaml", MANUFACTURING);

    let manager = RuleManager::new(dir.path());
    let report = manager.initialize().await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0].1,
        RuleError::DuplicateDomain { .. }
    ));
}

#[tokio::test]
async fn test_missing_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    let manager = RuleManager::new(dir.path().join("does-not-exist"));
    assert!(matches!(
        manager.initialize().await,
        Err(RuleError::DirectoryNotFound(_))
    ));
}

#[tokio::test]
async fn test_reload_of_unchanged_directory_keeps_content() {
    let dir = rules_dir();
    let manager = RuleManager::new(dir.path());
    manager.initialize().await.unwrap();
    let before = manager.snapshot();

    manager.reload().await.unwrap();
    let after = manager.snapshot();

    assert!(!Arc::ptr_eq(&before, &after));
    assert!(before.same_content(&after));
}

#[tokio::test]
async fn test_reload_swaps_while_old_snapshot_survives() {
    let dir = rules_dir();
    let manager = RuleManager::new(dir.path());
    manager.initialize().await.unwrap();
    let in_flight = manager.snapshot();

    write(
        dir.path(),
        "manufacturing.yaml",
        &MANUFACTURING.replace("cnc_abbreviation", "cnc_abbrev"),
    );
    manager.reload().await.unwrap();

    // The holder of the old snapshot sees the old store in full
    assert!(in_flight.rule("manufacturing", "cnc_abbreviation").is_some());
    assert!(in_flight.rule("manufacturing", "cnc_abbrev").is_none());

    let current = manager.snapshot();
    assert!(current.rule("manufacturing", "cnc_abbreviation").is_none());
    assert!(current.rule("manufacturing", "cnc_abbrev").is_some());
}

#[tokio::test]
async fn test_readers_never_see_a_partial_store() {
    let dir = rules_dir();
    let manager = Arc::new(RuleManager::new(dir.path()));
    manager.initialize().await.unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let manager = Arc::clone(&manager);
        readers.push(tokio::spawn(async move {
            for _ in 0..200 {
                let store = manager.snapshot();
                // Both files load together or not at all
                assert_eq!(store.len(), 2);
                assert_eq!(store.total_rules(), 3);
                tokio::task::yield_now().await;
            }
        }));
    }
    for _ in 0..10 {
        manager.reload().await.unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test]
async fn test_admin_updates_and_export() {
    let dir = rules_dir();
    let manager = RuleManager::new(dir.path());
    manager.initialize().await.unwrap();
    let before = manager.get_rule_set("manufacturing").unwrap();

    let rule = HeuristicRule::new(
        "sheet_metal",
        RuleType::Synonym,
        "sheet metal",
        vec!["sheet metal fabrication".to_string()],
        RuleDirection::Bidirectional,
        0.85,
        "manufacturing",
    )
    .unwrap();
    assert!(manager.add_rule(rule).unwrap().is_none());

    let after = manager.get_rule_set("manufacturing").unwrap();
    assert_eq!(after.len(), before.len() + 1);
    assert!(after.updated_at >= before.updated_at);

    let yaml = manager.export("manufacturing", RuleSetFormat::Yaml).unwrap();
    let reparsed = supply_matcher::rules::HeuristicRuleSet::from_yaml(&yaml).unwrap();
    assert!(reparsed.same_content(&after));

    assert!(manager
        .remove_rule("manufacturing", "sheet_metal")
        .unwrap()
        .is_some());
    assert!(matches!(
        manager.export("nope", RuleSetFormat::Json),
        Err(RuleError::UnknownDomain(_))
    ));
}
