use std::path::Path;

use serde_yaml::Value;

const RULE_SET_FILES: [&str; 2] = ["rules/manufacturing.yaml", "rules/cooking.yaml"];
const RULE_TYPES: [&str; 5] = [
    "abbreviation",
    "synonym",
    "equivalent",
    "substitution",
    "normalization",
];
const DIRECTIONS: [&str; 3] = ["bidirectional", "forward", "reverse"];

fn main() {
    for path in RULE_SET_FILES {
        validate_rule_set_file(Path::new(path));
    }
    set_build_dependencies();
}

fn validate_rule_set_file(path: &Path) {
    // Ensure rule set exists at build time
    assert!(
        path.exists(),
        "\n\nRULES BUILD ERROR: File not found\n\
         Path: {}\n\
         The embedded rule sets must exist before building.\n",
        path.display()
    );

    let contents = std::fs::read_to_string(path).unwrap_or_else(|e| {
        panic!(
            "\n\nRULES BUILD ERROR: Failed to read file\n\
             Path: {}\n\
             Error: {e}\n",
            path.display()
        );
    });

    let rule_set: Value = serde_yaml::from_str(&contents).unwrap_or_else(|e| {
        panic!(
            "\n\nRULES BUILD ERROR: Invalid YAML\n\
             Path: {}\n\
             Error: {e}\n\
             Hint: Check indentation and quoting.\n",
            path.display()
        );
    });

    let domain = rule_set
        .get("domain")
        .and_then(Value::as_str)
        .unwrap_or_else(|| {
            panic!(
                "\n\nRULES BUILD ERROR: Missing 'domain' field\n\
                 Path: {}\n",
                path.display()
            );
        });

    let rules = rule_set
        .get("rules")
        .and_then(Value::as_mapping)
        .unwrap_or_else(|| {
            panic!(
                "\n\nRULES BUILD ERROR: 'rules' must be a mapping of rule id to rule\n\
                 Path: {}\n",
                path.display()
            );
        });

    for (id, rule) in rules {
        let id = id.as_str().unwrap_or("<non-string id>");
        validate_rule(rule, domain, id);
    }

    println!(
        "cargo:warning=Validated rule set '{domain}': {} rules",
        rules.len()
    );
}

fn validate_rule(rule: &Value, domain: &str, id: &str) {
    let field = |name: &str| rule.get(name).and_then(Value::as_str).unwrap_or("");

    assert!(
        RULE_TYPES.contains(&field("type")),
        "\n\nRULES BUILD ERROR: Rule '{domain}/{id}' has unknown type '{}'\n",
        field("type")
    );
    assert!(
        !field("key").trim().is_empty(),
        "\n\nRULES BUILD ERROR: Rule '{domain}/{id}' has an empty key\n"
    );

    let values = rule.get("values").and_then(Value::as_sequence);
    assert!(
        values.is_some_and(|v| !v.is_empty()),
        "\n\nRULES BUILD ERROR: Rule '{domain}/{id}' needs at least one value\n"
    );

    if let Some(direction) = rule.get("direction").and_then(Value::as_str) {
        assert!(
            DIRECTIONS.contains(&direction),
            "\n\nRULES BUILD ERROR: Rule '{domain}/{id}' has unknown direction '{direction}'\n"
        );
    }

    if let Some(confidence) = rule.get("base_confidence").and_then(Value::as_f64) {
        assert!(
            (0.0..=1.0).contains(&confidence),
            "\n\nRULES BUILD ERROR: Rule '{domain}/{id}' base_confidence {confidence} is outside [0, 1]\n"
        );
    }
}

fn set_build_dependencies() {
    // Tell cargo to rerun if the embedded rule sets change
    for path in RULE_SET_FILES {
        println!("cargo:rerun-if-changed={path}");
    }

    // Tell cargo to rerun if build.rs changes
    println!("cargo:rerun-if-changed=build.rs");
}
