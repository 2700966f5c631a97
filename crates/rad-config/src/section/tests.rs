//! Unit tests for the configuration-section tree.

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;

#[fixture]
fn linelog() -> ConfigSection {
    ConfigSection::new("linelog")
        .with_pair("filename", "/var/log/radius/linelog")
        .with_pair("permissions", "0600")
        .with_pair("escape_filenames", "yes")
        .with_section(
            ConfigSection::new("messages")
                .with_pair("Access-Request", "Requested access: %{User-Name}")
                .with_pair("Empty", ""),
        )
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

#[rstest]
fn pair_returns_first_value(linelog: ConfigSection) {
    assert_eq!(linelog.pair("filename"), Some("/var/log/radius/linelog"));
    assert!(linelog.pair("missing").is_none());
}

#[rstest]
fn subsection_is_found_by_name(linelog: ConfigSection) {
    let messages = linelog.subsection("messages").expect("messages section");
    assert_eq!(messages.pairs().count(), 2);
}

#[test]
fn bare_words_keep_declaration_order() {
    let section = ConfigSection::new("authorize")
        .with_word("preprocess")
        .with_word("linelog")
        .with_word("ok");
    let names: Vec<&str> = section.pairs().map(ConfigPair::name).collect();
    assert_eq!(names, ["preprocess", "linelog", "ok"]);
    assert!(section.pairs().all(|pair| pair.value().is_none()));
}

// ---------------------------------------------------------------------------
// Typed accessors
// ---------------------------------------------------------------------------

#[rstest]
fn parse_required_reports_missing_item(linelog: ConfigSection) {
    let err = linelog
        .parse_required::<u32>("max_entries")
        .expect_err("item is absent");
    assert!(matches!(err, ConfigError::MissingItem { .. }));
    assert!(err.to_string().contains("max_entries"));
}

#[rstest]
fn parse_or_uses_default_when_absent(linelog: ConfigSection) {
    assert_eq!(linelog.parse_or("max_idle", 30_u32).expect("default"), 30);
}

#[test]
fn parse_or_rejects_garbage() {
    let section = ConfigSection::new("pool").with_pair("max", "lots");
    let err = section.parse_or("max", 1_u32).expect_err("should not parse");
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
    assert!(err.to_string().contains("lots"));
}

#[rstest]
#[case::yes("yes", true)]
#[case::upper_no("NO", false)]
#[case::one("1", true)]
#[case::off("off", false)]
fn bool_or_accepts_common_spellings(#[case] value: &str, #[case] expected: bool) {
    let section = ConfigSection::new("m").with_pair("flag", value);
    assert_eq!(section.bool_or("flag", !expected).expect("bool"), expected);
}

#[test]
fn bool_or_rejects_unknown_spelling() {
    let section = ConfigSection::new("m").with_pair("flag", "maybe");
    assert!(section.bool_or("flag", false).is_err());
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

#[rstest]
#[case::dotted(".messages.Access-Request")]
#[case::undotted("messages.Access-Request")]
fn reference_resolves_nested_pair(linelog: ConfigSection, #[case] path: &str) {
    let item = linelog.reference(path).expect("reference resolves");
    let pair = item.as_pair().expect("pair");
    assert_eq!(pair.value(), Some("Requested access: %{User-Name}"));
}

#[rstest]
fn reference_to_section_returns_section(linelog: ConfigSection) {
    let item = linelog.reference(".messages").expect("reference resolves");
    assert!(item.as_section().is_some());
}

#[rstest]
#[case::parent("..messages")]
#[case::missing(".messages.Accounting-Request")]
#[case::through_pair(".filename.child")]
#[case::empty("")]
fn reference_rejects_unresolvable_paths(linelog: ConfigSection, #[case] path: &str) {
    assert!(linelog.reference(path).is_none(), "{path} should not resolve");
}

// ---------------------------------------------------------------------------
// JSON conversion
// ---------------------------------------------------------------------------

#[test]
fn from_json_converts_scalars_lists_and_sections() {
    let value = json!({
        "namespace": "radius",
        "authorize": ["linelog", "ok"],
        "pool": { "max": 4, "spare": null },
        "escape": true
    });
    let section = ConfigSection::from_json("default", &value).expect("convert");

    assert_eq!(section.pair("namespace"), Some("radius"));
    assert_eq!(section.pair("escape"), Some("yes"));
    let authorize = section.subsection("authorize").expect("authorize");
    assert_eq!(authorize.pairs().count(), 2);
    let pool = section.subsection("pool").expect("pool");
    assert_eq!(pool.pair("max"), Some("4"));
    assert!(pool.pair("spare").is_none());
}

#[test]
fn from_json_rejects_non_string_list_entries() {
    let value = json!({ "authorize": ["linelog", 3] });
    let err = ConfigSection::from_json("default", &value).expect_err("should fail");
    assert!(matches!(err, ConfigError::Structure { .. }));
}

#[test]
fn from_json_rejects_scalar_root() {
    let err = ConfigSection::from_json("root", &json!("text")).expect_err("should fail");
    assert!(err.to_string().contains("expected an object"));
}
