use discoverx::datatype::TypeClass;
use discoverx::error::DiscoverxError;
use discoverx::filter::NameFilter;
use discoverx::rules::{Rule, RuleInfo, RuleKind, RuleRegistry};

fn resource_request_id() -> Rule {
    Rule::regex("resource_request_id", r"^AR-\d{9}$")
        .unwrap()
        .describe("Resource request ID")
        .with_match_examples(["AR-123456789"])
        .with_nomatch_examples(["R-123"])
}

#[test]
fn built_in_rules_are_loaded_and_ordered() {
    let registry = RuleRegistry::new();
    let names: Vec<String> = registry
        .list_rules(&NameFilter::Any)
        .iter()
        .map(|r| r.name().to_string())
        .collect();
    assert_eq!(names, vec!["email", "fqdn", "ip_v4", "ip_v6", "mac", "url"]);
    for rule in registry.list_rules(&NameFilter::Any) {
        assert!(rule.validate().is_ok(), "built-in {} should hold its own examples", rule.name());
        assert_eq!(rule.kind(), RuleKind::Regex);
    }
}

#[test]
fn custom_rule_with_consistent_examples_registers() {
    let mut registry = RuleRegistry::new();
    let kept = registry.register(resource_request_id()).expect("register");
    assert_eq!(kept.name(), "resource_request_id");
    assert!(registry.get("resource_request_id").is_some());
    assert_eq!(registry.len(), 7);
    assert!(kept.is_match("AR-000000001"));
    assert!(!kept.is_match("AR-12345678"));
}

#[test]
fn nomatch_example_that_matches_is_rejected() {
    let mut registry = RuleRegistry::new();
    let rule = Rule::regex("resource_request_id", r"^AR-\d{9}$")
        .unwrap()
        .with_match_examples(["AR-123456789"])
        .with_nomatch_examples(["AR-987654321"]);
    let err = registry.register(rule).unwrap_err();
    assert!(
        matches!(err, DiscoverxError::InvalidRule { ref rule, .. } if rule == "resource_request_id"),
        "expected InvalidRule, got {err:?}"
    );
    assert!(registry.get("resource_request_id").is_none(), "a rejected rule must not be registered");
}

#[test]
fn match_example_that_fails_is_rejected() {
    let rule = Rule::regex("order_id", r"^ORD-\d+$")
        .unwrap()
        .with_match_examples(["ORD-1", "ord-2"])
        .with_nomatch_examples(["X"]);
    assert!(matches!(rule.validate(), Err(DiscoverxError::InvalidRule { .. })));
}

#[test]
fn malformed_definitions_are_rejected() {
    assert!(matches!(Rule::regex("broken", "(unclosed"), Err(DiscoverxError::InvalidRule { .. })));

    let mut registry = RuleRegistry::new();
    let unsafe_name = Rule::regex("bad-name", "^x$").unwrap().with_match_examples(["x"]).with_nomatch_examples(["y"]);
    assert!(registry.register(unsafe_name).is_err(), "names must be usable as SQL function names");

    let no_examples = Rule::regex("lonely", "^x$").unwrap();
    assert!(registry.register(no_examples).is_err(), "example lists cannot be empty");

    let duplicate = Rule::regex("email", "^x$").unwrap().with_match_examples(["x"]).with_nomatch_examples(["y"]);
    assert!(registry.register(duplicate).is_err(), "built-in names cannot be redefined");
}

#[test]
fn custom_predicate_rules() {
    let luhn = Rule::custom("card_number", |value: &str| {
        let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
        if digits.len() < 12 || digits.len() != value.len() {
            return false;
        }
        let sum: u32 = digits
            .iter()
            .rev()
            .enumerate()
            .map(|(i, d)| if i % 2 == 1 { let x = d * 2; if x > 9 { x - 9 } else { x } } else { *d })
            .sum();
        sum % 10 == 0
    })
    .with_match_examples(["4111111111111111"])
    .with_nomatch_examples(["4111111111111112", "not a card"]);
    let registry = RuleRegistry::with_custom_rules([luhn]).expect("registry");
    let rule = registry.get("card_number").unwrap();
    assert_eq!(rule.kind(), RuleKind::Custom);
    assert_eq!(rule.sql_function(), "dx_rule_card_number");
    assert_eq!(registry.custom_rules().count(), 1);
}

#[test]
fn list_rules_honours_filters() {
    let registry = RuleRegistry::new();
    let ips: Vec<String> = registry
        .list_rules(&NameFilter::parse("ip_*"))
        .iter()
        .map(|r| r.name().to_string())
        .collect();
    assert_eq!(ips, vec!["ip_v4", "ip_v6"]);
    assert_eq!(registry.list_rules(&NameFilter::parse("email,mac")).len(), 2);
    assert_eq!(registry.list_rules(&NameFilter::parse("nothing")).len(), 0);
}

#[test]
fn rules_declared_as_data() {
    let info: RuleInfo = serde_json::from_str(
        r#"{"name": "employee_id", "definition": "^E\\d{5}$",
            "match_examples": ["E12345"], "nomatch_examples": ["E1234"]}"#,
    )
    .expect("json");
    assert_eq!(info.kind, RuleKind::Regex);
    assert_eq!(info.applies_to, TypeClass::String);
    let rule = Rule::try_from(info).expect("rule");
    assert!(rule.validate().is_ok());
    assert_eq!(rule.info().definition.as_deref(), Some(r"^E\d{5}$"));

    let custom: RuleInfo = serde_json::from_str(r#"{"name": "x", "kind": "custom"}"#).unwrap();
    assert!(Rule::try_from(custom).is_err(), "custom rules cannot be declared as data");
}

#[test]
fn rules_only_accept_their_type_class() {
    let email = RuleRegistry::new().get("email").unwrap();
    assert!(email.accepts("STRING"));
    assert!(email.accepts("varchar(255)"));
    assert!(!email.accepts("bigint"));
    assert!(!email.accepts("array<string>"));
    let numeric = Rule::regex("even", "[02468]$").unwrap().applies_to(TypeClass::Numeric);
    assert!(numeric.accepts("decimal(10,2)"));
}
