//! Property-based tests (fuzzing) for query handling and document encoding.
//!
//! Uses proptest to generate random/malformed inputs and verify the parser
//! and translator never panic, and that encoding keeps custom properties
//! intact.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::Value;

use search_sync::codec::flatten_properties;
use search_sync::search::{nested_key, parse_query};
use search_sync::{DocumentCodec, DomainObject, Pager, PropertyValue, QueryTranslator};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Property values with integer numbers only, so JSON text round trips exactly.
fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    let leaf = prop_oneof![
        Just(PropertyValue::Null),
        any::<bool>().prop_map(PropertyValue::Bool),
        any::<i64>().prop_map(PropertyValue::from),
        "[a-zA-Z0-9 ]{0,20}".prop_map(PropertyValue::from),
    ];

    leaf.prop_recursive(
        3,  // depth
        32, // max nodes
        5,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..5).prop_map(PropertyValue::List),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..5).prop_map(PropertyValue::Map),
            ]
        },
    )
}

fn properties_strategy() -> impl Strategy<Value = BTreeMap<String, PropertyValue>> {
    prop::collection::btree_map("[a-z]{1,8}", property_value_strategy(), 0..6)
}

/// Query-language fragments glued together, valid or not.
fn query_fragment_strategy() -> impl Strategy<Value = String> {
    let fragment = prop_oneof![
        Just("AND".to_string()),
        Just("OR".to_string()),
        Just("NOT".to_string()),
        Just("(".to_string()),
        Just(")".to_string()),
        Just("*".to_string()),
        Just("[1 TO 5]".to_string()),
        Just("{a TO *}".to_string()),
        Just("\"quoted phrase\"".to_string()),
        "[a-z]{1,6}".prop_map(|w| w),
        "properties\\.[a-z]{1,6}:[a-z0-9*?~]{1,6}".prop_map(|w| w),
        "[a-z]{1,6}:[a-z0-9]{1,6}\\^[0-9]".prop_map(|w| w),
    ];
    prop::collection::vec(fragment, 0..12).prop_map(|parts| parts.join(" "))
}

fn scalar_leaves(value: &PropertyValue) -> usize {
    match value {
        PropertyValue::Null => 0,
        PropertyValue::List(items) => items.iter().map(scalar_leaves).sum(),
        PropertyValue::Map(map) => map.values().map(scalar_leaves).sum(),
        _ => 1,
    }
}

// =============================================================================
// Query Parsing Fuzz Tests
// =============================================================================

proptest! {
    /// The parser returns an error instead of panicking on any input
    #[test]
    fn fuzz_parse_query_arbitrary_text(input in ".{0,200}") {
        let _ = parse_query(&input);
    }

    /// Near-valid query language input never panics either
    #[test]
    fn fuzz_parse_query_fragments(input in query_fragment_strategy()) {
        let _ = parse_query(&input);
    }

    /// The translator always produces something to send (or a clean None)
    #[test]
    fn fuzz_search_query_never_panics(input in query_fragment_strategy(), nested in any::<bool>()) {
        let translator = QueryTranslator::new(nested);
        if let Some(query) = translator.search_query(&input) {
            prop_assert!(query.to_json().is_object());
        }
    }

    /// Valid query strings parse
    #[test]
    fn prop_valid_query_strings_parse(input in query_fragment_strategy()) {
        let translator = QueryTranslator::new(true);
        let trimmed = input.trim();
        if translator.is_valid_query_string(&input) && trimmed != "*" {
            prop_assert!(parse_query(trimmed).is_ok());
        }
    }
}

// =============================================================================
// Nested Key Tests
// =============================================================================

proptest! {
    /// Flattened keys have no path separators or brackets left
    #[test]
    fn prop_nested_key_is_flat(
        path in "[a-z]{1,8}(\\.[a-z]{1,8}|\\[[0-9]{1,3}\\]){0,4}",
        prefixed in any::<bool>(),
    ) {
        let key = if prefixed { format!("properties.{path}") } else { path.clone() };
        let flat = nested_key(&key);
        prop_assert!(!flat.contains('.'));
        prop_assert!(!flat.contains('['));
        prop_assert!(!flat.contains(']'));
        prop_assert_eq!(flat, nested_key(&path));
    }
}

// =============================================================================
// Document Encoding Tests
// =============================================================================

proptest! {
    /// One `{k, v|vn}` entry per non-null scalar leaf
    #[test]
    fn prop_flatten_emits_one_entry_per_leaf(props in properties_strategy()) {
        let entries = flatten_properties(&props);
        let expected: usize = props.values().map(scalar_leaves).sum();
        prop_assert_eq!(entries.len(), expected);
        for entry in &entries {
            let key = entry["k"].as_str().unwrap_or_default();
            prop_assert!(!key.is_empty());
            prop_assert!(entry.get("v").is_some() != entry.get("vn").is_some());
            if let Some(vn) = entry.get("vn") {
                prop_assert!(matches!(vn, Value::Number(_)));
            }
        }
    }

    /// Decoding an encoded object restores its properties exactly
    #[test]
    fn prop_codec_restores_properties(props in properties_strategy(), nested in any::<bool>()) {
        let codec = DocumentCodec::new(nested);
        let mut obj = DomainObject::new("1", "thing", "app");
        obj.properties = props;
        let doc = codec.encode(&obj).unwrap();
        let back = codec.decode(doc).unwrap();
        prop_assert_eq!(back.properties, obj.properties);
    }
}

// =============================================================================
// Paging Tests
// =============================================================================

proptest! {
    /// Offsets never overflow and stay zero outside the page window
    #[test]
    fn prop_pager_start_is_bounded(page in any::<u64>(), limit in 0usize..10_000, max_pages in 1u64..20_000) {
        let pager = Pager::new(limit).with_page(page);
        let start = pager.start(max_pages);
        if page == 0 || page > max_pages {
            prop_assert_eq!(start, 0);
        } else {
            prop_assert_eq!(start, ((page - 1) as usize).saturating_mul(limit));
        }
    }
}
