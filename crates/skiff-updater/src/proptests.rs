//! Property-based tests for skiff-updater.
//!
//! # Properties Tested
//!
//! - Merge is idempotent
//! - Merge never changes a user-set value
//! - Every template key is present after a merge
//! - Documents survive a round trip through TOML
//! - The scheduler never waits less than the configured interval

use std::time::Duration;

use proptest::prelude::*;

use crate::merge::{merge, ConfigDocument, FieldValue, ParseOptions, Section};
use crate::scheduler::UpdateScheduler;

// =============================================================================
// Generators
// =============================================================================

fn arb_name() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-d]{1,2}",
        "[a-z][a-z0-9_-]{0,6}",
        // Names that need quoting.
        "[a-z]{1,3}[ .][a-z]{1,3}",
    ]
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof!["[a-zA-Z0-9 ._-]{0,12}", "\\PC{0,8}"]
}

fn arb_field() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        arb_text().prop_map(FieldValue::Default),
        arb_text().prop_map(FieldValue::UserSet),
        Just(FieldValue::unset()),
        arb_text().prop_map(|h| FieldValue::Unset { hint: Some(h) }),
    ]
}

fn arb_template_field() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        3 => arb_text().prop_map(FieldValue::Default),
        1 => Just(FieldValue::unset()),
    ]
}

fn arb_document(field: BoxedStrategy<FieldValue>) -> impl Strategy<Value = ConfigDocument> {
    prop::collection::vec(
        (arb_name(), prop::collection::vec((arb_name(), field), 0..5)),
        0..4,
    )
    .prop_map(|sections| {
        let mut doc = ConfigDocument::new();
        for (name, entries) in sections {
            if doc.section(&name).is_some() {
                continue;
            }
            let mut section = Section::new(name);
            for (key, value) in entries {
                section.set(key, value);
            }
            doc.push_section(section);
        }
        doc
    })
}

fn arb_live() -> impl Strategy<Value = ConfigDocument> {
    arb_document(arb_field().boxed())
}

fn arb_template() -> impl Strategy<Value = ConfigDocument> {
    arb_document(arb_template_field().boxed())
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_merge_idempotent(live in arb_live(), template in arb_template()) {
        let once = merge(&live, &template);
        let twice = merge(&once, &template);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_user_values_untouched(live in arb_live(), template in arb_template()) {
        let merged = merge(&live, &template);
        for section in live.sections() {
            for (key, value) in &section.entries {
                if let FieldValue::UserSet(_) = value {
                    prop_assert_eq!(merged.get(&section.name, key), Some(value));
                }
            }
        }
    }

    #[test]
    fn prop_template_keys_present(live in arb_live(), template in arb_template()) {
        let merged = merge(&live, &template);
        for section in template.sections() {
            for (key, _) in &section.entries {
                prop_assert!(merged.get(&section.name, key).is_some());
            }
        }
    }

    #[test]
    fn prop_live_only_keys_preserved(live in arb_live(), template in arb_template()) {
        let merged = merge(&live, &template);
        for section in live.sections() {
            for (key, value) in &section.entries {
                if template.get(&section.name, key).is_none() {
                    prop_assert_eq!(merged.get(&section.name, key), Some(value));
                }
            }
        }
    }

    #[test]
    fn prop_toml_round_trip(doc in arb_live()) {
        let text = doc.to_toml_string();
        let parsed = ConfigDocument::parse_live(&text, &ParseOptions::default()).unwrap();
        prop_assert_eq!(parsed, doc);
    }

    #[test]
    fn prop_backoff_never_below_interval(
        interval_h in 1u64..48,
        extra_h in 0u64..200,
        failures in 0usize..40,
    ) {
        let interval = Duration::from_secs(interval_h * 3600);
        let max_backoff = interval + Duration::from_secs(extra_h * 3600);
        let mut scheduler = UpdateScheduler::new(interval, max_backoff);
        for _ in 0..failures {
            scheduler.record_network_result(false);
        }

        let effective = scheduler.effective_interval();
        prop_assert!(effective >= interval);
        prop_assert!(effective <= max_backoff.mul_f64(1.1));
    }
}
