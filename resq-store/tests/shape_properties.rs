//! Property-based tests for shape composition.

use proptest::prelude::*;
use resq_store::{ConstructionContext, FieldValidator, Shape};
use resq_store::validators::{any, string};
use std::collections::HashSet;

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-e]{1,2}", 0..8)
}

fn shape_of(names: &[String]) -> Shape {
    names
        .iter()
        .fold(Shape::new(), |shape, name| shape.field(name.clone(), any()))
}

fn distinct_in_order(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|n| seen.insert(n.clone()))
        .collect()
}

// =============================================================================
// EXTENSION PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn extension_is_ordered_union(base in names_strategy(), extra in names_strategy()) {
        let merged = shape_of(&base).extend(&shape_of(&extra));
        let expected = distinct_in_order(base.iter().chain(extra.iter()).cloned());

        let names: Vec<String> = merged.names().map(str::to_string).collect();
        prop_assert_eq!(names, expected);
    }

    #[test]
    fn extension_leaves_operands_untouched(base in names_strategy(), extra in names_strategy()) {
        let left = shape_of(&base);
        let right = shape_of(&extra);
        let _ = left.extend(&right);

        prop_assert_eq!(left.len(), distinct_in_order(base).len());
        prop_assert_eq!(right.len(), distinct_in_order(extra).len());
    }

    #[test]
    fn extension_with_empty_is_identity(base in names_strategy()) {
        let shape = shape_of(&base);
        let merged = shape.extend(&Shape::new());

        prop_assert_eq!(
            merged.names().collect::<Vec<_>>(),
            shape.names().collect::<Vec<_>>()
        );
    }

    #[test]
    fn later_declaration_wins(name in "[a-e]{1,2}") {
        let base = Shape::new().field(name.clone(), string());
        let merged = base.extend(&Shape::new().field(name.clone(), any()));
        let validator = merged.get(&name).expect("field present");

        let mut ctx = ConstructionContext::new();
        prop_assert!(validator.validate(&serde_json::json!(1), &mut ctx).is_ok());
        prop_assert!(merged.contains(&name));
        prop_assert_eq!(merged.len(), 1);
    }
}
