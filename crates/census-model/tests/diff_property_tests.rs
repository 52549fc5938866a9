use std::collections::BTreeSet;

use census_model::{compute_diff, CitizenId, RelativeOp};
use proptest::prelude::*;

fn id_set() -> impl Strategy<Value = BTreeSet<CitizenId>> {
    // Small id space so old/new overlap often.
    proptest::collection::btree_set(0u64..24, 0..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn diff_is_the_two_set_differences(old in id_set(), new in id_set()) {
        let diff = compute_diff(&old, &new);
        let expected_add: BTreeSet<_> = new.difference(&old).copied().collect();
        let expected_remove: BTreeSet<_> = old.difference(&new).copied().collect();
        prop_assert_eq!(&diff.to_add, &expected_add);
        prop_assert_eq!(&diff.to_remove, &expected_remove);
        prop_assert!(diff.to_add.is_disjoint(&diff.to_remove));
    }

    #[test]
    fn applying_the_diff_reaches_the_new_set(old in id_set(), new in id_set()) {
        let diff = compute_diff(&old, &new);
        let mut current = old.clone();
        for (op, ids) in diff.operations() {
            match op {
                RelativeOp::Add => current.extend(ids.iter().copied()),
                RelativeOp::Remove => current.retain(|id| !ids.contains(id)),
            }
        }
        prop_assert_eq!(current, new);
    }

    #[test]
    fn second_round_is_a_no_op(old in id_set(), new in id_set()) {
        let _first = compute_diff(&old, &new);
        let second = compute_diff(&new, &new);
        prop_assert!(second.is_empty());
        prop_assert_eq!(second.operations().count(), 0);
    }

    #[test]
    fn reversed_diff_swaps_sides(old in id_set(), new in id_set()) {
        let forward = compute_diff(&old, &new);
        let backward = compute_diff(&new, &old);
        prop_assert_eq!(forward.to_add, backward.to_remove);
        prop_assert_eq!(forward.to_remove, backward.to_add);
    }
}
