use printkit_core::Position4;
use printkit_exclusion::{ExclusionFilter, ObjectDefinition, ObjectRegistry};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Mutation {
    Define(String),
    Exclude(String),
    Include(String),
    IncludeAll,
}

fn name() -> impl Strategy<Value = String> {
    "[a-f][0-9]?".prop_map(|s| s.to_uppercase())
}

fn mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        name().prop_map(Mutation::Define),
        name().prop_map(Mutation::Exclude),
        name().prop_map(Mutation::Include),
        Just(Mutation::IncludeAll),
    ]
}

fn is_sorted(names: &[String]) -> bool {
    names.windows(2).all(|w| w[0] < w[1])
}

proptest! {
    #[test]
    fn test_sets_stay_sorted(mutations in prop::collection::vec(mutation(), 0..60)) {
        let mut registry = ObjectRegistry::new(8);
        for m in mutations {
            match m {
                Mutation::Define(n) => { registry.define(ObjectDefinition::new(&n)); }
                Mutation::Exclude(n) => { registry.exclude(&n); }
                Mutation::Include(n) => { registry.include(&n); }
                Mutation::IncludeAll => { registry.include_all(); }
            }
            prop_assert!(is_sorted(&registry.object_names()));
            prop_assert!(is_sorted(&registry.excluded_names()));
            prop_assert!(registry.object_count() <= 8);
        }
    }

    #[test]
    fn test_disabled_registry_ignores_defines(extra in prop::collection::vec(name(), 1..10)) {
        let mut registry = ObjectRegistry::new(1);
        registry.define(ObjectDefinition::new("FIRST"));
        registry.define(ObjectDefinition::new("SECOND"));
        prop_assert!(!registry.enabled());
        for n in extra {
            registry.define(ObjectDefinition::new(&n));
        }
        prop_assert_eq!(registry.object_names(), vec!["FIRST".to_string()]);
    }

    /// Withheld motion is fully accounted for once normal motion resumes
    #[test]
    fn test_offset_conservation(
        printed in prop::collection::vec(-2i32..6, 1..8),
        excluded in prop::collection::vec(-2i32..6, 1..8),
        resume_de in 1i32..4,
    ) {
        let mut filter = ExclusionFilter::new(0);
        let mut e = 0.0;
        let mut max_delivered = 0.0f64;
        for (i, de) in printed.iter().enumerate() {
            e += f64::from(*de);
            max_delivered = max_delivered.max(e);
            filter.apply(Position4::new(i as f64, 0.0, 0.25, e), false);
        }
        let last_delivered_e = e;

        let mut max_suppressed = 0.0f64;
        for (i, de) in excluded.iter().enumerate() {
            e += f64::from(*de);
            max_suppressed = max_suppressed.max(e);
            prop_assert!(filter.apply(Position4::new(100.0 + i as f64, 50.0, 0.25, e), true).is_none());
        }
        let withheld = e - last_delivered_e;
        let adjustment = (max_suppressed - e) - (max_delivered - last_delivered_e);

        // First move back lands on a new XY, so every pending offset resolves
        e += f64::from(resume_de);
        let out = filter
            .apply(Position4::new(-10.0, -10.0, 0.25, e), false)
            .expect("normal move is delivered");

        prop_assert_eq!(filter.offset().x, 0.0);
        prop_assert_eq!(filter.offset().y, 0.0);
        prop_assert_eq!(filter.offset().z, 0.0);
        prop_assert_eq!(filter.pending_adjustment(), 0.0);
        prop_assert_eq!(filter.offset().e, withheld + adjustment);
        prop_assert_eq!(out.e, e - withheld - adjustment);
        prop_assert_eq!((out.x, out.y, out.z), (-10.0, -10.0, 0.25));
    }
}
