use proptest::prelude::*;
use tally_sim::{SimulationConfig, Simulator};

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(16))]

    #[test]
    fn every_seed_replays_identically(seed in any::<u64>(), failure_percent in 0u8..=60) {
        let config = SimulationConfig {
            seed,
            steps: 20,
            failure_percent,
            ..SimulationConfig::default()
        };
        let first = Simulator::new(config.clone()).expect("sim").run().expect("run");
        let second = Simulator::new(config).expect("sim").run().expect("run");
        prop_assert_eq!(first.trace, second.trace);
        prop_assert_eq!(first.final_state, second.final_state);
        prop_assert_eq!(first.counters, second.counters);
    }

    #[test]
    fn rejecting_everything_leaves_only_annotations(seed in any::<u64>()) {
        let config = SimulationConfig {
            seed,
            steps: 15,
            failure_percent: 100,
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("sim").run().expect("run");
        prop_assert_eq!(result.counters.accepted, 0);
        prop_assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        let only_annotations = result.final_state.keys().all(|k| {
            k.starts_with("personalDetails") || k.starts_with("policy") || k.contains("Errors")
        });
        prop_assert!(only_annotations);
    }
}
