use rand::seq::SliceRandom;
use rand::Rng;

use crate::storage::types::{Scenario, ScenarioLoad};

/// Picks uniformly among the scenarios with the fewest completed sessions.
///
/// Returns `None` when `loads` is empty.
pub fn pick_balanced_scenario<R: Rng + ?Sized>(
    loads: &[ScenarioLoad],
    rng: &mut R,
) -> Option<Scenario> {
    let min = loads.iter().map(|l| l.completed_count).min()?;
    let candidates: Vec<&ScenarioLoad> = loads
        .iter()
        .filter(|l| l.completed_count == min)
        .collect();
    candidates.choose(rng).map(|l| l.scenario.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn load(id: &str, completed_count: u64) -> ScenarioLoad {
        ScenarioLoad {
            scenario: Scenario {
                id: id.into(),
                title: id.into(),
                description: String::new(),
                short_label: None,
                enabled: true,
            },
            completed_count,
        }
    }

    #[test]
    fn test_empty_input_yields_none() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(pick_balanced_scenario(&[], &mut rng).is_none());
    }

    #[test]
    fn test_never_picks_overserved_scenario() {
        let loads = vec![load("A", 3), load("B", 3), load("C", 5)];
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let picked = pick_balanced_scenario(&loads, &mut rng).unwrap();
            assert_ne!(picked.id, "C");
            seen.insert(picked.id);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_single_minimum_is_deterministic() {
        let loads = vec![load("A", 1), load("B", 0), load("C", 4)];
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert_eq!(pick_balanced_scenario(&loads, &mut rng).unwrap().id, "B");
        }
    }
}
