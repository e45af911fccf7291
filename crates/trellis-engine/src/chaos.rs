//! Seeded fault injection for chaos mode.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use trellis_config::ChaosConfig;

/// Injects input faults using an explicit per-run RNG.
///
/// The RNG is owned here and threaded through the run rather than
/// seeded globally, so concurrent runs with different seeds never
/// interfere. With a fixed seed every drop/corrupt decision is fully
/// reproducible; input maps iterate in key order, so key selection is
/// deterministic too.
#[derive(Debug)]
pub struct ChaosInjector {
  rng: StdRng,
  drop_rate: f64,
  corrupt_rate: f64,
}

impl ChaosInjector {
  pub fn new(seed: Option<u64>, config: &ChaosConfig) -> Self {
    let rng = match seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    Self {
      rng,
      drop_rate: config.drop_rate,
      corrupt_rate: config.corrupt_rate,
    }
  }

  /// Possibly drop one random input key, then possibly corrupt one
  /// random input value.
  pub fn inject(&mut self, input: &mut Map<String, Value>) {
    if self.rng.r#gen::<f64>() < self.drop_rate {
      let keys: Vec<String> = input.keys().cloned().collect();
      if !keys.is_empty() {
        let victim = &keys[self.rng.gen_range(0..keys.len())];
        input.remove(victim);
      }
    }

    if self.rng.r#gen::<f64>() < self.corrupt_rate {
      let keys: Vec<String> = input.keys().cloned().collect();
      if !keys.is_empty() {
        let victim = keys[self.rng.gen_range(0..keys.len())].clone();
        input.insert(victim, Value::String("CORRUPTED_VALUE".to_string()));
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn input() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("a".to_string(), json!(1));
    map.insert("b".to_string(), json!(2));
    map.insert("c".to_string(), json!(3));
    map
  }

  #[test]
  fn test_same_seed_same_decisions() {
    let config = ChaosConfig {
      drop_rate: 0.5,
      corrupt_rate: 0.5,
    };

    let run = |seed| {
      let mut injector = ChaosInjector::new(Some(seed), &config);
      let mut data = input();
      for _ in 0..10 {
        injector.inject(&mut data);
      }
      data
    };

    assert_eq!(run(7), run(7));
  }

  #[test]
  fn test_drop_rate_one_always_drops() {
    let config = ChaosConfig {
      drop_rate: 1.0,
      corrupt_rate: 0.0,
    };
    let mut injector = ChaosInjector::new(Some(7), &config);
    let mut data = input();
    injector.inject(&mut data);
    assert_eq!(data.len(), 2);
  }

  #[test]
  fn test_zero_rates_leave_input_untouched() {
    let config = ChaosConfig {
      drop_rate: 0.0,
      corrupt_rate: 0.0,
    };
    let mut injector = ChaosInjector::new(Some(7), &config);
    let mut data = input();
    injector.inject(&mut data);
    assert_eq!(data, input());
  }

  #[test]
  fn test_corrupt_rate_one_marks_a_value() {
    let config = ChaosConfig {
      drop_rate: 0.0,
      corrupt_rate: 1.0,
    };
    let mut injector = ChaosInjector::new(Some(3), &config);
    let mut data = input();
    injector.inject(&mut data);
    assert!(data.values().any(|v| v == &json!("CORRUPTED_VALUE")));
  }

  #[test]
  fn test_empty_input_is_safe() {
    let config = ChaosConfig {
      drop_rate: 1.0,
      corrupt_rate: 1.0,
    };
    let mut injector = ChaosInjector::new(Some(1), &config);
    let mut data = Map::new();
    injector.inject(&mut data);
    assert!(data.is_empty());
  }
}
