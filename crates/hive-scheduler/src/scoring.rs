use crate::config::SchedulerConfig;
use crate::registry::WorkerRecord;

/// Ranks eligible workers for a task. The highest score wins.
pub trait ScoringStrategy: Send + Sync {
    fn score(&self, worker: &WorkerRecord) -> f64;
}

/// `load_weight × (1 − load/capacity) + performance_weight × success_rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedScore {
    pub load_weight: f64,
    pub performance_weight: f64,
}

impl WeightedScore {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            load_weight: config.load_weight,
            performance_weight: config.performance_weight,
        }
    }
}

impl Default for WeightedScore {
    fn default() -> Self {
        Self {
            load_weight: 0.6,
            performance_weight: 0.4,
        }
    }
}

impl ScoringStrategy for WeightedScore {
    fn score(&self, worker: &WorkerRecord) -> f64 {
        let load_score = 1.0 - worker.load_ratio();
        self.load_weight * load_score
            + self.performance_weight * worker.performance_metrics.success_rate
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn worker(load: usize, capacity: usize, success_rate: f64) -> WorkerRecord {
        let mut w = WorkerRecord::new("w", "t", Vec::new(), capacity, success_rate, Utc::now());
        w.current_load = load;
        w
    }

    #[test]
    fn test_idle_perfect_worker_scores_one() {
        let score = WeightedScore::default().score(&worker(0, 4, 1.0));
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_formula() {
        // 0.6 * (1 - 1/4) + 0.4 * 0.5 = 0.45 + 0.2
        let score = WeightedScore::default().score(&worker(1, 4, 0.5));
        assert!((score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_lighter_load_wins_at_equal_performance() {
        let scorer = WeightedScore::default();
        assert!(scorer.score(&worker(0, 2, 0.8)) > scorer.score(&worker(1, 2, 0.8)));
    }

    #[test]
    fn test_weights_from_config() {
        let config = SchedulerConfig {
            load_weight: 0.0,
            performance_weight: 1.0,
            ..SchedulerConfig::default()
        };
        let scorer = WeightedScore::from_config(&config);
        assert!((scorer.score(&worker(3, 4, 0.9)) - 0.9).abs() < 1e-9);
    }
}
