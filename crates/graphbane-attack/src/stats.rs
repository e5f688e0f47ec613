//! Per-epoch attack statistics.

use serde::Serialize;

use crate::projection::ProjectionScalars;

/// One row of the optimization trace.
#[derive(Debug, Clone, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    /// Relaxed attack loss at the start of the epoch.
    pub loss: f32,
    /// Discrete success metric; only evaluated when best-epoch tracking
    /// is enabled.
    pub metric: Option<f32>,
    /// Total probability mass right after the gradient step.
    pub prob_mass_after_update: f32,
    /// Total probability mass after projection onto the budget simplex.
    pub prob_mass_after_projection: f32,
    /// Entries with weight above the numerical floor after projection.
    pub nonzero_weights: usize,
    /// Largest single weight after projection.
    pub max_weight: f32,
}

/// Append-only optimization trace, cleared on every attack run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttackStatistics {
    epochs: Vec<EpochStats>,
}

impl AttackStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.epochs.clear();
    }

    pub fn record(
        &mut self,
        epoch: usize,
        loss: f32,
        metric: Option<f32>,
        mass_after_update: f32,
        projection: &ProjectionScalars,
    ) {
        self.epochs.push(EpochStats {
            epoch,
            loss,
            metric,
            prob_mass_after_update: mass_after_update,
            prob_mass_after_projection: projection.mass_after,
            nonzero_weights: projection.nonzero,
            max_weight: projection.max_weight,
        });
    }

    pub fn epochs(&self) -> &[EpochStats] {
        &self.epochs
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    /// Loss of the most recent epoch, if any.
    pub fn last_loss(&self) -> Option<f32> {
        self.epochs.last().map(|e| e.loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalars(after: f32, nonzero: usize, max_weight: f32) -> ProjectionScalars {
        ProjectionScalars {
            mass_before: after + 1.0,
            mass_after: after,
            nonzero,
            max_weight,
        }
    }

    #[test]
    fn test_record_appends_in_order() {
        let mut stats = AttackStatistics::new();
        stats.record(0, 1.25, None, 3.0, &scalars(2.0, 7, 0.9));
        stats.record(1, 1.5, Some(0.8), 2.5, &scalars(2.0, 5, 1.0));
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.epochs()[0].epoch, 0);
        assert_eq!(stats.epochs()[1].metric, Some(0.8));
        assert_eq!(stats.last_loss(), Some(1.5));
    }

    #[test]
    fn test_clear_resets_trace() {
        let mut stats = AttackStatistics::new();
        stats.record(0, 0.0, None, 0.0, &scalars(0.0, 0, 0.0));
        stats.clear();
        assert!(stats.is_empty());
        assert_eq!(stats.last_loss(), None);
    }

    #[test]
    fn test_serializes_to_json_rows() {
        let mut stats = AttackStatistics::new();
        stats.record(3, 0.5, None, 1.5, &scalars(1.0, 2, 0.6));
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"epoch\":3"));
        assert!(json.contains("\"prob_mass_after_projection\":1.0"));
    }
}
