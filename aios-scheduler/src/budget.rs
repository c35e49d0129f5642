//! Resource budget guardrail (ambient addition, generalized from the
//! reference architecture's fixed per-action tick budget into a process-wide
//! headroom-fraction budget consulted by the Action Queue's fifth
//! guardrail).

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    /// Total headroom available, in whatever unit the host chooses to
    /// consume against (CPU-seconds, in-flight byte count, ...).
    pub ceiling: f64,
    /// Fraction of `ceiling` at or above which `under_pressure` trips.
    pub pressure_fraction: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { ceiling: 100.0, pressure_fraction: 0.9 }
    }
}

/// Tracks consumption against a ceiling; the host application calls
/// `consume`/`release` as it observes resource usage, and the Action Queue
/// consults `under_pressure` before guardrail 5 runs.
pub struct ResourceBudget {
    config: BudgetConfig,
    consumed: Mutex<f64>,
}

impl ResourceBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config, consumed: Mutex::new(0.0) }
    }

    pub fn consume(&self, amount: f64) {
        *self.consumed.lock() += amount;
    }

    pub fn release(&self, amount: f64) {
        let mut consumed = self.consumed.lock();
        *consumed = (*consumed - amount).max(0.0);
    }

    pub fn consumed(&self) -> f64 {
        *self.consumed.lock()
    }

    pub fn ceiling(&self) -> f64 {
        self.config.ceiling
    }

    pub fn under_pressure(&self) -> bool {
        if self.config.ceiling <= 0.0 {
            return false;
        }
        *self.consumed.lock() / self.config.ceiling >= self.config.pressure_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_ceiling_is_not_under_pressure() {
        let budget = ResourceBudget::new(BudgetConfig { ceiling: 100.0, pressure_fraction: 0.9 });
        budget.consume(50.0);
        assert!(!budget.under_pressure());
    }

    #[test]
    fn crossing_pressure_fraction_trips() {
        let budget = ResourceBudget::new(BudgetConfig { ceiling: 100.0, pressure_fraction: 0.9 });
        budget.consume(95.0);
        assert!(budget.under_pressure());
    }

    #[test]
    fn release_lowers_consumption_and_clears_pressure() {
        let budget = ResourceBudget::new(BudgetConfig { ceiling: 100.0, pressure_fraction: 0.9 });
        budget.consume(95.0);
        budget.release(50.0);
        assert!(!budget.under_pressure());
        assert_eq!(budget.consumed(), 45.0);
    }

    #[test]
    fn release_never_goes_negative() {
        let budget = ResourceBudget::new(BudgetConfig::default());
        budget.release(10.0);
        assert_eq!(budget.consumed(), 0.0);
    }
}
