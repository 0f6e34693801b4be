use serde::{Deserialize, Serialize};

use crate::config::TaxSection;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TaxBreakdown {
    pub duty: f64,
    pub consumption: f64,
    pub total: f64,
}

/// Jurisdictional tax function over a sub-order's taxable value.
/// Implementations must be monotonically non-decreasing within each
/// bracket of their schedule.
pub trait TaxSchedule: Send + Sync {
    fn assess(&self, subtotal: f64) -> TaxBreakdown;
}

/// Two-bracket import duty plus a consumption tax assessed "inside" the
/// taxed amount: the consumption base is subtotal + duty, and the tax is
/// base / (1 - rate) - base, i.e. tax levied on its own inclusion.
#[derive(Debug, Clone)]
pub struct BracketedSchedule {
    low_rate: f64,
    bracket_boundary: f64,
    high_rate: f64,
    high_deduction: f64,
    consumption_rate: f64,
}

impl BracketedSchedule {
    pub fn new(
        low_rate: f64,
        bracket_boundary: f64,
        high_rate: f64,
        high_deduction: f64,
        consumption_rate: f64,
    ) -> Self {
        Self {
            low_rate,
            bracket_boundary,
            high_rate,
            high_deduction,
            consumption_rate,
        }
    }

    pub fn from_section(section: &TaxSection) -> Self {
        Self::new(
            section.low_rate,
            section.bracket_boundary,
            section.high_rate,
            section.high_deduction,
            section.consumption_rate,
        )
    }
}

impl TaxSchedule for BracketedSchedule {
    fn assess(&self, subtotal: f64) -> TaxBreakdown {
        let subtotal = subtotal.max(0.0);
        let duty = if subtotal <= self.bracket_boundary {
            subtotal * self.low_rate
        } else {
            (subtotal * self.high_rate - self.high_deduction).max(0.0)
        };
        let base = subtotal + duty;
        let consumption = if self.consumption_rate > 0.0 {
            base / (1.0 - self.consumption_rate) - base
        } else {
            0.0
        };
        TaxBreakdown {
            duty,
            consumption,
            total: duty + consumption,
        }
    }
}

/// Single effective rate, no brackets. Matches carts where the observed
/// rate is already known and no boundary applies.
#[derive(Debug, Clone)]
pub struct FlatSchedule {
    rate: f64,
}

impl FlatSchedule {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }
}

impl TaxSchedule for FlatSchedule {
    fn assess(&self, subtotal: f64) -> TaxBreakdown {
        let duty = subtotal.max(0.0) * self.rate;
        TaxBreakdown {
            duty,
            consumption: 0.0,
            total: duty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> BracketedSchedule {
        BracketedSchedule::new(0.20, 50.0, 0.60, 20.0, 0.17)
    }

    #[test]
    fn low_bracket_is_flat_rate_plus_consumption() {
        let breakdown = schedule().assess(40.0);
        assert!((breakdown.duty - 8.0).abs() < 1e-9);
        let base = 48.0;
        let expected_consumption = base / (1.0 - 0.17) - base;
        assert!((breakdown.consumption - expected_consumption).abs() < 1e-9);
        assert!((breakdown.total - (breakdown.duty + breakdown.consumption)).abs() < 1e-12);
    }

    #[test]
    fn high_bracket_applies_deduction() {
        let breakdown = schedule().assess(100.0);
        assert!((breakdown.duty - 40.0).abs() < 1e-9);
    }

    #[test]
    fn deduction_never_drives_duty_negative() {
        let schedule = BracketedSchedule::new(0.20, 50.0, 0.60, 60.0, 0.0);
        let breakdown = schedule.assess(51.0);
        assert_eq!(breakdown.duty, 0.0);
    }

    #[test]
    fn monotone_within_each_bracket() {
        let schedule = schedule();
        let mut previous = f64::MIN;
        // Low bracket.
        for step in 0..=100 {
            let total = schedule.assess(step as f64 * 0.5).total;
            assert!(total >= previous);
            previous = total;
        }
        previous = f64::MIN;
        // High bracket.
        for step in 0..=100 {
            let total = schedule.assess(51.0 + step as f64).total;
            assert!(total >= previous);
            previous = total;
        }
    }

    #[test]
    fn flat_schedule_has_no_consumption_component() {
        let breakdown = FlatSchedule::new(0.45).assess(60.0);
        assert!((breakdown.total - 27.0).abs() < 1e-9);
        assert_eq!(breakdown.consumption, 0.0);
    }
}
