//! Double-entry balance engine.
//!
//! # Responsibility
//! - Sum debit and credit `line_amount` values of ledger lines.
//! - Reject entries whose totals differ by more than the tolerance.
//!
//! # Invariants
//! - Every line of a ledger entry declares `line_data.side`.
//! - `|debit_total - credit_total| <= epsilon` for every committed entry.

use crate::model::transaction::{LedgerSide, TransactionLine};
use crate::smart_code::registry::{GuardViolation, SmartCodeBehavior, TransactionGuard};

/// Absorbs binary rounding of decimal sums on top of the configured epsilon.
const FLOAT_SLACK: f64 = 1e-9;

/// Debit and credit sums of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LedgerTotals {
    pub debit_total: f64,
    pub credit_total: f64,
}

impl LedgerTotals {
    pub fn difference(&self) -> f64 {
        (self.debit_total - self.credit_total).abs()
    }

    pub fn is_balanced(&self, epsilon: f64) -> bool {
        self.difference() <= epsilon + FLOAT_SLACK
    }
}

/// Sums ledger lines by side.
pub fn ledger_totals(lines: &[TransactionLine]) -> Result<LedgerTotals, GuardViolation> {
    let mut totals = LedgerTotals::default();
    for line in lines {
        let side = line.side().map_err(|raw| GuardViolation::InvalidLine {
            line_number: line.line_number,
            message: format!("ledger side must be DR or CR, got {raw}"),
        })?;
        match side {
            Some(LedgerSide::Debit) => totals.debit_total += line.line_amount,
            Some(LedgerSide::Credit) => totals.credit_total += line.line_amount,
            None => {
                return Err(GuardViolation::InvalidLine {
                    line_number: line.line_number,
                    message: "ledger line is missing line_data.side".to_string(),
                })
            }
        }
    }
    Ok(totals)
}

/// Checks that debits equal credits within `epsilon`.
pub fn check_balance(
    lines: &[TransactionLine],
    epsilon: f64,
) -> Result<LedgerTotals, GuardViolation> {
    let totals = ledger_totals(lines)?;
    if !totals.is_balanced(epsilon) {
        return Err(GuardViolation::Unbalanced {
            debit_total: totals.debit_total,
            credit_total: totals.credit_total,
        });
    }
    Ok(totals)
}

/// Built-in handler for `SmartCodeBehavior::LedgerBalance`.
#[derive(Debug, Clone, Copy)]
pub struct LedgerBalanceGuard {
    epsilon: f64,
}

impl LedgerBalanceGuard {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }
}

impl TransactionGuard for LedgerBalanceGuard {
    fn behavior(&self) -> SmartCodeBehavior {
        SmartCodeBehavior::LedgerBalance
    }

    fn check(&self, lines: &[TransactionLine]) -> Result<(), GuardViolation> {
        check_balance(lines, self.epsilon).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::{check_balance, ledger_totals};
    use crate::model::transaction::TransactionLine;
    use crate::smart_code::registry::GuardViolation;
    use serde_json::json;
    use uuid::Uuid;

    fn line(number: i64, side: &str, amount: f64) -> TransactionLine {
        TransactionLine {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            transaction_id: Uuid::nil(),
            line_number: number,
            line_type: "GL".to_string(),
            entity_id: None,
            description: None,
            quantity: 1.0,
            unit_amount: amount,
            line_amount: amount,
            smart_code: None,
            line_data: json!({ "side": side }),
            created_at: 0,
        }
    }

    #[test]
    fn balanced_entry_passes() {
        let lines = vec![line(1, "DR", 100.0), line(2, "CR", 60.0), line(3, "cr", 40.0)];
        let totals = check_balance(&lines, 0.01).expect("balanced");
        assert_eq!(totals.debit_total, 100.0);
        assert_eq!(totals.credit_total, 100.0);
    }

    #[test]
    fn float_noise_within_tolerance_passes() {
        let lines = vec![
            line(1, "DR", 0.1),
            line(2, "DR", 0.2),
            line(3, "CR", 0.3),
            line(4, "CR", 0.005),
        ];
        assert!(check_balance(&lines, 0.01).is_ok());
    }

    #[test]
    fn unbalanced_entry_fails_with_totals() {
        let lines = vec![line(1, "DR", 100.0), line(2, "CR", 99.0)];
        let err = check_balance(&lines, 0.01).expect_err("unbalanced");
        assert_eq!(
            err,
            GuardViolation::Unbalanced {
                debit_total: 100.0,
                credit_total: 99.0
            }
        );
    }

    #[test]
    fn missing_or_unknown_side_is_rejected() {
        let mut missing = line(2, "CR", 10.0);
        missing.line_data = json!({});
        let err = ledger_totals(&[line(1, "DR", 10.0), missing]).expect_err("missing side");
        assert!(matches!(err, GuardViolation::InvalidLine { line_number: 2, .. }));

        let err = ledger_totals(&[line(1, "debit", 10.0)]).expect_err("unknown side");
        assert!(matches!(err, GuardViolation::InvalidLine { line_number: 1, .. }));
    }
}
