//! Smart code behavior registry.
//!
//! # Responsibility
//! - Map segment sequences to engine behaviors (ledger balance, active edge).
//! - Hold the strategy handlers that enforce transaction-level behaviors.
//!
//! # Invariants
//! - Rule segment sequences are non-empty and unique.
//! - Classification depends only on registered rules, never on vertical names.

use crate::ledger::LedgerBalanceGuard;
use crate::model::transaction::TransactionLine;
use crate::smart_code::code::SmartCode;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Default ledger tolerance for debit/credit comparison.
pub const DEFAULT_LEDGER_EPSILON: f64 = 0.01;

/// Behaviors a smart code can switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SmartCodeBehavior {
    /// Transaction lines must balance debits against credits.
    LedgerBalance,
    /// Relationship writes swap the single active edge of `(from, type)`.
    ActiveEdge,
}

impl SmartCodeBehavior {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LedgerBalance => "ledger_balance",
            Self::ActiveEdge => "active_edge",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "ledger_balance" => Some(Self::LedgerBalance),
            "active_edge" => Some(Self::ActiveEdge),
            _ => None,
        }
    }
}

/// One `segments -> behavior` rule, e.g. `FIN.GL -> LedgerBalance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorRule {
    pub segments: Vec<String>,
    pub behavior: SmartCodeBehavior,
}

/// Violation reported by a transaction guard.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardViolation {
    Unbalanced {
        debit_total: f64,
        credit_total: f64,
    },
    InvalidLine {
        line_number: i64,
        message: String,
    },
}

impl Display for GuardViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbalanced {
                debit_total,
                credit_total,
            } => write!(
                f,
                "ledger entry is unbalanced: debit total {debit_total:.2} != credit total {credit_total:.2}"
            ),
            Self::InvalidLine {
                line_number,
                message,
            } => write!(f, "line {line_number}: {message}"),
        }
    }
}

impl Error for GuardViolation {}

/// Strategy enforced on transaction lines before they are committed.
pub trait TransactionGuard: Send + Sync {
    fn behavior(&self) -> SmartCodeBehavior;
    fn check(&self, lines: &[TransactionLine]) -> Result<(), GuardViolation>;
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    EmptyRule,
    InvalidSegment(String),
    DuplicateRule(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRule => write!(f, "smart code rule must name at least one segment"),
            Self::InvalidSegment(value) => {
                write!(f, "smart code rule segment is invalid: {value}")
            }
            Self::DuplicateRule(value) => write!(f, "smart code rule already registered: {value}"),
        }
    }
}

impl Error for RegistryError {}

/// Prefix/segment keyed registry of behaviors and their handlers.
pub struct SmartCodeRegistry {
    rules: Vec<BehaviorRule>,
    guards: BTreeMap<SmartCodeBehavior, Box<dyn TransactionGuard>>,
}

impl Default for SmartCodeRegistry {
    fn default() -> Self {
        Self::with_defaults(DEFAULT_LEDGER_EPSILON)
    }
}

impl SmartCodeRegistry {
    /// Creates a registry without rules or guards.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            guards: BTreeMap::new(),
        }
    }

    /// Registers the built-in rules: `GL` and `FIN.GL` balance, `WORKFLOW`
    /// swaps active edges.
    pub fn with_defaults(ledger_epsilon: f64) -> Self {
        let mut registry = Self::empty();
        registry.rules = vec![
            BehaviorRule {
                segments: vec!["GL".to_string()],
                behavior: SmartCodeBehavior::LedgerBalance,
            },
            BehaviorRule {
                segments: vec!["FIN".to_string(), "GL".to_string()],
                behavior: SmartCodeBehavior::LedgerBalance,
            },
            BehaviorRule {
                segments: vec!["WORKFLOW".to_string()],
                behavior: SmartCodeBehavior::ActiveEdge,
            },
        ];
        registry.register_guard(Box::new(LedgerBalanceGuard::new(ledger_epsilon)));
        registry
    }

    /// Registers one rule from dotted segment text, e.g. `"FIN.AP"`.
    pub fn register_rule(
        &mut self,
        segments: &str,
        behavior: SmartCodeBehavior,
    ) -> Result<(), RegistryError> {
        let parsed = parse_rule_segments(segments)?;
        if self.rules.iter().any(|rule| rule.segments == parsed) {
            return Err(RegistryError::DuplicateRule(segments.trim().to_string()));
        }
        self.rules.push(BehaviorRule {
            segments: parsed,
            behavior,
        });
        Ok(())
    }

    /// Installs (or replaces) the handler for one behavior.
    pub fn register_guard(&mut self, guard: Box<dyn TransactionGuard>) {
        self.guards.insert(guard.behavior(), guard);
    }

    pub fn rules(&self) -> &[BehaviorRule] {
        &self.rules
    }

    /// Returns every behavior the code is classified with.
    pub fn classify(&self, code: &SmartCode) -> BTreeSet<SmartCodeBehavior> {
        self.rules
            .iter()
            .filter(|rule| code.contains_segments(&rule.segments))
            .map(|rule| rule.behavior)
            .collect()
    }

    pub fn has_behavior(&self, code: &SmartCode, behavior: SmartCodeBehavior) -> bool {
        self.classify(code).contains(&behavior)
    }

    pub fn is_ledger(&self, code: &SmartCode) -> bool {
        self.has_behavior(code, SmartCodeBehavior::LedgerBalance)
    }

    /// Runs every guard the code's behaviors select.
    pub fn validate_transaction(
        &self,
        code: &SmartCode,
        lines: &[TransactionLine],
    ) -> Result<(), GuardViolation> {
        for behavior in self.classify(code) {
            if let Some(guard) = self.guards.get(&behavior) {
                debug!(
                    "event=smart_code_guard module=smart_code status=start behavior={} smart_code={}",
                    behavior.as_str(),
                    code
                );
                guard.check(lines)?;
            }
        }
        Ok(())
    }
}

fn parse_rule_segments(value: &str) -> Result<Vec<String>, RegistryError> {
    let trimmed = value.trim().trim_matches('.');
    if trimmed.is_empty() {
        return Err(RegistryError::EmptyRule);
    }
    trimmed
        .split('.')
        .map(|segment| {
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_');
            if valid {
                Ok(segment.to_string())
            } else {
                Err(RegistryError::InvalidSegment(segment.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{RegistryError, SmartCodeBehavior, SmartCodeRegistry};
    use crate::smart_code::code::SmartCode;

    fn code(value: &str) -> SmartCode {
        SmartCode::parse(value).expect("valid smart code")
    }

    #[test]
    fn default_rules_classify_gl_and_workflow_codes() {
        let registry = SmartCodeRegistry::default();

        assert!(registry.is_ledger(&code("HERA.FIN.GL.JOURNAL.v1")));
        assert!(registry.is_ledger(&code("HERA.SALON.GL.SALE.v1")));
        assert!(!registry.is_ledger(&code("HERA.SALON.SVC.TXN.SALE.v1")));
        assert!(!registry.is_ledger(&code("HERA.SALON.GLOBAL.SALE.v1")));

        assert!(registry.has_behavior(
            &code("HERA.SALON.APPOINTMENT.WORKFLOW.STATUS.v1"),
            SmartCodeBehavior::ActiveEdge
        ));
    }

    #[test]
    fn registered_rules_extend_classification() {
        let mut registry = SmartCodeRegistry::default();
        registry
            .register_rule("PROC.PO", SmartCodeBehavior::ActiveEdge)
            .expect("register");
        assert!(registry.has_behavior(
            &code("HERA.PROC.PO.STATUS.v1"),
            SmartCodeBehavior::ActiveEdge
        ));
        assert!(!registry.has_behavior(
            &code("HERA.PROC.INVOICE.v1"),
            SmartCodeBehavior::ActiveEdge
        ));
    }

    #[test]
    fn rejects_empty_invalid_and_duplicate_rules() {
        let mut registry = SmartCodeRegistry::default();
        assert_eq!(
            registry.register_rule(" . ", SmartCodeBehavior::LedgerBalance),
            Err(RegistryError::EmptyRule)
        );
        assert_eq!(
            registry.register_rule("fin.gl", SmartCodeBehavior::LedgerBalance),
            Err(RegistryError::InvalidSegment("fin".to_string()))
        );
        assert_eq!(
            registry.register_rule("FIN.GL", SmartCodeBehavior::LedgerBalance),
            Err(RegistryError::DuplicateRule("FIN.GL".to_string()))
        );
    }

    #[test]
    fn behavior_names_parse() {
        assert_eq!(
            SmartCodeBehavior::parse("ledger_balance"),
            Some(SmartCodeBehavior::LedgerBalance)
        );
        assert_eq!(SmartCodeBehavior::parse("LEDGER"), None);
    }
}
