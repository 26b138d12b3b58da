//! Smart code value type and parser.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Required leading segment of every smart code.
pub const SMART_CODE_PREFIX: &str = "HERA";

static SMART_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^HERA(?:\.[A-Z0-9_]+)+\.v([0-9]+)$").expect("valid smart code regex")
});
static UPPERCASE_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.V[0-9]+$").expect("valid version regex"));

/// Validated governance tag, e.g. `HERA.SALON.SVC.TXN.SALE.v1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SmartCode {
    raw: String,
    version: u32,
}

impl SmartCode {
    /// Parses one smart code string.
    ///
    /// Leading/trailing whitespace is trimmed; everything else is strict,
    /// including the lowercase `v` of the version suffix.
    pub fn parse(value: &str) -> Result<Self, SmartCodeError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(SmartCodeError::Empty);
        }
        if !trimmed.starts_with(SMART_CODE_PREFIX) {
            return Err(SmartCodeError::MissingPrefix(trimmed.to_string()));
        }
        if UPPERCASE_VERSION_RE.is_match(trimmed) {
            return Err(SmartCodeError::UppercaseVersion(trimmed.to_string()));
        }

        let captures = SMART_CODE_RE
            .captures(trimmed)
            .ok_or_else(|| SmartCodeError::Malformed(trimmed.to_string()))?;
        let version = captures[1]
            .parse::<u32>()
            .map_err(|_| SmartCodeError::Malformed(trimmed.to_string()))?;

        Ok(Self {
            raw: trimmed.to_string(),
            version,
        })
    }

    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    /// Segments between the `HERA` prefix and the version suffix.
    pub fn segments(&self) -> Vec<&str> {
        let mut parts: Vec<&str> = self.raw.split('.').collect();
        parts.pop();
        parts.remove(0);
        parts
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns whether `needle` occurs as a contiguous run of segments.
    pub fn contains_segments(&self, needle: &[String]) -> bool {
        if needle.is_empty() {
            return false;
        }
        let segments = self.segments();
        segments
            .windows(needle.len())
            .any(|window| {
                window
                    .iter()
                    .zip(needle)
                    .all(|(left, right)| *left == right.as_str())
            })
    }
}

impl Display for SmartCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for SmartCode {
    type Error = SmartCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SmartCode> for String {
    fn from(value: SmartCode) -> Self {
        value.raw
    }
}

/// Smart code format errors. All surface as `ERR_SMART_CODE_FORMAT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmartCodeError {
    Empty,
    MissingPrefix(String),
    UppercaseVersion(String),
    Malformed(String),
}

impl Display for SmartCodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "smart code must not be empty"),
            Self::MissingPrefix(value) => {
                write!(f, "smart code must start with `{SMART_CODE_PREFIX}.`: {value}")
            }
            Self::UppercaseVersion(value) => {
                write!(f, "smart code version must use lowercase `v`: {value}")
            }
            Self::Malformed(value) => write!(
                f,
                "smart code must match HERA.<SEGMENT>(.<SEGMENT>)*.v<N>: {value}"
            ),
        }
    }
}

impl Error for SmartCodeError {}

#[cfg(test)]
mod tests {
    use super::{SmartCode, SmartCodeError};

    #[test]
    fn accepts_lowercase_version_suffix() {
        let code = SmartCode::parse("HERA.CRM.CUSTOMER.ENTITY.v1").expect("valid code");
        assert_eq!(code.as_str(), "HERA.CRM.CUSTOMER.ENTITY.v1");
        assert_eq!(code.version(), 1);
        assert_eq!(code.segments(), vec!["CRM", "CUSTOMER", "ENTITY"]);
    }

    #[test]
    fn rejects_uppercase_version_suffix() {
        let err = SmartCode::parse("HERA.CRM.CUSTOMER.ENTITY.V1").expect_err("uppercase V");
        assert!(matches!(err, SmartCodeError::UppercaseVersion(_)));
    }

    #[test]
    fn rejects_missing_prefix_and_missing_segments() {
        assert!(matches!(
            SmartCode::parse("CRM.CUSTOMER.v1"),
            Err(SmartCodeError::MissingPrefix(_))
        ));
        assert!(matches!(
            SmartCode::parse("HERA.v1"),
            Err(SmartCodeError::Malformed(_))
        ));
        assert!(matches!(
            SmartCode::parse("HERA.CRM.customer.v1"),
            Err(SmartCodeError::Malformed(_))
        ));
        assert!(matches!(
            SmartCode::parse("HERA.CRM..ENTITY.v1"),
            Err(SmartCodeError::Malformed(_))
        ));
        assert_eq!(SmartCode::parse("  "), Err(SmartCodeError::Empty));
    }

    #[test]
    fn matches_contiguous_segment_runs_only() {
        let code = SmartCode::parse("HERA.FIN.GL.JOURNAL.v2").expect("valid code");
        assert!(code.contains_segments(&["GL".to_string()]));
        assert!(code.contains_segments(&["FIN".to_string(), "GL".to_string()]));
        assert!(!code.contains_segments(&["FIN".to_string(), "JOURNAL".to_string()]));
        assert!(!code.contains_segments(&["GLX".to_string()]));
    }

    #[test]
    fn serde_goes_through_validation() {
        let code: SmartCode =
            serde_json::from_value(serde_json::json!("HERA.RETAIL.PRODUCT.ENTITY.v3"))
                .expect("valid code");
        assert_eq!(code.version(), 3);
        assert_eq!(
            serde_json::to_value(&code).expect("serialize"),
            serde_json::json!("HERA.RETAIL.PRODUCT.ENTITY.v3")
        );

        let err = serde_json::from_value::<SmartCode>(serde_json::json!("HERA.RETAIL.V3"))
            .expect_err("uppercase V must fail");
        assert!(err.to_string().contains("lowercase"));
    }
}
