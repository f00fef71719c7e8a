//! Error Classifier
//!
//! Maps raw gateway result codes to how the job state machine reacts:
//! keep waiting, retry, or give up. Codes come from configuration; anything
//! not listed is fatal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Code reported for transport-level faults (connection refused, timeout, TLS)
pub const TRANSPORT_FAULT: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Classification {
    /// Give up: the job is FAILED
    Fatal,
    /// Transient: the job returns to PENDING and is attempted again
    Retryable,
    /// Still processing remotely: keep RUNNING and re-check status
    Pending,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Fatal => "fatal",
            Classification::Retryable => "retryable",
            Classification::Pending => "pending",
        };
        f.write_str(s)
    }
}

/// A result code, optionally narrowed by a message prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRule {
    pub code: String,
    #[serde(default)]
    pub message_prefix: Option<String>,
}

impl CodeRule {
    pub fn code(code: &str) -> Self {
        Self {
            code: code.to_string(),
            message_prefix: None,
        }
    }

    fn matches(&self, code: &str, message: &str) -> bool {
        self.code == code
            && self
                .message_prefix
                .as_deref()
                .is_none_or(|prefix| message.trim_start().starts_with(prefix))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Codes that mean the bank accepted the request
    pub success: Vec<String>,
    pub pending: Vec<CodeRule>,
    pub retryable: Vec<CodeRule>,
    /// "Transaction does not exist" answers to a status check
    pub not_found: Vec<CodeRule>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            success: vec!["".into(), "0".into(), "00000".into()],
            pending: ["00014", "14", "15", "20"]
                .into_iter()
                .map(CodeRule::code)
                .collect(),
            retryable: [TRANSPORT_FAULT, "timeout"]
                .into_iter()
                .map(CodeRule::code)
                .collect(),
            not_found: vec![CodeRule {
                code: "189".into(),
                message_prefix: Some(
                    "[02] - Error en Consulta de Estado de Transacciones".into(),
                ),
            }],
        }
    }
}

/// Deterministic: the same (code, message) always yields the same class.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    config: ClassifierConfig,
}

impl ErrorClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, code: &str, message: &str) -> Classification {
        let code = code.trim();
        // A missing transaction is resubmitted under the same key
        if self.is_not_found(code, message) {
            return Classification::Retryable;
        }
        if self.config.pending.iter().any(|r| r.matches(code, message)) {
            return Classification::Pending;
        }
        if self.config.retryable.iter().any(|r| r.matches(code, message)) {
            return Classification::Retryable;
        }
        Classification::Fatal
    }

    pub fn is_not_found(&self, code: &str, message: &str) -> bool {
        let code = code.trim();
        self.config.not_found.iter().any(|r| r.matches(code, message))
    }

    pub fn is_success(&self, code: &str) -> bool {
        let code = code.trim();
        self.config.success.iter().any(|c| c == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOT_FOUND_MSG: &str = "[02] - Error en Consulta de Estado de Transacciones - Transaccion NO Existe en el Sistema";

    #[test]
    fn test_default_rules() {
        let classifier = ErrorClassifier::default();

        assert_eq!(classifier.classify("00014", ""), Classification::Pending);
        assert_eq!(classifier.classify("20", "busy"), Classification::Pending);
        assert_eq!(
            classifier.classify(TRANSPORT_FAULT, "connection refused"),
            Classification::Retryable
        );
        assert_eq!(classifier.classify("189", NOT_FOUND_MSG), Classification::Retryable);
        assert_eq!(classifier.classify("999", "rejected"), Classification::Fatal);
    }

    #[test]
    fn test_message_prefix_narrows_rule() {
        let classifier = ErrorClassifier::default();

        assert!(classifier.is_not_found("189", NOT_FOUND_MSG));
        assert!(!classifier.is_not_found("189", "[07] - Cuenta bloqueada"));
        assert_eq!(
            classifier.classify("189", "[07] - Cuenta bloqueada"),
            Classification::Fatal
        );
    }

    #[test]
    fn test_codes_are_trimmed() {
        let classifier = ErrorClassifier::default();
        assert_eq!(classifier.classify(" 00014 ", ""), Classification::Pending);
        assert!(classifier.is_success(" 00000"));
        assert!(classifier.is_success(""));
        assert!(!classifier.is_success("00014"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = ErrorClassifier::default();
        let inputs = [
            ("00014", ""),
            ("189", NOT_FOUND_MSG),
            ("system", "timeout"),
            ("42", "unknown"),
        ];
        for (code, msg) in inputs {
            let first = classifier.classify(code, msg);
            for _ in 0..10 {
                assert_eq!(classifier.classify(code, msg), first);
            }
        }
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
pending:
  - code: "77"
retryable:
  - code: "503"
not_found:
  - code: "404"
    message_prefix: "missing"
"#;
        let config: ClassifierConfig = serde_yaml::from_str(yaml).unwrap();
        let classifier = ErrorClassifier::new(config);

        assert_eq!(classifier.classify("77", ""), Classification::Pending);
        assert_eq!(classifier.classify("503", ""), Classification::Retryable);
        assert!(classifier.is_not_found("404", "missing tx"));
        // Unlisted fields keep their defaults
        assert!(classifier.is_success("00000"));
        // Replaced lists drop the default codes
        assert_eq!(classifier.classify("00014", ""), Classification::Fatal);
    }
}
