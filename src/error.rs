#[derive(Debug, thiserror::Error)]
pub(crate) enum PilotError {
    #[error("{name} not found{}", suggestion_suffix(.suggestion))]
    NotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("interpreter '{interpreter}' is not installed (needed for {target})")]
    InterpreterMissing { interpreter: String, target: String },

    #[error("{target} failed with exit code {}{}", exit_code_label(.code), hint_suffix(.hint))]
    ExecutionFailed {
        target: String,
        code: Option<i32>,
        output: String,
        hint: Option<String>,
    },

    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("LLM provider returned {status}: {body}")]
    ProviderError { status: u16, body: String },

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("generated function rejected: {0}")]
    ValidationFailed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PilotError {
    pub(crate) fn not_found(name: impl Into<String>, suggestion: Option<String>) -> Self {
        PilotError::NotFound {
            name: name.into(),
            suggestion,
        }
    }

    /// Captured subprocess output, when the failure carries any.
    pub(crate) fn output(&self) -> Option<&str> {
        match self {
            PilotError::ExecutionFailed { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{s}'?)"),
        None => String::new(),
    }
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "unknown".to_string(),
    }
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!("; hint: {h}"),
        None => String::new(),
    }
}

const MISSING_PATH_MARKERS: &[&str] = &[
    "required path does not exist",
    "cannot find path",
    "no such file or directory",
    "path not found",
];

/// Scan captured output for well-known failure text and return a remediation hint.
pub(crate) fn remediation_hint(output: &str) -> Option<String> {
    let lower = output.to_ascii_lowercase();
    if MISSING_PATH_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(
            "a path argument points at something that does not exist; check the path or pass an existing one"
                .to_string(),
        );
    }
    if lower.contains("access is denied") || lower.contains("permission denied") {
        return Some("the plugin lacks permission for the target; retry with a path you own".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_includes_suggestion() {
        let err = PilotError::not_found("net_pnig", Some("net_ping".to_string()));
        assert_eq!(err.to_string(), "net_pnig not found (did you mean 'net_ping'?)");
    }

    #[test]
    fn execution_failed_message_carries_hint() {
        let err = PilotError::ExecutionFailed {
            target: "fs_copy".to_string(),
            code: Some(2),
            output: "required path does not exist".to_string(),
            hint: remediation_hint("required path does not exist"),
        };
        let text = err.to_string();
        assert!(text.starts_with("fs_copy failed with exit code 2; hint:"));
        assert_eq!(err.output(), Some("required path does not exist"));
    }

    #[test]
    fn remediation_hint_is_case_insensitive() {
        assert!(remediation_hint("Cannot find path 'C:\\x' because it does not exist.").is_some());
        assert!(remediation_hint("all good").is_none());
    }
}
