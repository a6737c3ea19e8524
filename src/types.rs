use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_MAX_STEPS: usize = 6;
pub(crate) const DEFAULT_DECISION_TTL_SECS: u64 = 600;
pub(crate) const HISTORY_RESULT_MAX_CHARS: usize = 1_200;
pub(crate) const DECLARATION_WINDOW_LINES: usize = 10;
pub(crate) const FUNCTION_SCAN_MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EntryKind {
    Script,
    Function,
}

impl EntryKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Script => "script",
            EntryKind::Function => "function",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CatalogEntry {
    pub(crate) name: String,
    pub(crate) kind: EntryKind,
    pub(crate) path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FunctionFile {
    pub(crate) path: PathBuf,
    pub(crate) functions: Vec<String>,
}

/// Best-effort view of one declared parameter. Anything that could not be
/// parsed stays at the "untyped, optional" default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ParameterDetail {
    pub(crate) name: String,
    #[serde(rename = "type")]
    pub(crate) type_name: Option<String>,
    pub(crate) mandatory: bool,
    pub(crate) is_switch: bool,
    pub(crate) allowed_values: Vec<String>,
    pub(crate) default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct HelpBlock {
    pub(crate) synopsis: String,
    pub(crate) description: String,
    pub(crate) parameters: Vec<String>,
    pub(crate) examples: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum InvocationMethod {
    /// Run the file directly with the interpreter mapped to its extension.
    Interpreter,
    /// Load the source files into a generated script and call the function.
    DotSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PluginInfo {
    pub(crate) name: String,
    pub(crate) kind: EntryKind,
    pub(crate) path: PathBuf,
    pub(crate) sources: Vec<PathBuf>,
    pub(crate) invocation_method: InvocationMethod,
    pub(crate) synopsis: String,
    pub(crate) description: String,
    pub(crate) parameters: Vec<String>,
    pub(crate) parameter_details: Vec<ParameterDetail>,
    pub(crate) examples: Vec<String>,
}

impl PluginInfo {
    pub(crate) fn parameter(&self, name: &str) -> Option<&ParameterDetail> {
        self.parameter_details
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// One executed (or attempted) step of a session. Never mutated once pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ActionRecord {
    pub(crate) step: usize,
    pub(crate) action: String,
    pub(crate) target: String,
    pub(crate) args_summary: String,
    pub(crate) result: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RiskPolicy {
    Strict,
    #[default]
    Normal,
    Off,
}

impl RiskPolicy {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(RiskPolicy::Strict),
            "normal" => Some(RiskPolicy::Normal),
            "off" => Some(RiskPolicy::Off),
            _ => None,
        }
    }
}

/// Flat string maps keep argument order stable for prompts, hashing and tests.
pub(crate) type ArgMap = BTreeMap<String, String>;

#[derive(Debug, Serialize)]
pub(crate) struct SessionReport {
    pub(crate) outcome: String,
    pub(crate) answer: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) steps: Vec<ActionRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AuditLogEntry {
    pub(crate) session: String,
    pub(crate) step: usize,
    pub(crate) action: String,
    pub(crate) target: String,
    pub(crate) args: String,
    pub(crate) risk: String,
    pub(crate) ok: bool,
    #[serde(default)]
    pub(crate) ts_utc: Option<i64>,
}
