use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_DECISION_TTL_SECS, DEFAULT_MAX_STEPS, LlmSettings, PilotError, ProviderKind,
    RetryPolicy, RiskPolicy, env_optional,
};

pub(crate) const CONFIG_ENV: &str = "SCRIPTPILOT_CONFIG";
pub(crate) const LOCAL_CONFIG_FILE: &str = "scriptpilot.json";

const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct LlmFileConfig {
    pub(crate) provider: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) base_url: Option<String>,
    pub(crate) api_key: Option<String>,
    pub(crate) timeout_secs: Option<u64>,
    pub(crate) max_retries: Option<usize>,
    pub(crate) retry_base_secs: Option<f64>,
    pub(crate) retry_max_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct FileConfig {
    pub(crate) plugins_dir: Option<PathBuf>,
    pub(crate) llm: LlmFileConfig,
    pub(crate) risk_policy: Option<String>,
    pub(crate) confirm_tools: bool,
    pub(crate) confirm_plugins: bool,
    pub(crate) max_steps: Option<usize>,
    pub(crate) decision_cache_ttl_secs: Option<u64>,
    pub(crate) include_env_context: Option<bool>,
    pub(crate) log_dir: Option<PathBuf>,
}

/// Values given on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub(crate) struct Overrides {
    pub(crate) config: Option<PathBuf>,
    pub(crate) plugins_dir: Option<PathBuf>,
    pub(crate) provider: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub(crate) source: Option<PathBuf>,
    pub(crate) plugins_dir: PathBuf,
    pub(crate) llm: LlmSettings,
    pub(crate) risk_policy: RiskPolicy,
    pub(crate) confirm_tools: bool,
    pub(crate) confirm_plugins: bool,
    pub(crate) max_steps: usize,
    pub(crate) decision_cache_ttl_secs: u64,
    pub(crate) include_env_context: bool,
    pub(crate) log_dir: Option<PathBuf>,
}

/// Where to look for the config file, first hit wins. An explicit path
/// (flag or env) is returned even when missing so the caller can complain.
pub(crate) fn config_search_path(
    explicit: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
    cwd: &Path,
    config_dir: Option<&Path>,
) -> Option<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), true));
    }
    if let Some(path) = env(CONFIG_ENV) {
        return Some((PathBuf::from(path), true));
    }
    let local = cwd.join(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some((local, false));
    }
    config_dir
        .map(|dir| dir.join("scriptpilot").join("config.json"))
        .filter(|p| p.is_file())
        .map(|p| (p, false))
}

pub(crate) fn load_file_config(path: &Path) -> Result<FileConfig, PilotError> {
    let data = std::fs::read_to_string(path)
        .map_err(|err| PilotError::Config(format!("cannot read {}: {err}", path.display())))?;
    match serde_json::from_str(&data) {
        Ok(config) => Ok(config),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "config unreadable, using defaults");
            Ok(FileConfig::default())
        }
    }
}

fn first_non_empty(values: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    values
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Merge flags, environment, file and defaults.
pub(crate) fn resolve_with(
    overrides: &Overrides,
    file: FileConfig,
    source: Option<PathBuf>,
    env: &dyn Fn(&str) -> Option<String>,
    data_dir: Option<&Path>,
) -> Result<ResolvedConfig, PilotError> {
    let provider_text = first_non_empty([
        overrides.provider.clone(),
        env("SCRIPTPILOT_PROVIDER"),
        file.llm.provider.clone(),
    ]);
    let provider = match provider_text {
        Some(text) => ProviderKind::parse(&text)?,
        None => ProviderKind::Ollama,
    };
    let (default_base, default_model) = match provider {
        ProviderKind::Ollama => (DEFAULT_OLLAMA_BASE, DEFAULT_OLLAMA_MODEL),
        ProviderKind::OpenAi => (DEFAULT_OPENAI_BASE, DEFAULT_OPENAI_MODEL),
    };
    let model = first_non_empty([
        overrides.model.clone(),
        env("SCRIPTPILOT_MODEL"),
        file.llm.model.clone(),
    ])
    .unwrap_or_else(|| default_model.to_string());
    let base_url = first_non_empty([
        overrides.base_url.clone(),
        env("SCRIPTPILOT_BASE_URL"),
        file.llm.base_url.clone(),
    ])
    .unwrap_or_else(|| default_base.to_string());
    let api_key = first_non_empty([
        file.llm.api_key.clone(),
        env("SCRIPTPILOT_API_KEY"),
        env("OPENAI_API_KEY"),
    ]);

    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_retries: file.llm.max_retries.unwrap_or(defaults.max_retries),
        base_secs: file.llm.retry_base_secs.unwrap_or(defaults.base_secs),
        max_secs: file.llm.retry_max_secs.unwrap_or(defaults.max_secs),
    };

    let plugins_dir = overrides
        .plugins_dir
        .clone()
        .or_else(|| env("SCRIPTPILOT_PLUGINS_DIR").map(PathBuf::from))
        .or(file.plugins_dir)
        .or_else(|| data_dir.map(|d| d.join("scriptpilot").join("plugins")))
        .ok_or_else(|| PilotError::Config("no plugin directory configured".to_string()))?;

    let risk_policy = match file.risk_policy.as_deref() {
        Some(text) => RiskPolicy::parse(text)
            .ok_or_else(|| PilotError::Config(format!("unknown risk_policy '{text}'")))?,
        None => RiskPolicy::default(),
    };

    Ok(ResolvedConfig {
        source,
        plugins_dir,
        llm: LlmSettings {
            provider,
            model,
            base_url,
            api_key,
            timeout_secs: file.llm.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            retry,
        },
        risk_policy,
        confirm_tools: file.confirm_tools,
        confirm_plugins: file.confirm_plugins,
        max_steps: file.max_steps.unwrap_or(DEFAULT_MAX_STEPS).max(1),
        decision_cache_ttl_secs: file.decision_cache_ttl_secs.unwrap_or(DEFAULT_DECISION_TTL_SECS),
        include_env_context: file.include_env_context.unwrap_or(true),
        log_dir: file.log_dir,
    })
}

/// Resolve against the real process environment and platform directories.
pub(crate) fn resolve(overrides: &Overrides) -> Result<ResolvedConfig, PilotError> {
    let env = |name: &str| env_optional(name);
    let cwd = std::env::current_dir()?;
    let config_dir = dirs::config_dir();
    let (file, source) = match config_search_path(
        overrides.config.as_deref(),
        &env,
        &cwd,
        config_dir.as_deref(),
    ) {
        Some((path, explicit)) => {
            if explicit && !path.is_file() {
                return Err(PilotError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            (load_file_config(&path)?, Some(path))
        }
        None => (FileConfig::default(), None),
    };
    tracing::debug!(source = ?source, "configuration loaded");
    resolve_with(overrides, file, source, &env, dirs::data_dir().as_deref())
}

impl ResolvedConfig {
    /// JSON view for `scriptpilot config`, secrets masked.
    pub(crate) fn redacted(&self) -> serde_json::Value {
        serde_json::json!({
            "source": self.source.as_ref().map(|p| p.display().to_string()),
            "plugins_dir": self.plugins_dir.display().to_string(),
            "llm": {
                "provider": self.llm.provider.as_str(),
                "model": self.llm.model,
                "base_url": self.llm.base_url,
                "api_key": self.llm.api_key.as_deref().map(redact),
                "timeout_secs": self.llm.timeout_secs,
                "max_retries": self.llm.retry.max_retries,
                "retry_base_secs": self.llm.retry.base_secs,
                "retry_max_secs": self.llm.retry.max_secs,
            },
            "risk_policy": format!("{:?}", self.risk_policy).to_ascii_lowercase(),
            "confirm_tools": self.confirm_tools,
            "confirm_plugins": self.confirm_plugins,
            "max_steps": self.max_steps,
            "decision_cache_ttl_secs": self.decision_cache_ttl_secs,
            "include_env_context": self.include_env_context,
            "log_dir": self.log_dir.as_ref().map(|p| p.display().to_string()),
        })
    }
}

fn redact(secret: &str) -> String {
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{tail}")
    }
}
