//! Decision prompts, model-output parsing, the repair round-trip and the
//! degrade-to-answer fallback.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    ActionRecord, ArgMap, DecisionCache, DecisionKey, LlmClient, PilotError, now_unix, with_spinner,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Action {
    #[default]
    Answer,
    RunPlugin,
    RunTool,
    CreateFunction,
}

impl Action {
    /// Unknown or empty labels become `Answer`.
    pub(crate) fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "run_plugin" => Action::RunPlugin,
            "run_tool" => Action::RunTool,
            "create_function" => Action::CreateFunction,
            _ => Action::Answer,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Action::Answer => "answer",
            Action::RunPlugin => "run_plugin",
            Action::RunTool => "run_tool",
            Action::CreateFunction => "create_function",
        }
    }
}

/// One normalised planner output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct Decision {
    pub(crate) action: Action,
    pub(crate) answer: String,
    pub(crate) plugin: String,
    pub(crate) plugin_args: ArgMap,
    pub(crate) tool: String,
    pub(crate) tool_args: ArgMap,
    pub(crate) args: Vec<String>,
    pub(crate) reason: String,
    pub(crate) function_description: String,
    pub(crate) provider: String,
    pub(crate) model: String,
}

impl Decision {
    pub(crate) fn answer(text: impl Into<String>) -> Self {
        Decision {
            action: Action::Answer,
            answer: text.into(),
            ..Decision::default()
        }
    }

    /// Name the action operates on, or empty for answers.
    pub(crate) fn target(&self) -> &str {
        match self.action {
            Action::Answer => "",
            Action::RunPlugin => &self.plugin,
            Action::RunTool => &self.tool,
            Action::CreateFunction => &self.function_description,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDecision {
    action: Option<Value>,
    answer: Option<Value>,
    #[serde(alias = "name")]
    plugin: Option<String>,
    #[serde(alias = "pluginArgs")]
    plugin_args: Option<Map<String, Value>>,
    tool: Option<String>,
    #[serde(alias = "toolArgs")]
    tool_args: Option<Map<String, Value>>,
    args: Option<Value>,
    reason: Option<Value>,
    #[serde(alias = "functionDescription", alias = "description")]
    function_description: Option<Value>,
}

fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    };
    if text.is_empty() || text.eq_ignore_ascii_case("null") || text == "<nil>" {
        None
    } else {
        Some(text)
    }
}

fn sanitize_args(map: Option<Map<String, Value>>) -> ArgMap {
    let mut out = ArgMap::new();
    for (key, value) in map.unwrap_or_default() {
        let key = key.trim().to_string();
        if key.is_empty() {
            continue;
        }
        if let Some(text) = value_text(&value) {
            out.insert(key, text);
        }
    }
    out
}

fn positional_args(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(value_text).collect(),
        Some(Value::String(s)) => shlex::split(&s).unwrap_or_else(|| vec![s]),
        Some(other) => value_text(&other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        // ```json {...}``` on one line
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// First balanced `{...}` in `text`, skipping braces inside strings.
pub(crate) fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse raw model text into a normalised decision.
pub(crate) fn parse_decision(raw: &str) -> Result<Decision, PilotError> {
    let body = strip_code_fence(raw);
    let candidate = if body.starts_with('{') {
        first_json_object(body).unwrap_or(body)
    } else {
        first_json_object(body)
            .ok_or_else(|| PilotError::MalformedResponse("no JSON object in response".to_string()))?
    };
    let parsed: RawDecision = serde_json::from_str(candidate)
        .map_err(|err| PilotError::MalformedResponse(err.to_string()))?;

    let label = parsed.action.as_ref().and_then(value_text).unwrap_or_default();
    Ok(Decision {
        action: Action::from_label(&label),
        answer: parsed.answer.as_ref().and_then(value_text).unwrap_or_default(),
        plugin: parsed.plugin.unwrap_or_default().trim().to_string(),
        plugin_args: sanitize_args(parsed.plugin_args),
        tool: parsed.tool.unwrap_or_default().trim().to_ascii_lowercase(),
        tool_args: sanitize_args(parsed.tool_args),
        args: positional_args(parsed.args),
        reason: parsed.reason.as_ref().and_then(value_text).unwrap_or_default(),
        function_description: parsed
            .function_description
            .as_ref()
            .and_then(value_text)
            .unwrap_or_default(),
        provider: String::new(),
        model: String::new(),
    })
}

const PREAMBLE: &str = "You are a local automation assistant. You decide the single next step for the user's request. \
You can answer directly, run one installed plugin, run one built-in tool, or ask for a new plugin function to be written. \
Reply with exactly one JSON object and nothing else.";

const RESPONSE_SCHEMAS: &str = r#"{"action":"answer","answer":"<final reply to the user>"}
{"action":"run_plugin","plugin":"<catalog name>","plugin_args":{"<Param>":"<value>"},"args":["<positional>"],"reason":"<why>"}
{"action":"run_tool","tool":"<tool name>","tool_args":{"<key>":"<value>"},"reason":"<why>"}
{"action":"create_function","function_description":"<what the new function must do>","reason":"<why no plugin fits>"}"#;

const ARGUMENT_RULES: &str = "Argument rules:\n\
- plugin_args keys are bare parameter names without a leading dash (\"Path\", not \"-Path\").\n\
- switch parameters take the value \"true\"; omit a switch to leave it off.\n\
- all values are strings.\n\
- do not guess values for mandatory parameters; if the request does not supply one, reply with an answer asking the user for it.\n\
- when the history shows the task is done, reply with an answer summarising the result.";

pub(crate) struct PlanInput<'a> {
    pub(crate) request: &'a str,
    pub(crate) catalog: &'a str,
    pub(crate) tools: &'a str,
    pub(crate) history: &'a [ActionRecord],
    pub(crate) environment: Option<&'a str>,
}

pub(crate) fn build_prompt(input: &PlanInput<'_>) -> String {
    let mut prompt = String::new();
    prompt.push_str(PREAMBLE);
    prompt.push_str("\n\n# Installed plugins\n");
    prompt.push_str(input.catalog.trim_end());
    prompt.push_str("\n\n# Built-in tools\n");
    prompt.push_str(input.tools.trim_end());
    prompt.push_str("\n\n# Response formats (pick one)\n");
    prompt.push_str(RESPONSE_SCHEMAS);
    prompt.push_str("\n\n");
    prompt.push_str(ARGUMENT_RULES);
    if let Some(env) = input.environment.filter(|e| !e.trim().is_empty()) {
        prompt.push_str("\n\n# Environment\n");
        prompt.push_str(env.trim_end());
    }
    prompt.push_str("\n\n# Request\n");
    prompt.push_str(input.request.trim());
    if !input.history.is_empty() {
        prompt.push_str("\n\n# Steps taken so far\n");
        for record in input.history {
            prompt.push_str(&format!(
                "{}. {} {} {}\n   result: {}\n",
                record.step,
                record.action,
                record.target,
                record.args_summary,
                record.result.replace('\n', "\n   ")
            ));
        }
        prompt.push_str("\nDecide the next step, or answer if the request is complete.");
    }
    prompt.push('\n');
    prompt
}

fn repair_prompt(raw: &str) -> String {
    format!(
        "Convert the following reply into exactly one JSON object matching one of these formats. \
Output only the JSON.\n\n{RESPONSE_SCHEMAS}\n\nReply to convert:\n{raw}\n"
    )
}

/// Short description of the machine the assistant is running on.
pub(crate) fn environment_context() -> String {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    format!(
        "os: {}\narch: {}\ncwd: {cwd}\ndate: {}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        chrono::Local::now().format("%Y-%m-%d"),
    )
}

pub(crate) struct Planner<'a> {
    llm: &'a dyn LlmClient,
    cache: Option<&'a DecisionCache>,
    spinner: bool,
}

impl<'a> Planner<'a> {
    pub(crate) fn new(llm: &'a dyn LlmClient) -> Self {
        Self {
            llm,
            cache: None,
            spinner: false,
        }
    }

    pub(crate) fn with_cache(mut self, cache: &'a DecisionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub(crate) fn with_spinner(mut self, spinner: bool) -> Self {
        self.spinner = spinner;
        self
    }

    fn complete(&self, prompt: &str) -> Result<String, PilotError> {
        with_spinner(self.spinner, "thinking", || self.llm.complete(prompt))
    }

    /// Provider errors propagate; malformed output never does.
    pub(crate) fn decide(&self, input: &PlanInput<'_>) -> Result<Decision, PilotError> {
        let prompt = build_prompt(input);
        let key = DecisionKey {
            prompt: &prompt,
            catalog: input.catalog,
            tools: input.tools,
            provider: self.llm.provider(),
            model: self.llm.model(),
            base_url: self.llm.base_url(),
        }
        .digest();
        if let Some(hit) = self.cache.and_then(|c| c.get(&key, now_unix())) {
            return Ok(hit);
        }

        let raw = self.complete(&prompt)?;
        let (mut decision, cacheable) = match parse_decision(&raw) {
            Ok(decision) => (decision, true),
            Err(first) => {
                tracing::info!(error = %first, "planner output unparseable, requesting repair");
                match self.complete(&repair_prompt(&raw)).and_then(|fixed| parse_decision(&fixed)) {
                    Ok(decision) => (decision, true),
                    Err(second) => {
                        tracing::warn!(error = %second, "repair failed, treating reply as an answer");
                        (Decision::answer(raw.trim()), false)
                    }
                }
            }
        };
        decision.provider = self.llm.provider().to_string();
        decision.model = self.llm.model().to_string();
        tracing::debug!(
            action = decision.action.as_str(),
            target_name = decision.target(),
            "planner decision"
        );
        if cacheable {
            if let Some(cache) = self.cache {
                cache.set(&key, decision.clone(), now_unix());
            }
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedLlm;

    fn input<'a>(request: &'a str, history: &'a [ActionRecord]) -> PlanInput<'a> {
        PlanInput {
            request,
            catalog: "## net (net.psm1)\n- net_ping -Target <string> (mandatory)",
            tools: "- search --pattern",
            history,
            environment: None,
        }
    }

    #[test]
    fn fenced_json_parses_without_repair() {
        let llm = ScriptedLlm::new(["```json\n{\"action\":\"answer\",\"answer\":\"hi\"}\n```"]);
        let decision = Planner::new(&llm).decide(&input("say hi", &[])).unwrap();
        assert_eq!(decision.action, Action::Answer);
        assert_eq!(decision.answer, "hi");
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn single_line_fence_parses() {
        let decision = parse_decision("```json {\"action\":\"answer\",\"answer\":\"hi\"} ```").unwrap();
        assert_eq!(decision.answer, "hi");
    }

    #[test]
    fn missing_or_unknown_action_becomes_answer() {
        assert_eq!(parse_decision(r#"{"answer":"x"}"#).unwrap().action, Action::Answer);
        assert_eq!(parse_decision(r#"{"action":"dance"}"#).unwrap().action, Action::Answer);
        assert_eq!(parse_decision(r#"{"action":null}"#).unwrap().action, Action::Answer);
        assert_eq!(
            parse_decision(r#"{"action":"  RUN_PLUGIN ","plugin":"net_ping"}"#).unwrap().action,
            Action::RunPlugin
        );
    }

    #[test]
    fn argument_maps_are_sanitized() {
        let decision = parse_decision(
            r#"{"action":"run_plugin","plugin":"net_ping","plugin_args":{"Target":"host","Empty":"","Nil":"<nil>","Null":null,"Word":"NULL","Quiet":true,"Count":4},"args":["-1", null]}"#,
        )
        .unwrap();
        let keys: Vec<&str> = decision.plugin_args.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Count", "Quiet", "Target"]);
        assert_eq!(decision.plugin_args["Quiet"], "true");
        assert_eq!(decision.plugin_args["Count"], "4");
        assert_eq!(decision.args, vec!["-1"]);
    }

    #[test]
    fn json_is_extracted_from_prose() {
        let decision = parse_decision(
            "Sure! Here you go:\n{\"action\":\"run_tool\",\"tool\":\"Search\",\"tool_args\":{\"pattern\":\"a}b\"}}\nHope that helps.",
        )
        .unwrap();
        assert_eq!(decision.action, Action::RunTool);
        assert_eq!(decision.tool, "search");
        assert_eq!(decision.tool_args["pattern"], "a}b");
    }

    #[test]
    fn repair_round_trip_is_used_once() {
        let llm = ScriptedLlm::new([
            "I would run net_ping on the host.",
            r#"{"action":"run_plugin","plugin":"net_ping","plugin_args":{"Target":"h"}}"#,
        ]);
        let decision = Planner::new(&llm).decide(&input("ping h", &[])).unwrap();
        assert_eq!(decision.action, Action::RunPlugin);
        assert_eq!(llm.calls(), 2);
        assert!(llm.prompts()[1].contains("I would run net_ping on the host."));
    }

    #[test]
    fn unrepairable_output_degrades_to_answer() {
        let llm = ScriptedLlm::new(["just some words", "still not json"]);
        let decision = Planner::new(&llm).decide(&input("hello", &[])).unwrap();
        assert_eq!(decision.action, Action::Answer);
        assert_eq!(decision.answer, "just some words");
        assert_eq!(llm.calls(), 2);
    }

    #[test]
    fn provider_failure_propagates() {
        let llm = ScriptedLlm::new(Vec::<String>::new());
        assert!(matches!(
            Planner::new(&llm).decide(&input("hello", &[])),
            Err(PilotError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn repeated_request_is_served_from_cache() {
        let llm = ScriptedLlm::new([r#"{"action":"answer","answer":"42"}"#]);
        let cache = DecisionCache::new(600);
        let planner = Planner::new(&llm).with_cache(&cache);
        let first = planner.decide(&input("meaning of life", &[])).unwrap();
        let second = planner.decide(&input("meaning of life", &[])).unwrap();
        assert_eq!(first, second);
        assert_eq!(llm.calls(), 1);
        assert_eq!(first.provider, "mock");
    }

    #[test]
    fn prompt_carries_history_and_rules() {
        let history = vec![ActionRecord {
            step: 1,
            action: "run_plugin".to_string(),
            target: "net_ping".to_string(),
            args_summary: "-Target h".to_string(),
            result: "ok\n4 replies".to_string(),
        }];
        let prompt = build_prompt(&input("ping h", &history));
        assert!(prompt.contains("# Request\nping h"));
        assert!(prompt.contains("1. run_plugin net_ping -Target h\n   result: ok\n   4 replies"));
        assert!(prompt.contains("do not guess values for mandatory parameters"));
        assert!(prompt.contains("\"action\":\"create_function\""));
        assert!(prompt.contains("- net_ping -Target <string> (mandatory)"));
    }

    #[test]
    fn environment_date_has_day_resolution() {
        let env = environment_context();
        let date = env.lines().find_map(|l| l.strip_prefix("date: ")).unwrap();
        assert!(chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok(), "{date}");
        assert_eq!(date.len(), 10);
    }
}
