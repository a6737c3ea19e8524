//! Plan, confirm, execute, record; repeated until an answer, a repeat, the
//! step budget or an error ends the request.

use std::path::{Path, PathBuf};

use crate::{
    Action, ActionRecord, AuditLog, Builder, CatalogStore, Confirmer, Decision, ExecutionBridge, HISTORY_RESULT_MAX_CHARS, PilotError, PlanInput, Planner, PluginInfo,
    RiskLevel, RiskPolicy, SessionReport, TOOL_CATALOG, classify, needs_confirmation, plugin_risk,
    parse_bool_text, run_by_name, tool_argv, truncate_chars,
};

/// Side-effecting half of a session.
pub(crate) trait ActionRunner {
    /// Planner-facing catalog text, re-read every step.
    fn catalog(&mut self) -> Result<String, PilotError>;
    fn plugin_info(&mut self, name: &str) -> Result<PluginInfo, PilotError>;
    fn run_plugin(&mut self, name: &str, args: &[String]) -> Result<String, PilotError>;
    fn run_tool(&mut self, name: &str, args: &[String]) -> Result<String, PilotError>;
    /// Generate, validate and write a function; returns its name.
    fn create_function(&mut self, description: &str) -> Result<String, PilotError>;
}

/// Runner backed by the catalog, the execution bridge and the builder.
pub(crate) struct LiveRunner<'a> {
    store: &'a CatalogStore,
    root: PathBuf,
    builder: Builder<'a>,
    mirror: bool,
}

impl<'a> LiveRunner<'a> {
    pub(crate) fn new(store: &'a CatalogStore, root: &Path, builder: Builder<'a>, mirror: bool) -> Self {
        Self {
            store,
            root: root.to_path_buf(),
            builder,
            mirror,
        }
    }
}

impl ActionRunner for LiveRunner<'_> {
    fn catalog(&mut self) -> Result<String, PilotError> {
        self.store.render(&self.root)
    }

    fn plugin_info(&mut self, name: &str) -> Result<PluginInfo, PilotError> {
        self.store.get_info(&self.root, name)
    }

    fn run_plugin(&mut self, name: &str, args: &[String]) -> Result<String, PilotError> {
        ExecutionBridge::new(self.store)
            .mirror(self.mirror)
            .invoke(&self.root, name, args)
    }

    fn run_tool(&mut self, name: &str, args: &[String]) -> Result<String, PilotError> {
        let outcome = run_by_name(name, args)?;
        if self.mirror && !outcome.output.is_empty() {
            println!("{}", outcome.output);
        }
        if outcome.code != 0 {
            return Err(PilotError::ExecutionFailed {
                target: name.to_string(),
                code: Some(outcome.code),
                hint: crate::remediation_hint(&outcome.output),
                output: outcome.output,
            });
        }
        Ok(outcome.output)
    }

    fn create_function(&mut self, description: &str) -> Result<String, PilotError> {
        self.builder.create(&self.root, description)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SessionOptions {
    pub(crate) max_steps: usize,
    pub(crate) policy: RiskPolicy,
    pub(crate) confirm_tools: bool,
    pub(crate) confirm_plugins: bool,
    pub(crate) environment: Option<String>,
    /// Print step progress to stderr.
    pub(crate) progress: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_steps: crate::DEFAULT_MAX_STEPS,
            policy: RiskPolicy::Normal,
            confirm_tools: false,
            confirm_plugins: false,
            environment: None,
            progress: false,
        }
    }
}

#[derive(Debug)]
pub(crate) enum SessionOutcome {
    Answered(String),
    LoopDetected { last_answer: Option<String> },
    MaxSteps,
    Canceled,
    Failed(PilotError),
}

impl SessionOutcome {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Answered(_) => "answered",
            SessionOutcome::LoopDetected { .. } => "loop_detected",
            SessionOutcome::MaxSteps => "max_steps",
            SessionOutcome::Canceled => "canceled",
            SessionOutcome::Failed(_) => "failed",
        }
    }

    /// Only errors exit non-zero; cancellation is not an error.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            SessionOutcome::Failed(_) => 1,
            _ => 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionResult {
    pub(crate) outcome: SessionOutcome,
    pub(crate) history: Vec<ActionRecord>,
}

impl SessionResult {
    pub(crate) fn report(&self) -> SessionReport {
        let (answer, error) = match &self.outcome {
            SessionOutcome::Answered(text) => (Some(text.clone()), None),
            SessionOutcome::LoopDetected { last_answer } => (last_answer.clone(), None),
            SessionOutcome::Failed(err) => (None, Some(err.to_string())),
            SessionOutcome::MaxSteps | SessionOutcome::Canceled => (None, None),
        };
        SessionReport {
            outcome: self.outcome.label().to_string(),
            answer,
            error,
            steps: self.history.clone(),
        }
    }
}

/// `(action, target, sorted key=value args, positional args)`.
pub(crate) fn action_signature(decision: &Decision) -> String {
    let named = match decision.action {
        Action::RunTool => &decision.tool_args,
        _ => &decision.plugin_args,
    };
    let mut parts = vec![
        decision.action.as_str().to_string(),
        decision.target().trim().to_ascii_lowercase(),
    ];
    let mut pairs: Vec<String> = named
        .iter()
        .map(|(k, v)| format!("{}={}", k.trim_start_matches('-').to_ascii_lowercase(), v.trim()))
        .collect();
    pairs.sort();
    parts.extend(pairs);
    parts.extend(decision.args.iter().map(|a| a.trim().to_string()));
    parts.join("\u{1f}")
}

/// Whether running `candidate` after `previous` repeats: an immediate repeat,
/// or the last two or three signatures cycling twice.
pub(crate) fn detect_repeat(previous: &[String], candidate: &str) -> Option<usize> {
    if previous.last().map(String::as_str) == Some(candidate) {
        return Some(1);
    }
    let mut all: Vec<&str> = previous.iter().map(String::as_str).collect();
    all.push(candidate);
    let len = all.len();
    for cycle_len in 2..=3 {
        if len < cycle_len * 2 {
            continue;
        }
        let recent = &all[len - cycle_len..];
        let before = &all[len - cycle_len * 2..len - cycle_len];
        if recent == before {
            return Some(cycle_len);
        }
    }
    None
}

/// Command-line tokens for a plugin call: switches become bare `-Name`,
/// "false" switches are dropped, everything else is `-Name value`, then the
/// positional args.
pub(crate) fn plugin_argv(decision: &Decision, info: Option<&PluginInfo>) -> Vec<String> {
    let mut argv = Vec::new();
    for (raw_key, value) in &decision.plugin_args {
        let key = raw_key.trim().trim_start_matches('-');
        if key.is_empty() {
            continue;
        }
        let declared = info.and_then(|i| i.parameter(key));
        let is_switch = match declared {
            Some(p) => p.is_switch,
            None => {
                let lower = value.trim().to_ascii_lowercase();
                lower == "true" || lower == "false"
            }
        };
        if is_switch {
            if parse_bool_text(value) {
                argv.push(format!("-{key}"));
            }
            continue;
        }
        argv.push(format!("-{key}"));
        argv.push(value.clone());
    }
    argv.extend(decision.args.iter().cloned());
    argv
}

pub(crate) fn args_summary(argv: &[String]) -> String {
    shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
}

pub(crate) struct Session<'a> {
    planner: &'a Planner<'a>,
    runner: &'a mut dyn ActionRunner,
    confirmer: &'a mut dyn Confirmer,
    options: SessionOptions,
    audit: Option<&'a AuditLog>,
}

struct Executed {
    target: String,
    argv: Vec<String>,
    output: String,
}

enum StepOutcome {
    Ran(Executed),
    /// A freshly created function whose run the user declined.
    Declined(String),
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        planner: &'a Planner<'a>,
        runner: &'a mut dyn ActionRunner,
        confirmer: &'a mut dyn Confirmer,
        options: SessionOptions,
    ) -> Self {
        Self {
            planner,
            runner,
            confirmer,
            options,
            audit: None,
        }
    }

    pub(crate) fn with_audit(mut self, audit: Option<&'a AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    fn audit(&self, step: usize, decision: &Decision, argv: &[String], risk: RiskLevel, ok: bool) {
        if let Some(log) = self.audit {
            if let Err(err) = log.record(
                step,
                decision.action.as_str(),
                decision.target(),
                &args_summary(argv),
                risk.as_str(),
                ok,
            ) {
                tracing::warn!(error = %err, "audit log write failed");
            }
        }
    }

    fn progress(&self, message: &str) {
        if self.options.progress {
            eprintln!("{message}");
        }
    }

    /// Ask the user when policy requires it for running plugin `name`.
    fn gate_plugin(&mut self, name: &str) -> bool {
        let risk = plugin_risk(name);
        if !needs_confirmation(self.options.policy, self.options.confirm_plugins, risk) {
            return true;
        }
        tracing::debug!(risk = risk.as_str(), plugin = name, "confirmation required");
        self.confirmer.confirm(&format!("run_plugin {name}"), risk)
    }

    fn execute(&mut self, decision: &Decision) -> Result<StepOutcome, PilotError> {
        match decision.action {
            Action::RunPlugin => {
                let info = self.runner.plugin_info(&decision.plugin)?;
                let argv = plugin_argv(decision, Some(&info));
                let output = self.runner.run_plugin(&info.name, &argv)?;
                Ok(StepOutcome::Ran(Executed {
                    target: info.name,
                    argv,
                    output,
                }))
            }
            Action::RunTool => {
                let mut argv = tool_argv(&decision.tool_args);
                argv.extend(decision.args.iter().cloned());
                let output = self.runner.run_tool(&decision.tool, &argv)?;
                Ok(StepOutcome::Ran(Executed {
                    target: decision.tool.clone(),
                    argv,
                    output,
                }))
            }
            Action::CreateFunction => {
                let name = self.runner.create_function(&decision.function_description)?;
                self.progress(&format!("created function {name}"));
                if !self.gate_plugin(&name) {
                    return Ok(StepOutcome::Declined(name));
                }
                let argv = decision.args.clone();
                let output = self.runner.run_plugin(&name, &argv)?;
                Ok(StepOutcome::Ran(Executed {
                    target: name,
                    argv,
                    output,
                }))
            }
            Action::Answer => Ok(StepOutcome::Ran(Executed {
                target: String::new(),
                argv: Vec::new(),
                output: decision.answer.clone(),
            })),
        }
    }

    pub(crate) fn run(mut self, request: &str) -> SessionResult {
        let mut history: Vec<ActionRecord> = Vec::new();
        let mut signatures: Vec<String> = Vec::new();
        let mut last_answer: Option<String> = None;

        for step in 1..=self.options.max_steps.max(1) {
            let catalog = match self.runner.catalog() {
                Ok(text) => text,
                Err(err) => return finish(SessionOutcome::Failed(err), history),
            };
            let input = PlanInput {
                request,
                catalog: &catalog,
                tools: TOOL_CATALOG,
                history: &history,
                environment: self.options.environment.as_deref(),
            };
            let decision = match self.planner.decide(&input) {
                Ok(decision) => decision,
                Err(err) => return finish(SessionOutcome::Failed(err), history),
            };
            tracing::info!(step, action = decision.action.as_str(), target_name = decision.target(), "session step");

            if decision.action == Action::Answer {
                let text = if decision.answer.is_empty() {
                    decision.reason.clone()
                } else {
                    decision.answer.clone()
                };
                return finish(SessionOutcome::Answered(text), history);
            }
            if !decision.answer.is_empty() {
                last_answer = Some(decision.answer.clone());
            }

            let signature = action_signature(&decision);
            if let Some(cycle_len) = detect_repeat(&signatures, &signature) {
                tracing::warn!(step, cycle_len, signature = %signature, "repeated action, stopping");
                return finish(SessionOutcome::LoopDetected { last_answer }, history);
            }

            let risk = classify(&decision);
            let caller_flag = match decision.action {
                Action::RunTool => self.options.confirm_tools,
                _ => self.options.confirm_plugins,
            };
            if needs_confirmation(self.options.policy, caller_flag, risk) {
                let summary = format!("{} {}", decision.action.as_str(), decision.target());
                tracing::debug!(risk = risk.as_str(), "confirmation required");
                if !self.confirmer.confirm(&summary, risk) {
                    self.progress("canceled");
                    return finish(SessionOutcome::Canceled, history);
                }
            }

            self.progress(&format!("[{step}] {} {}", decision.action.as_str(), decision.target()));
            signatures.push(signature);
            match self.execute(&decision) {
                Ok(StepOutcome::Declined(name)) => {
                    self.audit(step, &decision, &decision.args, risk, false);
                    history.push(ActionRecord {
                        step,
                        action: decision.action.as_str().to_string(),
                        target: name,
                        args_summary: args_summary(&decision.args),
                        result: "created; run declined".to_string(),
                    });
                    self.progress("canceled");
                    return finish(SessionOutcome::Canceled, history);
                }
                Ok(StepOutcome::Ran(executed)) => {
                    self.audit(step, &decision, &executed.argv, risk, true);
                    let output = executed.output.trim();
                    if !output.is_empty() {
                        last_answer = Some(output.to_string());
                    }
                    history.push(ActionRecord {
                        step,
                        action: decision.action.as_str().to_string(),
                        target: executed.target,
                        args_summary: args_summary(&executed.argv),
                        result: truncate_chars(output, HISTORY_RESULT_MAX_CHARS),
                    });
                }
                Err(err @ PilotError::NotFound { .. }) => {
                    self.audit(step, &decision, &decision.args, risk, false);
                    tracing::info!(step, error = %err, "target missing, re-planning");
                    history.push(ActionRecord {
                        step,
                        action: decision.action.as_str().to_string(),
                        target: decision.target().to_string(),
                        args_summary: args_summary(&decision.args),
                        result: format!("error: {err}"),
                    });
                }
                Err(err) => {
                    self.audit(step, &decision, &decision.args, risk, false);
                    history.push(ActionRecord {
                        step,
                        action: decision.action.as_str().to_string(),
                        target: decision.target().to_string(),
                        args_summary: args_summary(&decision.args),
                        result: truncate_chars(&format!("error: {err}"), HISTORY_RESULT_MAX_CHARS),
                    });
                    return finish(SessionOutcome::Failed(err), history);
                }
            }
        }
        finish(SessionOutcome::MaxSteps, history)
    }
}

fn finish(outcome: SessionOutcome, history: Vec<ActionRecord>) -> SessionResult {
    tracing::debug!(outcome = outcome.label(), steps = history.len(), "session finished");
    SessionResult { outcome, history }
}
