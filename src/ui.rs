use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::{CatalogEntry, FunctionFile, PluginInfo, RiskLevel, confirmation_prompt, interpret_reply};

/// Interactive yes/no surface used by the risk gate.
pub(crate) trait Confirmer {
    fn confirm(&mut self, summary: &str, risk: RiskLevel) -> bool;
}

/// Reads one line from stdin; EOF counts as an empty reply.
pub(crate) struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&mut self, summary: &str, risk: RiskLevel) -> bool {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{}", confirmation_prompt(summary, risk));
        let _ = stderr.flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            line.clear();
        }
        interpret_reply(&line, risk)
    }
}

/// `--yes`: approve everything without prompting.
pub(crate) struct AutoApprove;

impl Confirmer for AutoApprove {
    fn confirm(&mut self, summary: &str, risk: RiskLevel) -> bool {
        tracing::info!(summary, risk = risk.as_str(), "auto-approved");
        true
    }
}

const FRAMES: &[&str] = &["|", "/", "-", "\\"];

struct Spinner {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Spinner {
    fn start(label: &str) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let label = label.to_string();
        let handle = thread::spawn(move || {
            let mut stderr = io::stderr();
            let mut tick = 0usize;
            while !flag.load(Ordering::Relaxed) {
                let _ = write!(stderr, "\r{} {label}", FRAMES[tick % FRAMES.len()]);
                let _ = stderr.flush();
                tick += 1;
                thread::sleep(Duration::from_millis(100));
            }
            let _ = write!(stderr, "\r{}\r", " ".repeat(label.len() + 2));
            let _ = stderr.flush();
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Run `work` with a stderr spinner when `enabled` and stderr is a terminal.
pub(crate) fn with_spinner<T>(enabled: bool, label: &str, work: impl FnOnce() -> T) -> T {
    let _spinner = (enabled && io::stderr().is_terminal()).then(|| Spinner::start(label));
    work()
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn render_entries(entries: &[CatalogEntry]) -> String {
    if entries.is_empty() {
        return "no plugins found\n".to_string();
    }
    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{:<width$}  {:<8}  {}\n",
            entry.name,
            entry.kind.as_str(),
            entry.path.display()
        ));
    }
    out
}

pub(crate) fn render_function_files(files: &[FunctionFile]) -> String {
    let mut out = String::new();
    for file in files {
        out.push_str(&format!("{}\n", file.path.display()));
        for name in &file.functions {
            out.push_str(&format!("  {name}\n"));
        }
    }
    out
}

pub(crate) fn render_info(info: &PluginInfo) -> String {
    let mut out = format!("{} ({})\n", info.name, info.kind.as_str());
    out.push_str(&format!("path: {}\n", info.path.display()));
    if info.sources.len() > 1 {
        out.push_str("also declared in:\n");
        for source in &info.sources[1..] {
            out.push_str(&format!("  {}\n", source.display()));
        }
    }
    if !info.synopsis.is_empty() {
        out.push_str(&format!("\n{}\n", info.synopsis));
    }
    if !info.description.is_empty() {
        out.push_str(&format!("\n{}\n", info.description));
    }
    if !info.parameter_details.is_empty() {
        out.push_str("\nparameters:\n");
        for p in &info.parameter_details {
            let mut line = format!("  -{}", p.name);
            if let Some(t) = &p.type_name {
                line.push_str(&format!(" <{t}>"));
            }
            if p.mandatory {
                line.push_str(" (mandatory)");
            }
            if !p.allowed_values.is_empty() {
                line.push_str(&format!(" one of: {}", p.allowed_values.join(", ")));
            }
            if let Some(d) = &p.default {
                line.push_str(&format!(" default: {d}"));
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
    if !info.parameters.is_empty() {
        out.push_str("\nparameter help:\n");
        for p in &info.parameters {
            out.push_str(&format!("  {p}\n"));
        }
    }
    for example in &info.examples {
        out.push_str(&format!("\nexample:\n  {}\n", example.replace('\n', "\n  ")));
    }
    out
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;

    use super::Confirmer;
    use crate::RiskLevel;

    /// Answers from a fixed script and remembers what it was asked.
    pub(crate) struct ScriptedConfirmer {
        replies: VecDeque<bool>,
        pub(crate) asked: Vec<(String, RiskLevel)>,
    }

    impl ScriptedConfirmer {
        pub(crate) fn new(replies: &[bool]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                asked: Vec::new(),
            }
        }
    }

    impl Confirmer for ScriptedConfirmer {
        fn confirm(&mut self, summary: &str, risk: RiskLevel) -> bool {
            self.asked.push((summary.to_string(), risk));
            self.replies.pop_front().unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntryKind, InvocationMethod, ParameterDetail};
    use std::path::PathBuf;

    #[test]
    fn spinner_disabled_runs_work_inline() {
        assert_eq!(with_spinner(false, "x", || 7), 7);
    }

    #[test]
    fn entries_are_aligned() {
        let entries = vec![
            CatalogEntry {
                name: "a".to_string(),
                kind: EntryKind::Script,
                path: PathBuf::from("/p/a.sh"),
            },
            CatalogEntry {
                name: "net_ping".to_string(),
                kind: EntryKind::Function,
                path: PathBuf::from("/p/net.psm1"),
            },
        ];
        let text = render_entries(&entries);
        assert!(text.starts_with("a         script    /p/a.sh\n"));
        assert!(text.contains("net_ping  function  /p/net.psm1"));
    }

    #[test]
    fn info_lists_parameters() {
        let info = PluginInfo {
            name: "net_ping".to_string(),
            kind: EntryKind::Function,
            path: PathBuf::from("/p/net.psm1"),
            sources: vec![PathBuf::from("/p/net.psm1")],
            invocation_method: InvocationMethod::DotSource,
            synopsis: "Ping a host.".to_string(),
            description: String::new(),
            parameters: vec!["Target: host to ping".to_string()],
            parameter_details: vec![ParameterDetail {
                name: "Target".to_string(),
                type_name: Some("string".to_string()),
                mandatory: true,
                ..ParameterDetail::default()
            }],
            examples: vec![],
        };
        let text = render_info(&info);
        assert!(text.contains("  -Target <string> (mandatory)\n"));
        assert!(text.contains("  Target: host to ping\n"));
        assert!(!text.contains("also declared in"));
    }
}
