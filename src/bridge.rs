use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use std::thread;

use crate::{
    CatalogStore, EntryKind, PilotError, Platform, PluginInfo, build_external_command,
    extension_lower, remediation_hint, resolve_interpreter, resolve_powershell,
    subprocess_output_text,
};

const CAPTURE_CAP_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BoundValue {
    Text(String),
    Switch,
}

/// Arguments split into the keyed bag and the positional tail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BoundArguments {
    pub(crate) named: Vec<(String, BoundValue)>,
    pub(crate) positional: Vec<String>,
}

/// `-Name` shaped token: a dash followed by something other than a digit or
/// decimal point. A bare `-` is positional.
pub(crate) fn is_named_option(token: &str) -> bool {
    let Some(rest) = token.strip_prefix('-') else {
        return false;
    };
    match rest.chars().next() {
        None => false,
        Some(c) => !(c.is_ascii_digit() || c == '.'),
    }
}

pub(crate) fn classify_arguments(args: &[String]) -> BoundArguments {
    let mut bound = BoundArguments::default();
    let mut idx = 0;
    while idx < args.len() {
        let token = &args[idx];
        if is_named_option(token) {
            let key = token.trim_start_matches('-').trim_end_matches(':').to_string();
            match args.get(idx + 1) {
                Some(next) if !is_named_option(next) => {
                    bound.named.push((key, BoundValue::Text(next.clone())));
                    idx += 2;
                }
                _ => {
                    bound.named.push((key, BoundValue::Switch));
                    idx += 1;
                }
            }
        } else {
            bound.positional.push(token.clone());
            idx += 1;
        }
    }
    bound
}

/// Single-quoted PowerShell literal.
pub(crate) fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Script that loads every source declaring `name`, asserts the function
/// exists, then splats the named bag and positional list into it. Modules are
/// imported so `Export-ModuleMember` works; plain scripts are dot-sourced.
pub(crate) fn invocation_script(sources: &[PathBuf], name: &str, bound: &BoundArguments) -> String {
    let mut script = String::from("$ErrorActionPreference = 'Stop'\n");
    for source in sources {
        let literal = ps_quote(&source.to_string_lossy());
        if extension_lower(source) == "psm1" {
            script.push_str(&format!(
                "Import-Module -Force -DisableNameChecking -LiteralPath {literal}\n"
            ));
        } else {
            script.push_str(&format!(
                ". ([scriptblock]::Create((Get-Content -Raw -LiteralPath {literal})))\n"
            ));
        }
    }
    let quoted_name = ps_quote(name);
    script.push_str(&format!(
        "if (-not (Get-Command -Name {quoted_name} -CommandType Function -ErrorAction SilentlyContinue)) {{\n    throw \"function {} is not defined by its source files\"\n}}\n",
        name.replace('"', "`\"")
    ));

    script.push_str("$named = @{");
    for (idx, (key, value)) in bound.named.iter().enumerate() {
        if idx > 0 {
            script.push_str("; ");
        }
        let literal = match value {
            BoundValue::Text(text) => ps_quote(text),
            BoundValue::Switch => "$true".to_string(),
        };
        script.push_str(&format!("{} = {literal}", ps_quote(key)));
    }
    script.push_str("}\n$positional = @(");
    let positional: Vec<String> = bound.positional.iter().map(|p| ps_quote(p)).collect();
    script.push_str(&positional.join(", "));
    script.push_str(")\n");
    script.push_str(&format!("& {quoted_name} @named @positional\n"));
    script.push_str("if ($LASTEXITCODE -is [int] -and $LASTEXITCODE -ne 0) { exit $LASTEXITCODE }\n");
    script
}

/// Runs catalog entries by name: scripts through their interpreter, functions
/// through a generated PowerShell invocation script.
pub(crate) struct ExecutionBridge<'a> {
    store: &'a CatalogStore,
    mirror: bool,
}

impl<'a> ExecutionBridge<'a> {
    pub(crate) fn new(store: &'a CatalogStore) -> Self {
        Self { store, mirror: true }
    }

    /// Echo child output to this process's stdout/stderr while capturing it.
    pub(crate) fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub(crate) fn invoke(&self, root: &Path, name: &str, args: &[String]) -> Result<String, PilotError> {
        let info = self.store.get_info(root, name)?;
        match info.kind {
            EntryKind::Script => self.run_script(&info, args),
            EntryKind::Function => self.run_function(&info, args),
        }
    }

    fn run_script(&self, info: &PluginInfo, args: &[String]) -> Result<String, PilotError> {
        let platform = self.store.platform();
        let ext = extension_lower(&info.path);
        let Some((program, mut prefix)) = resolve_interpreter(platform, &ext) else {
            return Err(PilotError::InterpreterMissing {
                interpreter: expected_interpreter(platform, &ext),
                target: info.name.clone(),
            });
        };
        prefix.push(info.path.to_string_lossy().into_owned());
        prefix.extend(args.iter().cloned());
        tracing::info!(
            target_name = %info.name,
            interpreter = %program.display(),
            args = args.len(),
            "dispatching script"
        );
        let cmd = build_external_command(&program, &prefix);
        run_captured(cmd, &info.name, self.mirror)
    }

    fn run_function(&self, info: &PluginInfo, args: &[String]) -> Result<String, PilotError> {
        let platform = self.store.platform();
        let Some(program) = resolve_powershell(platform) else {
            return Err(PilotError::InterpreterMissing {
                interpreter: platform.powershell_candidates().join(" or "),
                target: info.name.clone(),
            });
        };
        let bound = classify_arguments(args);
        let script = invocation_script(&info.sources, &info.name, &bound);

        let mut file = tempfile::Builder::new()
            .prefix("scriptpilot-")
            .suffix(".ps1")
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;
        // Handle closed for the host; the file is removed when the path drops.
        let script_path = file.into_temp_path();

        let mut host_args: Vec<String> = platform
            .interpreters("ps1")
            .first()
            .map(|spec| spec.args.iter().map(|a| a.to_string()).collect())
            .unwrap_or_default();
        host_args.push(script_path.to_string_lossy().into_owned());
        tracing::info!(
            target_name = %info.name,
            sources = info.sources.len(),
            named = bound.named.len(),
            positional = bound.positional.len(),
            "dispatching function"
        );
        let cmd = build_external_command(&program, &host_args);
        let result = run_captured(cmd, &info.name, self.mirror);
        if let Err(err) = script_path.close() {
            tracing::debug!(error = %err, "temporary invocation script cleanup failed");
        }
        result
    }
}

fn expected_interpreter(platform: Platform, ext: &str) -> String {
    match platform.interpreters(ext).first() {
        Some(spec) => spec.program.to_string(),
        None => format!("an interpreter for .{ext} files"),
    }
}

fn pump<R, W>(mut reader: R, mut sink: Option<W>) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let mut captured: Vec<u8> = Vec::new();
        let mut buffer = [0_u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(out) = sink.as_mut() {
                        let _ = out.write_all(&buffer[..n]);
                        let _ = out.flush();
                    }
                    let remaining = CAPTURE_CAP_BYTES.saturating_sub(captured.len());
                    captured.extend_from_slice(&buffer[..remaining.min(n)]);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        captured
    })
}

/// Spawn with inherited stdin, tee stdout/stderr, and map a non-zero exit to
/// `ExecutionFailed` carrying the captured text.
fn run_captured(mut cmd: ProcessCommand, target: &str, mirror: bool) -> Result<String, PilotError> {
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(PilotError::InterpreterMissing {
                interpreter: cmd.get_program().to_string_lossy().into_owned(),
                target: target.to_string(),
            });
        }
        Err(err) => return Err(err.into()),
    };

    let stdout_handle = child
        .stdout
        .take()
        .map(|out| pump(out, mirror.then(io::stdout)));
    let stderr_handle = child
        .stderr
        .take()
        .map(|err| pump(err, mirror.then(io::stderr)));
    let status = child.wait()?;
    let stdout = stdout_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let output = subprocess_output_text(
        &String::from_utf8_lossy(&stdout),
        &String::from_utf8_lossy(&stderr),
    );

    if status.success() {
        tracing::debug!(target_name = target, bytes = output.len(), "execution finished");
        return Ok(output);
    }
    tracing::warn!(target_name = target, code = ?status.code(), "execution failed");
    Err(PilotError::ExecutionFailed {
        target: target.to_string(),
        code: status.code(),
        hint: remediation_hint(&output),
        output,
    })
}
