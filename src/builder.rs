use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::{
    CatalogStore, FUNCTION_SOURCE_EXTENSIONS, FunctionFile, LlmClient, PilotError, Platform,
    build_external_command, declared_functions, extension_lower, first_json_object,
    function_prefix, is_private_name, ps_quote, public_functions, resolve_powershell, subprocess_output_text,
    with_spinner,
};

static FENCED_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").expect("fenced code regex")
});
static FUNCTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*_[A-Za-z0-9_]+$").expect("function name regex"));

const CONVENTIONS: &str = "Conventions:\n\
- exactly one public function named <prefix>_<action> in lowercase, for example fs_list_large.\n\
- helpers you add must start with an underscore and the same prefix, for example _fs_size.\n\
- put a comment-based help block (<# .SYNOPSIS .DESCRIPTION .PARAMETER <Name> .EXAMPLE #>) directly above the function.\n\
- declare parameters in a param( ) block; mark required ones [Parameter(Mandatory)], use [switch] for flags and [ValidateSet(...)] for fixed choices.\n\
- write results with Write-Output as plain text; throw on failure with a clear message, e.g. 'required path does not exist: <path>'.\n\
- no interactive prompts, no external modules.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GeneratedFunction {
    pub(crate) name: String,
    pub(crate) file: Option<PathBuf>,
    pub(crate) code: String,
}

#[derive(Deserialize)]
struct RawGenerated {
    name: Option<String>,
    file: Option<String>,
    code: Option<String>,
}

pub(crate) fn builder_prompt(description: &str, toolkit: &[FunctionFile], root: &Path) -> String {
    let mut prompt = String::from(
        "Write one new PowerShell function for a local automation toolkit.\n\n# Task\n",
    );
    prompt.push_str(description.trim());
    prompt.push_str("\n\n# Existing toolkit\n");
    let mut prefixes = BTreeSet::new();
    if toolkit.is_empty() {
        prompt.push_str("(empty)\n");
    }
    for file in toolkit {
        let label = file.path.strip_prefix(root).unwrap_or(&file.path);
        prompt.push_str(&format!("{}: {}\n", label.display(), file.functions.join(", ")));
        prefixes.extend(file.functions.iter().map(|f| function_prefix(f)));
    }
    if !prefixes.is_empty() {
        prompt.push_str(&format!(
            "\nPrefixes in use: {}. Never reuse an existing function name. Reuse a prefix (and its file) only when the new function belongs to that group; otherwise pick a new prefix.\n",
            prefixes.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }
    prompt.push('\n');
    prompt.push_str(CONVENTIONS);
    prompt.push_str(
        "\n\nReply with one JSON object: {\"name\":\"<function name>\",\"file\":\"<relative .psm1 path, or null for a new <prefix>.psm1>\",\"code\":\"<complete source>\"}\n",
    );
    prompt
}

/// JSON reply first; otherwise the first fenced code block and the first
/// public function it declares.
pub(crate) fn parse_generated(raw: &str) -> Result<GeneratedFunction, PilotError> {
    if let Some(object) = first_json_object(raw) {
        if let Ok(parsed) = serde_json::from_str::<RawGenerated>(object) {
            if let Some(code) = parsed.code.filter(|c| !c.trim().is_empty()) {
                let name = match parsed.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
                    Some(name) => name,
                    None => first_public(&code)?,
                };
                let file = parsed
                    .file
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty() && !f.eq_ignore_ascii_case("null"))
                    .map(PathBuf::from);
                return Ok(GeneratedFunction { name, file, code });
            }
        }
    }
    let code = FENCED_CODE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| PilotError::MalformedResponse("no function code in builder reply".to_string()))?;
    let name = first_public(&code)?;
    Ok(GeneratedFunction {
        name,
        file: None,
        code,
    })
}

fn first_public(code: &str) -> Result<String, PilotError> {
    public_functions(code)
        .into_iter()
        .next()
        .ok_or_else(|| PilotError::ValidationFailed("code declares no public function".to_string()))
}

/// Name shape, declaration, collisions and target path.
pub(crate) fn validate_generated(
    generated: &GeneratedFunction,
    existing: &[String],
) -> Result<(), PilotError> {
    if !FUNCTION_NAME.is_match(&generated.name) {
        return Err(PilotError::ValidationFailed(format!(
            "'{}' is not a <prefix>_<action> name",
            generated.name
        )));
    }
    let declared = declared_functions(&generated.code);
    if !declared.iter().any(|d| d.eq_ignore_ascii_case(&generated.name)) {
        return Err(PilotError::ValidationFailed(format!(
            "code does not declare function {}",
            generated.name
        )));
    }
    for name in declared.iter().filter(|d| !is_private_name(d)) {
        if existing.iter().any(|e| e.eq_ignore_ascii_case(name)) {
            return Err(PilotError::ValidationFailed(format!("{name} already exists")));
        }
    }
    if let Some(file) = &generated.file {
        let escapes = file.is_absolute()
            || file
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if escapes {
            return Err(PilotError::ValidationFailed(format!(
                "target file {} must stay inside the plugin folder",
                file.display()
            )));
        }
        if !FUNCTION_SOURCE_EXTENSIONS.contains(&extension_lower(file).as_str()) {
            return Err(PilotError::ValidationFailed(format!(
                "target file {} must be a .psm1 or .ps1 file",
                file.display()
            )));
        }
    }
    Ok(())
}

/// Parse-only check through the PowerShell language parser. `Ok(false)` means
/// no host is installed and nothing was checked.
pub(crate) fn syntax_check(platform: Platform, code: &str) -> Result<bool, PilotError> {
    let Some(host) = resolve_powershell(platform) else {
        tracing::debug!("no PowerShell host, skipping syntax check");
        return Ok(false);
    };
    let mut file = tempfile::Builder::new()
        .prefix("scriptpilot-check-")
        .suffix(".ps1")
        .tempfile()?;
    file.write_all(code.as_bytes())?;
    file.flush()?;
    let path = file.into_temp_path();
    let command = format!(
        "$errs = $null; [void][System.Management.Automation.Language.Parser]::ParseFile({}, [ref]$null, [ref]$errs); if ($errs) {{ $errs | ForEach-Object {{ $_.ToString() }}; exit 1 }}",
        ps_quote(&path.to_string_lossy())
    );
    let args = vec![
        "-NoProfile".to_string(),
        "-NonInteractive".to_string(),
        "-Command".to_string(),
        command,
    ];
    let output = build_external_command(&host, &args).output()?;
    if output.status.success() {
        return Ok(true);
    }
    let text = subprocess_output_text(
        &String::from_utf8_lossy(&output.stdout),
        &String::from_utf8_lossy(&output.stderr),
    );
    Err(PilotError::ValidationFailed(format!(
        "syntax errors:\n{}",
        text.trim()
    )))
}

/// Generates, validates and writes a new catalog function.
pub(crate) struct Builder<'a> {
    llm: &'a dyn LlmClient,
    store: &'a CatalogStore,
    spinner: bool,
}

impl<'a> Builder<'a> {
    pub(crate) fn new(llm: &'a dyn LlmClient, store: &'a CatalogStore) -> Self {
        Self {
            llm,
            store,
            spinner: false,
        }
    }

    pub(crate) fn with_spinner(mut self, spinner: bool) -> Self {
        self.spinner = spinner;
        self
    }

    /// Returns the new function's name; the catalog is already invalidated.
    pub(crate) fn create(&self, root: &Path, description: &str) -> Result<String, PilotError> {
        let toolkit = self.store.list_function_files(root)?;
        let prompt = builder_prompt(description, &toolkit, root);
        let raw = with_spinner(self.spinner, "writing function", || self.llm.complete(&prompt))?;
        let generated = parse_generated(&raw)?;

        let existing: Vec<String> = self
            .store
            .list_entries(root, true)?
            .into_iter()
            .map(|e| e.name)
            .collect();
        validate_generated(&generated, &existing)?;
        let checked = syntax_check(self.store.platform(), &generated.code)?;
        tracing::info!(function = %generated.name, syntax_checked = checked, "generated function accepted");

        self.store.write_function(
            root,
            &generated.name,
            &generated.code,
            generated.file.as_deref(),
        )?;
        Ok(generated.name)
    }
}
