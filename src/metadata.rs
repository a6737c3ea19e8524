//! Help-block and parameter-declaration extraction for PowerShell sources.
//!
//! Everything here is best effort: unparseable input degrades to empty help
//! or an untyped, optional parameter, never to an error.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::{DECLARATION_WINDOW_LINES, HelpBlock, ParameterDetail};

static FUNCTION_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*function\s+(?:(?:global|script|local):)?([A-Za-z_][A-Za-z0-9_\-]*)")
        .expect("function regex")
});
static PARAM_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bparam\s*\(").expect("param regex"));
static MANDATORY_FALSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)mandatory\s*=\s*\$?(false|0)\b").expect("mandatory regex"));
static MANDATORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmandatory\b").expect("mandatory regex"));
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).expect("quoted regex"));
static TYPE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.]*(\[\])?$").expect("type regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HelpTag {
    None,
    Synopsis,
    Description,
    Parameter,
    Example,
    Ignored,
}

/// Names of every function declared in `text`, in order of first appearance.
pub(crate) fn declared_functions(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for line in text.lines() {
        if let Some(caps) = FUNCTION_DEF.captures(line) {
            let name = caps[1].to_string();
            if seen.insert(name.to_ascii_lowercase()) {
                out.push(name);
            }
        }
    }
    out
}

/// Comment-based help keywords that carry no catalog text.
const IGNORED_HELP_KEYWORDS: &[&str] = &[
    "NOTES",
    "INPUTS",
    "OUTPUTS",
    "LINK",
    "COMPONENT",
    "ROLE",
    "FUNCTIONALITY",
    "FORWARDHELPTARGETNAME",
    "FORWARDHELPCATEGORY",
    "REMOTEHELPRUNSPACE",
    "EXTERNALHELP",
];

/// `.KEYWORD [arg]` lines; anything else, such as `.\deploy.ps1`, is prose.
fn help_keyword(line: &str) -> Option<(String, std::str::SplitWhitespace<'_>)> {
    let mut parts = line.strip_prefix('.')?.split_whitespace();
    let word = parts.next()?;
    if !word.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let tag = word.to_ascii_uppercase();
    let known = matches!(tag.as_str(), "SYNOPSIS" | "DESCRIPTION" | "PARAMETER" | "EXAMPLE")
        || IGNORED_HELP_KEYWORDS.contains(&tag.as_str());
    known.then_some((tag, parts))
}

pub(crate) fn is_private_name(name: &str) -> bool {
    name.starts_with('_')
}

pub(crate) fn public_functions(text: &str) -> Vec<String> {
    declared_functions(text)
        .into_iter()
        .filter(|name| !is_private_name(name))
        .collect()
}

/// Index of the line that defines `name` (case-insensitive exact match).
pub(crate) fn find_function_line(lines: &[&str], name: &str) -> Option<usize> {
    lines.iter().position(|line| {
        FUNCTION_DEF
            .captures(line)
            .map(|caps| caps[1].eq_ignore_ascii_case(name))
            .unwrap_or(false)
    })
}

/// Help attached to function `name`. A block only counts when it sits directly
/// above the definition; blank lines may separate them, code may not.
pub(crate) fn parse_function_help(text: &str, name: &str) -> HelpBlock {
    let lines: Vec<&str> = text.lines().collect();
    let Some(def_idx) = find_function_line(&lines, name) else {
        return HelpBlock::default();
    };
    match adjacent_comment_block(&lines, def_idx) {
        Some(block) => parse_help_lines(&block),
        None => HelpBlock::default(),
    }
}

fn adjacent_comment_block<'a>(lines: &[&'a str], def_idx: usize) -> Option<Vec<&'a str>> {
    let mut idx = def_idx;
    let close_idx = loop {
        if idx == 0 {
            return None;
        }
        idx -= 1;
        let trimmed = lines[idx].trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.ends_with("#>") {
            break idx;
        }
        return None;
    };
    let mut open_idx = close_idx;
    loop {
        if lines[open_idx].trim_start().starts_with("<#") {
            break;
        }
        if open_idx == 0 {
            return None;
        }
        open_idx -= 1;
    }
    Some(lines[open_idx..=close_idx].to_vec())
}

/// Help of a standalone script: the first comment block before any code.
/// Shell and Python scripts use their leading `#` comment lines instead.
pub(crate) fn parse_script_help(text: &str, extension: &str) -> HelpBlock {
    let lines: Vec<&str> = text.lines().collect();
    if matches!(extension, "ps1" | "psm1") {
        let mut idx = 0;
        while idx < lines.len() {
            let trimmed = lines[idx].trim();
            if trimmed.is_empty() || trimmed.starts_with("#requires") || trimmed.starts_with("#!") {
                idx += 1;
                continue;
            }
            if !trimmed.starts_with("<#") {
                return HelpBlock::default();
            }
            let mut end = idx;
            while end < lines.len() && !lines[end].trim_end().ends_with("#>") {
                end += 1;
            }
            if end == lines.len() {
                return HelpBlock::default();
            }
            return parse_help_lines(&lines[idx..=end]);
        }
        return HelpBlock::default();
    }

    let mut comments = Vec::new();
    for line in &lines {
        let trimmed = line.trim();
        if trimmed.starts_with("#!") || (comments.is_empty() && trimmed.is_empty()) {
            continue;
        }
        let Some(body) = trimmed.strip_prefix('#').or_else(|| trimmed.strip_prefix("::")).or_else(|| trimmed.strip_prefix("REM ")) else {
            break;
        };
        comments.push(body.trim().to_string());
    }
    let mut help = HelpBlock::default();
    let mut rest = comments.into_iter().skip_while(|c| c.is_empty());
    if let Some(first) = rest.next() {
        help.synopsis = first;
    }
    let description: Vec<String> = rest.filter(|c| !c.is_empty()).collect();
    help.description = description.join(" ");
    help
}

fn parse_help_lines(block: &[&str]) -> HelpBlock {
    let mut synopsis: Vec<String> = Vec::new();
    let mut description: Vec<String> = Vec::new();
    let mut examples: Vec<Vec<String>> = Vec::new();
    // lowercase key -> (display name, text lines)
    let mut params: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();
    let mut active = HelpTag::None;
    let mut active_param = String::new();

    for raw in block {
        let mut line = raw.trim();
        if let Some(rest) = line.strip_prefix("<#") {
            line = rest.trim();
        }
        if let Some(rest) = line.strip_suffix("#>") {
            line = rest.trim();
        }
        if line.is_empty() {
            if active == HelpTag::Example {
                if let Some(current) = examples.last_mut() {
                    current.push(String::new());
                }
            }
            continue;
        }

        if let Some((tag, mut parts)) = help_keyword(line) {
            match tag.as_str() {
                "SYNOPSIS" => active = HelpTag::Synopsis,
                "DESCRIPTION" => active = HelpTag::Description,
                "EXAMPLE" => {
                    active = HelpTag::Example;
                    examples.push(Vec::new());
                }
                "PARAMETER" => match parts.next() {
                    Some(name) => {
                        active = HelpTag::Parameter;
                        active_param = name.to_ascii_lowercase();
                        params
                            .entry(active_param.clone())
                            .or_insert_with(|| (name.to_string(), Vec::new()));
                    }
                    None => active = HelpTag::Ignored,
                },
                _ => active = HelpTag::Ignored,
            }
            continue;
        }

        let text = line.to_string();
        match active {
            HelpTag::Synopsis => synopsis.push(text),
            HelpTag::Description => description.push(text),
            HelpTag::Example => {
                if let Some(current) = examples.last_mut() {
                    current.push(text);
                }
            }
            HelpTag::Parameter => {
                if let Some((_, lines)) = params.get_mut(&active_param) {
                    lines.push(text);
                }
            }
            HelpTag::None | HelpTag::Ignored => {}
        }
    }

    let parameters = params
        .into_values()
        .map(|(name, lines)| {
            let joined = lines.join(" ");
            if joined.is_empty() {
                name
            } else {
                format!("{name}: {joined}")
            }
        })
        .collect();

    HelpBlock {
        synopsis: synopsis.join(" "),
        description: description.join(" "),
        parameters,
        examples: examples
            .into_iter()
            .map(|lines| lines.join("\n").trim().to_string())
            .filter(|e| !e.is_empty())
            .collect(),
    }
}

#[derive(Default)]
struct PendingAttributes {
    mandatory: bool,
    allowed_values: Vec<String>,
    type_name: Option<String>,
}

/// Parameter declarations of function `name`.
pub(crate) fn parse_function_parameters(text: &str, name: &str) -> Vec<ParameterDetail> {
    let lines: Vec<&str> = text.lines().collect();
    let Some(def_idx) = find_function_line(&lines, name) else {
        return Vec::new();
    };
    let header = lines[def_idx];
    if let Some(pos) = inline_parameter_list(header) {
        return parse_declarations(&text_from(&lines, def_idx, pos));
    }
    let end = (def_idx + 1 + DECLARATION_WINDOW_LINES).min(lines.len());
    for idx in def_idx..end {
        if idx > def_idx && FUNCTION_DEF.is_match(lines[idx]) {
            break;
        }
        let candidate = if idx == def_idx {
            // skip past the function name so "function param_x" is not a match
            header.find('{').map(|b| &header[b..]).unwrap_or("")
        } else {
            lines[idx]
        };
        if let Some(m) = PARAM_OPEN.find(candidate) {
            let offset = lines[idx].len() - candidate.len() + m.end();
            return parse_declarations(&text_from(&lines, idx, offset));
        }
    }
    Vec::new()
}

/// Parameters of a standalone PowerShell script: the first `param(` block.
pub(crate) fn parse_script_parameters(text: &str) -> Vec<ParameterDetail> {
    let lines: Vec<&str> = text.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        if FUNCTION_DEF.is_match(line) {
            break;
        }
        if let Some(m) = PARAM_OPEN.find(line) {
            return parse_declarations(&text_from(&lines, idx, m.end()));
        }
    }
    Vec::new()
}

fn inline_parameter_list(header: &str) -> Option<usize> {
    let caps = FUNCTION_DEF.captures(header)?;
    let after = caps.get(0)?.end();
    let rest = &header[after..];
    let trimmed = rest.trim_start();
    if trimmed.starts_with('(') {
        Some(after + (rest.len() - trimmed.len()) + 1)
    } else {
        None
    }
}

fn text_from(lines: &[&str], line_idx: usize, byte_offset: usize) -> String {
    let mut out = String::new();
    out.push_str(&lines[line_idx][byte_offset..]);
    for line in &lines[line_idx + 1..] {
        out.push('\n');
        out.push_str(line);
    }
    out
}

/// Split the text that follows an opening `param(` into declaration segments.
/// Segments end at top-level commas or newlines; scanning stops at the
/// matching `)`. When the block never closes, the trailing partial segment
/// is dropped and only completed segments are returned.
fn declaration_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 1usize;
    let mut brackets = 0usize;
    let mut quote: Option<char> = None;
    let mut in_comment = false;

    for ch in text.chars() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
            } else {
                continue;
            }
        }
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => {
                quote = Some(ch);
                current.push(ch);
            }
            '#' if brackets == 0 && depth == 1 => in_comment = true,
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    segments.push(std::mem::take(&mut current));
                    return segments;
                }
                current.push(ch);
            }
            '[' => {
                brackets += 1;
                current.push(ch);
            }
            ']' => {
                brackets = brackets.saturating_sub(1);
                current.push(ch);
            }
            ',' | '\n' if depth == 1 && brackets == 0 => {
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    segments
}

fn parse_declarations(text: &str) -> Vec<ParameterDetail> {
    let mut out = Vec::new();
    let mut pending = PendingAttributes::default();
    for segment in declaration_segments(text) {
        apply_segment(segment.trim(), &mut pending, &mut out);
    }
    out
}

fn apply_segment(segment: &str, pending: &mut PendingAttributes, out: &mut Vec<ParameterDetail>) {
    let mut rest = segment;
    loop {
        rest = rest.trim_start();
        if !rest.starts_with('[') {
            break;
        }
        let Some((inner, after)) = take_bracketed(rest) else {
            return;
        };
        classify_attribute(inner, pending);
        rest = after;
    }

    let Some(var) = rest.strip_prefix('$') else {
        return;
    };
    let name_len = var
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(var.len());
    if name_len == 0 {
        return;
    }
    let name = &var[..name_len];
    let default = var[name_len..]
        .trim_start()
        .strip_prefix('=')
        .map(|d| strip_quotes(d.trim()))
        .filter(|d| !d.is_empty());

    let type_name = pending.type_name.take();
    let is_switch = type_name
        .as_deref()
        .map(|t| t.eq_ignore_ascii_case("switch"))
        .unwrap_or(false);
    out.push(ParameterDetail {
        name: name.to_string(),
        type_name,
        mandatory: pending.mandatory,
        is_switch,
        allowed_values: std::mem::take(&mut pending.allowed_values),
        default,
    });
    pending.mandatory = false;
}

/// Split `[inner]rest` at the matching bracket.
fn take_bracketed(text: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (idx, ch) in text.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&text[1..idx], &text[idx + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

fn classify_attribute(inner: &str, pending: &mut PendingAttributes) {
    let trimmed = inner.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("parameter") {
        if MANDATORY.is_match(trimmed) && !MANDATORY_FALSE.is_match(trimmed) {
            pending.mandatory = true;
        }
    } else if lower.starts_with("validateset") {
        pending.allowed_values = QUOTED
            .captures_iter(trimmed)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
    } else if TYPE_NAME.is_match(trimmed) {
        pending.type_name = Some(trimmed.to_string());
    }
}

fn strip_quotes(value: &str) -> String {
    let v = value.trim();
    for q in ['\'', '"'] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return v[1..v.len() - 1].to_string();
        }
    }
    v.to_string()
}
