use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use walkdir::WalkDir;

use crate::{ArgMap, PilotError, closest_match};

pub(crate) const TOOL_NAMES: &[&str] = &["search", "recent", "rename", "backup", "clean"];

/// Tool catalog shown to the planner.
pub(crate) const TOOL_CATALOG: &str = "\
- search: find files whose name matches a pattern (* wildcards). tool_args: pattern (required), path, limit
- recent: list recently modified files. tool_args: path, days, limit
- rename: replace text in file names within a folder; previews unless apply is \"true\". tool_args: path (required), from (required), to (required), apply
- backup: copy a file or folder to a timestamped .bak copy. tool_args: path (required), dest
- clean: remove *.tmp, *.bak and ~ files; previews unless apply is \"true\". tool_args: path, apply";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToolOutcome {
    pub(crate) code: i32,
    pub(crate) output: String,
}

impl ToolOutcome {
    fn ok(output: String) -> Self {
        Self { code: 0, output }
    }
}

#[derive(Parser, Debug)]
#[command(name = "search", about = "Find files by name")]
struct SearchArgs {
    #[arg(long)]
    pattern: String,
    #[arg(long, default_value = ".")]
    path: PathBuf,
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Parser, Debug)]
#[command(name = "recent", about = "List recently modified files")]
struct RecentArgs {
    #[arg(long, default_value = ".")]
    path: PathBuf,
    #[arg(long, default_value_t = 7)]
    days: u64,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Parser, Debug)]
#[command(name = "rename", about = "Replace text in file names")]
struct RenameArgs {
    #[arg(long)]
    path: PathBuf,
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long, num_args = 0..=1, default_value = "false", default_missing_value = "true",
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    apply: bool,
}

#[derive(Parser, Debug)]
#[command(name = "backup", about = "Copy a file or folder to a timestamped backup")]
struct BackupArgs {
    #[arg(long)]
    path: PathBuf,
    #[arg(long)]
    dest: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(name = "clean", about = "Remove temporary and backup files")]
struct CleanArgs {
    #[arg(long, default_value = ".")]
    path: PathBuf,
    #[arg(long, num_args = 0..=1, default_value = "false", default_missing_value = "true",
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    apply: bool,
}

/// `{"pattern": "x"}` -> `["--pattern=x"]`.
pub(crate) fn tool_argv(args: &ArgMap) -> Vec<String> {
    args.iter()
        .map(|(key, value)| format!("--{}={value}", key.trim().trim_start_matches('-')))
        .collect()
}

pub(crate) fn run_by_name(name: &str, args: &[String]) -> Result<ToolOutcome, PilotError> {
    let name = name.trim().to_ascii_lowercase();
    let argv = std::iter::once(name.clone()).chain(args.iter().cloned());
    tracing::info!(tool = %name, args = args.len(), "running built-in tool");
    let parsed = match name.as_str() {
        "search" => SearchArgs::try_parse_from(argv).map(|a| search(&a)),
        "recent" => RecentArgs::try_parse_from(argv).map(|a| recent(&a)),
        "rename" => RenameArgs::try_parse_from(argv).map(|a| rename(&a)),
        "backup" => BackupArgs::try_parse_from(argv).map(|a| backup(&a)),
        "clean" => CleanArgs::try_parse_from(argv).map(|a| clean(&a)),
        _ => {
            let suggestion = closest_match(&name, TOOL_NAMES.iter().copied(), 3);
            return Err(PilotError::not_found(format!("tool {name}"), suggestion));
        }
    };
    match parsed {
        Ok(result) => result,
        Err(err) => Ok(ToolOutcome {
            code: 2,
            output: err.to_string(),
        }),
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn walk_files(root: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

/// `*` matches any run of characters; anything else is a case-insensitive
/// substring match.
fn name_matcher(pattern: &str) -> Result<regex::Regex, PilotError> {
    let escaped = regex::escape(pattern.trim()).replace("\\*", ".*");
    let source = if pattern.contains('*') {
        format!("(?i)^{escaped}$")
    } else {
        format!("(?i){escaped}")
    };
    regex::Regex::new(&source).map_err(|err| PilotError::ValidationFailed(err.to_string()))
}

fn require_dir(path: &Path) -> Result<(), PilotError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(PilotError::not_found(path.display().to_string(), None))
    }
}

fn search(args: &SearchArgs) -> Result<ToolOutcome, PilotError> {
    require_dir(&args.path)?;
    let matcher = name_matcher(&args.pattern)?;
    let hits: Vec<String> = walk_files(&args.path)
        .filter(|e| matcher.is_match(&e.file_name().to_string_lossy()))
        .take(args.limit)
        .map(|e| display_relative(&args.path, e.path()))
        .collect();
    if hits.is_empty() {
        return Ok(ToolOutcome::ok(format!("no files match '{}'", args.pattern)));
    }
    Ok(ToolOutcome::ok(hits.join("\n")))
}

fn recent(args: &RecentArgs) -> Result<ToolOutcome, PilotError> {
    require_dir(&args.path)?;
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(args.days.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut files: Vec<(SystemTime, PathBuf)> = walk_files(&args.path)
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            (modified >= cutoff).then(|| (modified, e.into_path()))
        })
        .collect();
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    if files.is_empty() {
        return Ok(ToolOutcome::ok(format!(
            "no files modified in the last {} days",
            args.days
        )));
    }
    let lines: Vec<String> = files
        .into_iter()
        .take(args.limit)
        .map(|(modified, path)| {
            let stamp: chrono::DateTime<chrono::Local> = modified.into();
            format!(
                "{}  {}",
                stamp.format("%Y-%m-%d %H:%M"),
                display_relative(&args.path, &path)
            )
        })
        .collect();
    Ok(ToolOutcome::ok(lines.join("\n")))
}

fn rename(args: &RenameArgs) -> Result<ToolOutcome, PilotError> {
    require_dir(&args.path)?;
    if args.from.is_empty() {
        return Err(PilotError::ValidationFailed("--from must not be empty".to_string()));
    }
    let mut lines = Vec::new();
    let mut entries: Vec<PathBuf> = fs::read_dir(&args.path)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();
    for path in entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.contains(&args.from) {
            continue;
        }
        let renamed = name.replace(&args.from, &args.to);
        let target = path.with_file_name(&renamed);
        if target.exists() {
            lines.push(format!("skip {name}: {renamed} already exists"));
            continue;
        }
        if args.apply {
            fs::rename(&path, &target)?;
            lines.push(format!("renamed {name} -> {renamed}"));
        } else {
            lines.push(format!("would rename {name} -> {renamed}"));
        }
    }
    if lines.is_empty() {
        lines.push(format!("no file names contain '{}'", args.from));
    } else if !args.apply {
        lines.push("preview only; pass --apply to rename".to_string());
    }
    Ok(ToolOutcome::ok(lines.join("\n")))
}

fn backup_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    format!("{name}.{}.bak", chrono::Local::now().format("%Y%m%d-%H%M%S"))
}

/// Canonical when the path exists, otherwise made absolute lexically.
fn absolute_path(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn backup(args: &BackupArgs) -> Result<ToolOutcome, PilotError> {
    if !args.path.exists() {
        return Err(PilotError::not_found(args.path.display().to_string(), None));
    }
    let dest_dir = match &args.dest {
        Some(dest) => dest.clone(),
        None => args
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    if args.path.is_dir() && absolute_path(&dest_dir).starts_with(absolute_path(&args.path)) {
        return Ok(ToolOutcome {
            code: 2,
            output: format!(
                "destination {} is inside {}; pick a directory outside the one being backed up",
                dest_dir.display(),
                args.path.display()
            ),
        });
    }
    fs::create_dir_all(&dest_dir)?;
    let target = dest_dir.join(backup_name(&args.path));
    if args.path.is_file() {
        fs::copy(&args.path, &target)?;
        return Ok(ToolOutcome::ok(format!("backed up to {}", target.display())));
    }
    let mut copied = 0usize;
    for entry in WalkDir::new(&args.path).into_iter().filter_map(Result::ok) {
        let relative = entry.path().strip_prefix(&args.path).unwrap_or(entry.path());
        let out = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&out)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &out)?;
            copied += 1;
        }
    }
    Ok(ToolOutcome::ok(format!(
        "backed up {copied} files to {}",
        target.display()
    )))
}

fn is_clean_candidate(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tmp") || lower.ends_with(".bak") || lower.ends_with('~')
}

fn clean(args: &CleanArgs) -> Result<ToolOutcome, PilotError> {
    require_dir(&args.path)?;
    let candidates: Vec<PathBuf> = walk_files(&args.path)
        .filter(|e| is_clean_candidate(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect();
    if candidates.is_empty() {
        return Ok(ToolOutcome::ok("nothing to clean".to_string()));
    }
    let mut lines = Vec::new();
    for path in &candidates {
        let shown = display_relative(&args.path, path);
        if args.apply {
            fs::remove_file(path)?;
            lines.push(format!("removed {shown}"));
        } else {
            lines.push(format!("would remove {shown}"));
        }
    }
    if !args.apply {
        lines.push(format!(
            "{} files; pass --apply to remove them",
            candidates.len()
        ));
    }
    Ok(ToolOutcome::ok(lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(key: &str, value: &Path) -> String {
        format!("--{key}={}", value.display())
    }

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn argv_uses_long_assignments() {
        let mut map = ArgMap::new();
        map.insert("-apply".to_string(), "true".to_string());
        map.insert("path".to_string(), "/tmp/x y".to_string());
        assert_eq!(tool_argv(&map), vec!["--apply=true", "--path=/tmp/x y"]);
    }

    #[test]
    fn search_matches_wildcards_and_substrings() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Report-2024.txt"));
        touch(&dir.path().join("notes.md"));
        fs::create_dir(dir.path().join(".git")).unwrap();
        touch(&dir.path().join(".git").join("report.txt"));

        let out = run_by_name("search", &[arg("path", dir.path()), "--pattern=report".into()]).unwrap();
        assert_eq!(out.code, 0);
        assert_eq!(out.output, "Report-2024.txt");

        let out = run_by_name("search", &[arg("path", dir.path()), "--pattern=*.md".into()]).unwrap();
        assert_eq!(out.output, "notes.md");
    }

    #[test]
    fn recent_lists_new_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("fresh.txt"));
        let out = run_by_name("recent", &[arg("path", dir.path())]).unwrap();
        assert!(out.output.ends_with("fresh.txt"), "{}", out.output);
    }

    #[test]
    fn clean_previews_unless_applied() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.tmp"));
        touch(&dir.path().join("b.txt~"));
        touch(&dir.path().join("keep.txt"));

        let out = run_by_name("clean", &[arg("path", dir.path())]).unwrap();
        assert!(out.output.contains("would remove a.tmp"));
        assert!(dir.path().join("a.tmp").exists());

        let out = run_by_name("clean", &[arg("path", dir.path()), "--apply=true".into()]).unwrap();
        assert!(out.output.contains("removed b.txt~"));
        assert!(!dir.path().join("a.tmp").exists());
        assert!(!dir.path().join("b.txt~").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn rename_applies_replacements() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("draft_one.txt"));
        let base = [arg("path", dir.path()), "--from=draft".into(), "--to=final".into()];

        let out = run_by_name("rename", &base).unwrap();
        assert!(out.output.contains("would rename draft_one.txt -> final_one.txt"));

        let mut applied = base.to_vec();
        applied.push("--apply".into());
        run_by_name("rename", &applied).unwrap();
        assert!(dir.path().join("final_one.txt").exists());
    }

    #[test]
    fn backup_copies_next_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.ini");
        fs::write(&file, "k=v").unwrap();
        let out = run_by_name("backup", &[arg("path", &file)]).unwrap();
        assert!(out.output.starts_with("backed up to"));
        let copies: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .collect();
        assert_eq!(copies.len(), 1);
        assert_eq!(fs::read_to_string(copies[0].path()).unwrap(), "k=v");
    }

    #[test]
    fn backup_refuses_destination_inside_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("site");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("index.html"), "<p>").unwrap();
        let dest = src.join("backups");
        let out = run_by_name("backup", &[arg("path", &src), arg("dest", &dest)]).unwrap();
        assert_eq!(out.code, 2);
        assert!(!dest.exists());

        let outside = dir.path().join("backups");
        let out = run_by_name("backup", &[arg("path", &src), arg("dest", &outside)]).unwrap();
        assert_eq!(out.code, 0, "{}", out.output);
        assert!(out.output.starts_with("backed up 1 files"));
    }

    #[test]
    fn bad_arguments_exit_two() {
        let out = run_by_name("search", &["--limit=3".to_string()]).unwrap();
        assert_eq!(out.code, 2);
    }

    #[test]
    fn unknown_tool_suggests() {
        match run_by_name("serch", &[]) {
            Err(PilotError::NotFound { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("search"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
