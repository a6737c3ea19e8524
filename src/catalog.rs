//! Plugin discovery, metadata lookup and the stamp-validated catalog cache.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, RwLock};
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use crate::{
    CatalogEntry, EntryKind, FUNCTION_SCAN_MAX_DEPTH, FunctionFile, HelpBlock, InvocationMethod,
    ParameterDetail, PilotError, Platform, PluginInfo, closest_match, declared_functions, extension_lower,
    file_stem_string, function_source_rank, is_private_name, parse_function_help,
    parse_function_parameters, parse_script_help, parse_script_parameters,
};

static CATALOG: LazyLock<CatalogStore> = LazyLock::new(CatalogStore::new);

/// Process-wide catalog used by the CLI.
pub(crate) fn catalog() -> &'static CatalogStore {
    &CATALOG
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileStamp {
    modified_ns: u128,
    len: u64,
}

pub(crate) fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = fs::metadata(path).ok()?;
    let modified_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Some(FileStamp {
        modified_ns,
        len: meta.len(),
    })
}

#[derive(Debug, Clone)]
enum CachedValue {
    Entries(Vec<CatalogEntry>),
    Info(PluginInfo),
    Files(Vec<FunctionFile>),
    Rendered(String),
}

#[derive(Debug, Clone)]
struct CacheRecord {
    directory: PathBuf,
    directory_stamp: Option<FileStamp>,
    per_file_stamps: BTreeMap<PathBuf, Option<FileStamp>>,
    value: CachedValue,
}

impl CacheRecord {
    fn is_fresh(&self) -> bool {
        if file_stamp(&self.directory) != self.directory_stamp {
            return false;
        }
        self.per_file_stamps
            .iter()
            .all(|(path, stamp)| file_stamp(path) == *stamp)
    }
}

/// Everything discovered under a plugin root at one point in time.
#[derive(Debug, Default)]
struct Scan {
    directory_stamp: Option<FileStamp>,
    stamps: BTreeMap<PathBuf, Option<FileStamp>>,
    scripts: Vec<PathBuf>,
    /// Function source files with every function they declare, in file preference order.
    sources: Vec<(PathBuf, Vec<String>)>,
}

pub(crate) struct CatalogStore {
    platform: Platform,
    cache: RwLock<HashMap<String, CacheRecord>>,
    rebuilds: AtomicUsize,
}

impl CatalogStore {
    pub(crate) fn new() -> Self {
        Self::with_platform(Platform::current())
    }

    pub(crate) fn with_platform(platform: Platform) -> Self {
        Self {
            platform,
            cache: RwLock::new(HashMap::new()),
            rebuilds: AtomicUsize::new(0),
        }
    }

    pub(crate) fn platform(&self) -> Platform {
        self.platform
    }

    /// Number of cache misses that triggered a rescan.
    #[cfg(test)]
    pub(crate) fn rebuild_count(&self) -> usize {
        self.rebuilds.load(Ordering::Relaxed)
    }

    pub(crate) fn list_entries(
        &self,
        root: &Path,
        include_functions: bool,
    ) -> Result<Vec<CatalogEntry>, PilotError> {
        let key = cache_key(root, &format!("entries:functions={include_functions}"));
        if let Some(CachedValue::Entries(entries)) = self.cached(&key) {
            return Ok(entries);
        }
        let scan = self.scan(root)?;
        let entries = build_entries(&scan, include_functions, self.platform);
        self.store(key, root, &scan, CachedValue::Entries(entries.clone()));
        Ok(entries)
    }

    pub(crate) fn list_function_files(&self, root: &Path) -> Result<Vec<FunctionFile>, PilotError> {
        let key = cache_key(root, "function_files");
        if let Some(CachedValue::Files(files)) = self.cached(&key) {
            return Ok(files);
        }
        let scan = self.scan(root)?;
        let files = build_function_files(&scan);
        self.store(key, root, &scan, CachedValue::Files(files.clone()));
        Ok(files)
    }

    pub(crate) fn get_info(&self, root: &Path, name: &str) -> Result<PluginInfo, PilotError> {
        let key = cache_key(root, &format!("info:{}", name.trim().to_ascii_lowercase()));
        if let Some(CachedValue::Info(info)) = self.cached(&key) {
            return Ok(info);
        }
        let scan = self.scan(root)?;
        let Some(info) = build_info(&scan, name.trim(), self.platform)? else {
            return Err(PilotError::not_found(name.trim(), self.suggest(root, name)));
        };
        self.store(key, root, &scan, CachedValue::Info(info.clone()));
        Ok(info)
    }

    /// Closest catalog name for "did you mean" hints.
    pub(crate) fn suggest(&self, root: &Path, name: &str) -> Option<String> {
        let entries = self.list_entries(root, true).ok()?;
        closest_match(name, entries.iter().map(|e| e.name.as_str()), 3)
    }

    /// Planner-facing catalog text, grouped by source file.
    pub(crate) fn render(&self, root: &Path) -> Result<String, PilotError> {
        let key = cache_key(root, "rendered");
        if let Some(CachedValue::Rendered(text)) = self.cached(&key) {
            return Ok(text);
        }
        let scan = self.scan(root)?;
        let text = render_scan(root, &scan, self.platform);
        self.store(key, root, &scan, CachedValue::Rendered(text.clone()));
        Ok(text)
    }

    /// Drop every cached key that belongs to `root`.
    pub(crate) fn invalidate(&self, root: &Path) {
        let prefix = cache_key(root, "");
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.retain(|key, _| !key.starts_with(&prefix));
        tracing::debug!(root = %root.display(), "catalog cache invalidated");
    }

    /// Append `code` to `target` (or a new `<root>/<prefix>.psm1`) and
    /// invalidate the root before returning the written path.
    pub(crate) fn write_function(
        &self,
        root: &Path,
        name: &str,
        code: &str,
        target: Option<&Path>,
    ) -> Result<PathBuf, PilotError> {
        let path = match target {
            Some(t) if t.is_absolute() => t.to_path_buf(),
            Some(t) => root.join(t),
            None => root.join(format!("{}.psm1", function_prefix(name))),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = match fs::read_to_string(&path) {
            Ok(existing) => existing,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        if !contents.is_empty() {
            if !contents.ends_with('\n') {
                contents.push('\n');
            }
            contents.push('\n');
        }
        contents.push_str(code.trim_end());
        contents.push('\n');
        let tmp = path.with_extension("tmp-write");
        fs::write(&tmp, &contents)?;
        fs::rename(&tmp, &path)?;
        self.invalidate(root);
        tracing::info!(function = name, path = %path.display(), "function written to catalog");
        Ok(path)
    }

    fn cached(&self, key: &str) -> Option<CachedValue> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            match cache.get(key) {
                Some(record) if record.is_fresh() => {
                    tracing::trace!(key, "catalog cache hit");
                    return Some(record.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(key);
        tracing::debug!(key, "catalog cache stale");
        None
    }

    fn store(&self, key: String, root: &Path, scan: &Scan, value: CachedValue) {
        let record = CacheRecord {
            directory: root.to_path_buf(),
            directory_stamp: scan.directory_stamp,
            per_file_stamps: scan.stamps.clone(),
            value,
        };
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, record);
    }

    fn scan(&self, root: &Path) -> Result<Scan, PilotError> {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        let scan = scan_root(root, self.platform)?;
        tracing::debug!(
            root = %root.display(),
            scripts = scan.scripts.len(),
            sources = scan.sources.len(),
            "catalog rebuilt"
        );
        Ok(scan)
    }
}

fn cache_key(root: &Path, shape: &str) -> String {
    format!("{}\u{1f}{shape}", root.display())
}

/// `net_ping` -> `net`; names without a prefix keep their full text.
pub(crate) fn function_prefix(name: &str) -> String {
    name.split('_')
        .find(|part| !part.is_empty())
        .unwrap_or(name)
        .to_ascii_lowercase()
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn scan_root(root: &Path, platform: Platform) -> Result<Scan, PilotError> {
    let directory_stamp = file_stamp(root);
    let mut scan = Scan {
        directory_stamp,
        ..Scan::default()
    };
    if directory_stamp.is_none() || !root.is_dir() {
        return Ok(scan);
    }

    let walker = WalkDir::new(root)
        .max_depth(FUNCTION_SCAN_MAX_DEPTH)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));
    let mut sources: Vec<PathBuf> = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                if err.depth() == 0 {
                    return Err(err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("plugin root walk failed"))
                        .into());
                }
                tracing::debug!(error = %err, "skipping unreadable catalog entry");
                continue;
            }
        };
        let path = entry.path().to_path_buf();
        if entry.file_type().is_dir() {
            if entry.depth() > 0 {
                scan.stamps.insert(path.clone(), file_stamp(&path));
            }
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let is_script = entry.depth() == 1 && platform.script_rank(&path).is_some();
        let is_source = function_source_rank(&path).is_some();
        if !is_script && !is_source {
            continue;
        }
        scan.stamps.insert(path.clone(), file_stamp(&path));
        if is_script {
            scan.scripts.push(path.clone());
        }
        if is_source {
            sources.push(path);
        }
    }

    sources.sort_by(|a, b| {
        function_source_rank(a)
            .cmp(&function_source_rank(b))
            .then_with(|| a.cmp(b))
    });
    for path in sources {
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "unreadable function source");
                continue;
            }
        };
        let functions = declared_functions(&text);
        if !functions.is_empty() {
            scan.sources.push((path, functions));
        }
    }
    Ok(scan)
}

/// One script per stem: platform extension preference, then path.
fn preferred_scripts(scan: &Scan, platform: Platform) -> BTreeMap<String, (String, PathBuf)> {
    let mut chosen: BTreeMap<String, (String, PathBuf)> = BTreeMap::new();
    for path in &scan.scripts {
        let stem = file_stem_string(path);
        if stem.is_empty() {
            continue;
        }
        let key = stem.to_ascii_lowercase();
        let better = match chosen.get(&key) {
            None => true,
            Some((_, current)) => {
                let rank = platform.script_rank(path);
                let current_rank = platform.script_rank(current);
                rank < current_rank || (rank == current_rank && path < current)
            }
        };
        if better {
            chosen.insert(key, (stem, path.clone()));
        }
    }
    chosen
}

fn build_entries(scan: &Scan, include_functions: bool, platform: Platform) -> Vec<CatalogEntry> {
    let mut by_name: BTreeMap<String, CatalogEntry> = BTreeMap::new();
    for (key, (stem, path)) in preferred_scripts(scan, platform) {
        by_name.insert(
            key,
            CatalogEntry {
                name: stem,
                kind: EntryKind::Script,
                path,
            },
        );
    }
    if include_functions {
        for (path, functions) in &scan.sources {
            for name in functions.iter().filter(|n| !is_private_name(n)) {
                by_name
                    .entry(name.to_ascii_lowercase())
                    .or_insert_with(|| CatalogEntry {
                        name: name.clone(),
                        kind: EntryKind::Function,
                        path: path.clone(),
                    });
            }
        }
    }
    let mut entries: Vec<CatalogEntry> = by_name.into_values().collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name).then(a.kind.cmp(&b.kind)));
    entries
}

fn build_function_files(scan: &Scan) -> Vec<FunctionFile> {
    scan.sources
        .iter()
        .filter_map(|(path, functions)| {
            let public: Vec<String> = functions
                .iter()
                .filter(|n| !is_private_name(n))
                .cloned()
                .collect();
            (!public.is_empty()).then(|| FunctionFile {
                path: path.clone(),
                functions: public,
            })
        })
        .collect()
}

fn build_info(scan: &Scan, name: &str, platform: Platform) -> Result<Option<PluginInfo>, PilotError> {
    let key = name.to_ascii_lowercase();
    if let Some((stem, path)) = preferred_scripts(scan, platform).remove(&key) {
        let text = fs::read_to_string(&path).unwrap_or_default();
        let ext = extension_lower(&path);
        let help = parse_script_help(&text, &ext);
        let parameter_details = if ext == "ps1" {
            parse_script_parameters(&text)
        } else {
            Vec::new()
        };
        return Ok(Some(PluginInfo {
            name: stem,
            kind: EntryKind::Script,
            sources: vec![path.clone()],
            path,
            invocation_method: InvocationMethod::Interpreter,
            synopsis: help.synopsis,
            description: help.description,
            parameters: help.parameters,
            parameter_details,
            examples: help.examples,
        }));
    }

    if is_private_name(name) {
        return Ok(None);
    }
    let mut declared_name = None;
    let sources: Vec<PathBuf> = scan
        .sources
        .iter()
        .filter(|(_, functions)| {
            functions.iter().any(|f| {
                let hit = f.eq_ignore_ascii_case(name);
                if hit && declared_name.is_none() {
                    declared_name = Some(f.clone());
                }
                hit
            })
        })
        .map(|(path, _)| path.clone())
        .collect();
    let Some(declared_name) = declared_name else {
        return Ok(None);
    };

    let mut help = HelpBlock::default();
    let mut parameter_details: Vec<ParameterDetail> = Vec::new();
    for (idx, path) in sources.iter().enumerate() {
        let text = fs::read_to_string(path)?;
        if idx == 0 {
            parameter_details = parse_function_parameters(&text, &declared_name);
        }
        let parsed = parse_function_help(&text, &declared_name);
        if parsed != HelpBlock::default() {
            help = parsed;
            break;
        }
    }
    Ok(Some(PluginInfo {
        name: declared_name,
        kind: EntryKind::Function,
        path: sources[0].clone(),
        sources,
        invocation_method: InvocationMethod::DotSource,
        synopsis: help.synopsis,
        description: help.description,
        parameters: help.parameters,
        parameter_details,
        examples: help.examples,
    }))
}

/// Compact `-Name <type>` signature used in the planner catalog.
pub(crate) fn parameter_signature(details: &[ParameterDetail]) -> String {
    details
        .iter()
        .map(|p| {
            let body = if p.is_switch {
                format!("-{} [switch]", p.name)
            } else if !p.allowed_values.is_empty() {
                format!("-{} <{}>", p.name, p.allowed_values.join("|"))
            } else {
                format!("-{} <{}>", p.name, p.type_name.as_deref().unwrap_or("value"))
            };
            if p.mandatory {
                format!("{body} (mandatory)")
            } else {
                body
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn relative_label(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn render_scan(root: &Path, scan: &Scan, platform: Platform) -> String {
    let mut out = String::new();
    let scripts = preferred_scripts(scan, platform);
    let mut rendered: std::collections::HashSet<String> = scripts.keys().cloned().collect();

    for file in build_function_files(scan) {
        let mut lines = Vec::new();
        for name in &file.functions {
            if !rendered.insert(name.to_ascii_lowercase()) {
                continue;
            }
            let Ok(Some(info)) = build_info(scan, name, platform) else {
                continue;
            };
            let signature = parameter_signature(&info.parameter_details);
            let mut line = format!("- {}", info.name);
            if !signature.is_empty() {
                line.push(' ');
                line.push_str(&signature);
            }
            if !info.synopsis.is_empty() {
                line.push_str(" : ");
                line.push_str(&info.synopsis);
            }
            lines.push(line);
        }
        if lines.is_empty() {
            continue;
        }
        let label = relative_label(root, &file.path);
        out.push_str(&format!("## {} ({label})\n", file_stem_string(&file.path)));
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }

    if !scripts.is_empty() {
        out.push_str("## Standalone scripts\n");
        for (stem, path) in scripts.values() {
            let text = fs::read_to_string(path).unwrap_or_default();
            let help = parse_script_help(&text, &extension_lower(path));
            let mut line = format!("- {stem} ({})", relative_label(root, path));
            if !help.synopsis.is_empty() {
                line.push_str(" : ");
                line.push_str(&help.synopsis);
            }
            out.push_str(&line);
            out.push('\n');
        }
    }

    if out.is_empty() {
        out.push_str("(no plugins installed)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{FileTime, set_file_mtime};

    const NET_MODULE: &str = r#"
<#
.SYNOPSIS
Ping a host.
#>
function net_ping {
    param(
        [Parameter(Mandatory)]
        [string]$Target,
        [switch]$Quiet
    )
    _net_log $Target
}

function _net_log($Message) { Write-Host $Message }

function disk_report { 'from function' }
"#;

    fn write(path: &Path, text: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, text).unwrap();
    }

    fn bump_mtime(path: &Path, secs: i64) {
        set_file_mtime(path, FileTime::from_unix_time(1_700_000_000 + secs, 0)).unwrap();
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("net.psm1"), NET_MODULE);
        write(&dir.path().join("disk_report.sh"), "#!/bin/sh\n# Disk usage\ndf -h\n");
        dir
    }

    #[test]
    fn script_wins_over_function_with_same_name() {
        let dir = fixture();
        let store = CatalogStore::with_platform(Platform::Posix);
        let entries = store.list_entries(dir.path(), true).unwrap();
        let disk: Vec<_> = entries.iter().filter(|e| e.name == "disk_report").collect();
        assert_eq!(disk.len(), 1);
        assert_eq!(disk[0].kind, EntryKind::Script);

        let info = store.get_info(dir.path(), "disk_report").unwrap();
        assert_eq!(info.kind, EntryKind::Script);
        assert_eq!(info.synopsis, "Disk usage");
        assert_eq!(info.invocation_method, InvocationMethod::Interpreter);
    }

    #[test]
    fn private_helpers_are_never_listed() {
        let dir = fixture();
        let store = CatalogStore::with_platform(Platform::Posix);
        let entries = store.list_entries(dir.path(), true).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["disk_report", "net_ping"]);
        assert!(matches!(
            store.get_info(dir.path(), "_net_log"),
            Err(PilotError::NotFound { .. })
        ));
    }

    #[test]
    fn scripts_only_listing_skips_functions() {
        let dir = fixture();
        let store = CatalogStore::with_platform(Platform::Posix);
        let entries = store.list_entries(dir.path(), false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Script);
    }

    #[test]
    fn posix_prefers_sh_over_cmd() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.sh"), "echo a\n");
        write(&dir.path().join("a.cmd"), "echo a\r\n");
        let store = CatalogStore::with_platform(Platform::Posix);
        let entries = store.list_entries(dir.path(), true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[0].path, dir.path().join("a.sh"));

        let windows = CatalogStore::with_platform(Platform::Windows);
        let entries = windows.list_entries(dir.path(), true).unwrap();
        assert_eq!(entries[0].path, dir.path().join("a.cmd"));
    }

    #[test]
    fn missing_root_is_empty_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("absent");
        let store = CatalogStore::new();
        assert!(store.list_entries(&root, true).unwrap().is_empty());
        assert!(store.list_entries(&root, true).unwrap().is_empty());
        assert_eq!(store.rebuild_count(), 1);

        fs::create_dir_all(&root).unwrap();
        write(&root.join("x.sh"), "echo x\n");
        assert_eq!(store.list_entries(&root, true).unwrap().len(), 1);
        assert_eq!(store.rebuild_count(), 2);
    }

    #[test]
    fn cache_hit_until_a_file_changes() {
        let dir = fixture();
        let store = CatalogStore::with_platform(Platform::Posix);
        let first = store.list_entries(dir.path(), true).unwrap();
        let second = store.list_entries(dir.path(), true).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.rebuild_count(), 1);

        let module = dir.path().join("net.psm1");
        write(&module, &format!("{NET_MODULE}\nfunction net_trace {{ }}\n"));
        bump_mtime(&module, 10);
        let third = store.list_entries(dir.path(), true).unwrap();
        assert_eq!(store.rebuild_count(), 2);
        assert!(third.iter().any(|e| e.name == "net_trace"));
    }

    #[test]
    fn adding_and_removing_files_invalidates() {
        let dir = fixture();
        let store = CatalogStore::with_platform(Platform::Posix);
        store.list_entries(dir.path(), true).unwrap();

        write(&dir.path().join("backup_now.sh"), "echo hi\n");
        bump_mtime(dir.path(), 20);
        let entries = store.list_entries(dir.path(), true).unwrap();
        assert!(entries.iter().any(|e| e.name == "backup_now"));
        assert_eq!(store.rebuild_count(), 2);

        fs::remove_file(dir.path().join("backup_now.sh")).unwrap();
        bump_mtime(dir.path(), 30);
        let entries = store.list_entries(dir.path(), true).unwrap();
        assert!(!entries.iter().any(|e| e.name == "backup_now"));
        assert_eq!(store.rebuild_count(), 3);
    }

    #[test]
    fn changes_in_one_root_leave_other_roots_cached() {
        let a = fixture();
        let b = fixture();
        let store = CatalogStore::with_platform(Platform::Posix);
        store.list_entries(a.path(), true).unwrap();
        store.list_entries(b.path(), true).unwrap();
        assert_eq!(store.rebuild_count(), 2);

        let module = a.path().join("net.psm1");
        bump_mtime(&module, 40);
        store.list_entries(a.path(), true).unwrap();
        store.list_entries(b.path(), true).unwrap();
        assert_eq!(store.rebuild_count(), 3);
    }

    #[test]
    fn function_info_tracks_every_source() {
        let dir = fixture();
        write(&dir.path().join("lib/extra.ps1"), "function net_ping { 'shadow' }\n");
        let store = CatalogStore::with_platform(Platform::Posix);
        let info = store.get_info(dir.path(), "NET_PING").unwrap();
        assert_eq!(info.name, "net_ping");
        assert_eq!(info.kind, EntryKind::Function);
        assert_eq!(info.path, dir.path().join("net.psm1"));
        assert_eq!(info.sources.len(), 2);
        assert_eq!(info.synopsis, "Ping a host.");
        assert_eq!(info.parameter_details.len(), 2);
        assert!(info.parameter_details[0].mandatory);
    }

    #[test]
    fn function_without_help_still_has_info() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("bare.psm1"), "function bare_run { 'x' }\n");
        let store = CatalogStore::with_platform(Platform::Posix);
        let info = store.get_info(dir.path(), "bare_run").unwrap();
        assert!(info.synopsis.is_empty());
        assert!(info.parameters.is_empty());
        assert!(info.parameter_details.is_empty());
    }

    #[test]
    fn unknown_name_suggests_closest() {
        let dir = fixture();
        let store = CatalogStore::with_platform(Platform::Posix);
        match store.get_info(dir.path(), "net_pnig") {
            Err(PilotError::NotFound { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("net_ping"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn function_files_sorted_by_type_then_path() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.ps1"), "function a_one { }\n");
        write(&dir.path().join("z.psm1"), "function z_one { }\nfunction _z_hidden { }\n");
        write(&dir.path().join("only_private.psm1"), "function _p { }\n");
        let store = CatalogStore::with_platform(Platform::Posix);
        let files = store.list_function_files(dir.path()).unwrap();
        let names: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(names, vec![dir.path().join("z.psm1"), dir.path().join("a.ps1")]);
        assert_eq!(files[0].functions, vec!["z_one"]);
    }

    #[test]
    fn write_function_appends_and_invalidates() {
        let dir = fixture();
        let store = CatalogStore::with_platform(Platform::Posix);
        store.list_entries(dir.path(), true).unwrap();
        let written = store
            .write_function(dir.path(), "net_scan", "function net_scan { 'scan' }", Some(Path::new("net.psm1")))
            .unwrap();
        assert_eq!(written, dir.path().join("net.psm1"));
        let text = fs::read_to_string(&written).unwrap();
        assert!(text.contains("function net_ping"));
        assert!(text.trim_end().ends_with("function net_scan { 'scan' }"));
        let entries = store.list_entries(dir.path(), true).unwrap();
        assert!(entries.iter().any(|e| e.name == "net_scan"));
        assert_eq!(store.rebuild_count(), 2);
    }

    #[test]
    fn write_function_creates_prefix_module() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::with_platform(Platform::Posix);
        let written = store
            .write_function(dir.path(), "media_resize", "function media_resize { }", None)
            .unwrap();
        assert_eq!(written, dir.path().join("media.psm1"));
        assert_eq!(store.list_function_files(dir.path()).unwrap()[0].functions, vec!["media_resize"]);
    }

    #[test]
    fn render_groups_functions_by_file() {
        let dir = fixture();
        let store = CatalogStore::with_platform(Platform::Posix);
        let text = store.render(dir.path()).unwrap();
        assert!(text.contains("## net (net.psm1)"));
        assert!(text.contains("- net_ping -Target <string> (mandatory) -Quiet [switch] : Ping a host."));
        assert!(text.contains("## Standalone scripts"));
        assert!(text.contains("- disk_report (disk_report.sh) : Disk usage"));
        assert!(!text.contains("_net_log"));
    }

    #[test]
    fn function_prefix_takes_first_segment() {
        assert_eq!(function_prefix("Net_Ping"), "net");
        assert_eq!(function_prefix("standalone"), "standalone");
    }
}
