use std::path::{Path, PathBuf};

use crate::{extension_lower, find_executable};

/// Extensions that hold PowerShell function declarations.
pub(crate) const FUNCTION_SOURCE_EXTENSIONS: &[&str] = &["psm1", "ps1"];

/// An interpreter program plus the fixed arguments placed before the script path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InterpreterSpec {
    pub(crate) program: &'static str,
    pub(crate) args: &'static [&'static str],
}

const BASH: InterpreterSpec = InterpreterSpec { program: "bash", args: &[] };
const SH: InterpreterSpec = InterpreterSpec { program: "sh", args: &[] };
const PYTHON3: InterpreterSpec = InterpreterSpec { program: "python3", args: &[] };
const PYTHON: InterpreterSpec = InterpreterSpec { program: "python", args: &[] };
const PY_LAUNCHER: InterpreterSpec = InterpreterSpec { program: "py", args: &[] };
const CMD: InterpreterSpec = InterpreterSpec { program: "cmd", args: &["/C"] };
const PWSH_FILE: InterpreterSpec = InterpreterSpec {
    program: "pwsh",
    args: &["-NoProfile", "-NonInteractive", "-File"],
};
const PWSH_FILE_BYPASS: InterpreterSpec = InterpreterSpec {
    program: "pwsh",
    args: &["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-File"],
};
const WINDOWS_POWERSHELL_FILE: InterpreterSpec = InterpreterSpec {
    program: "powershell",
    args: &["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-File"],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub(crate) fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }

    /// Standalone script extensions, most preferred first.
    pub(crate) fn script_extensions(&self) -> &'static [&'static str] {
        match self {
            Platform::Posix => &["sh", "py", "ps1", "cmd", "bat"],
            Platform::Windows => &["ps1", "cmd", "bat", "py", "sh"],
        }
    }

    pub(crate) fn script_rank(&self, path: &Path) -> Option<usize> {
        let ext = extension_lower(path);
        self.script_extensions().iter().position(|e| *e == ext)
    }

    /// Interpreter candidates for a script extension, tried in order.
    pub(crate) fn interpreters(&self, extension: &str) -> &'static [InterpreterSpec] {
        match (self, extension) {
            (Platform::Posix, "sh") => &[BASH, SH],
            (Platform::Posix, "py") => &[PYTHON3, PYTHON],
            (Platform::Posix, "ps1") => &[PWSH_FILE],
            (Platform::Windows, "ps1") => &[PWSH_FILE_BYPASS, WINDOWS_POWERSHELL_FILE],
            (Platform::Windows, "cmd") | (Platform::Windows, "bat") => &[CMD],
            (Platform::Windows, "py") => &[PYTHON, PY_LAUNCHER],
            (Platform::Windows, "sh") => &[BASH],
            _ => &[],
        }
    }

    /// PowerShell host used for function dispatch and syntax checks.
    pub(crate) fn powershell_candidates(&self) -> &'static [&'static str] {
        match self {
            Platform::Posix => &["pwsh"],
            Platform::Windows => &["pwsh", "powershell"],
        }
    }
}

/// First installed interpreter for `extension`, with its fixed arguments.
pub(crate) fn resolve_interpreter(platform: Platform, extension: &str) -> Option<(PathBuf, Vec<String>)> {
    platform.interpreters(extension).iter().find_map(|spec| {
        find_executable(spec.program)
            .map(|p| (p, spec.args.iter().map(|a| a.to_string()).collect()))
    })
}

pub(crate) fn resolve_powershell(platform: Platform) -> Option<PathBuf> {
    platform
        .powershell_candidates()
        .iter()
        .find_map(|program| find_executable(program))
}

pub(crate) fn function_source_rank(path: &Path) -> Option<usize> {
    let ext = extension_lower(path);
    FUNCTION_SOURCE_EXTENSIONS.iter().position(|e| *e == ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_prefers_shell_over_cmd() {
        let p = Platform::Posix;
        assert!(p.script_rank(Path::new("a.sh")) < p.script_rank(Path::new("a.cmd")));
        assert_eq!(p.script_rank(Path::new("a.txt")), None);
    }

    #[test]
    fn windows_prefers_powershell() {
        let p = Platform::Windows;
        assert_eq!(p.script_rank(Path::new("a.PS1")), Some(0));
        assert!(p.script_rank(Path::new("a.cmd")) < p.script_rank(Path::new("a.sh")));
    }

    #[test]
    fn cmd_has_no_posix_interpreter() {
        assert!(Platform::Posix.interpreters("cmd").is_empty());
        assert_eq!(Platform::Windows.interpreters("bat")[0].program, "cmd");
    }

    #[test]
    fn module_files_rank_before_scripts() {
        assert_eq!(function_source_rank(Path::new("x.psm1")), Some(0));
        assert_eq!(function_source_rank(Path::new("x.ps1")), Some(1));
        assert_eq!(function_source_rank(Path::new("x.sh")), None);
    }
}
