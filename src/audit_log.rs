use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::{AuditLogEntry, PilotError};

/// Append-only JSONL record of executed actions, one file per UTC day.
#[derive(Debug, Clone)]
pub(crate) struct AuditLog {
    dir: PathBuf,
    session: String,
}

impl AuditLog {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            session: format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), std::process::id()),
        }
    }

    pub(crate) fn record(
        &self,
        step: usize,
        action: &str,
        target: &str,
        args: &str,
        risk: &str,
        ok: bool,
    ) -> Result<(), PilotError> {
        let entry = AuditLogEntry {
            session: self.session.clone(),
            step,
            action: action.to_string(),
            target: target.to_string(),
            args: args.to_string(),
            risk: risk.to_string(),
            ok,
            ts_utc: Some(Utc::now().timestamp()),
        };
        append_log_jsonl(&self.dir, &entry)
    }
}

pub(crate) fn append_log_jsonl(log_dir: &Path, entry: &AuditLogEntry) -> Result<(), PilotError> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!("audit-{}.jsonl", Utc::now().format("%Y-%m-%d")));
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    let json = serde_json::to_string(entry).map_err(|err| PilotError::Io(err.into()))?;
    writeln!(file, "{json}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(dir: &Path) -> Vec<AuditLogEntry> {
        let mut out = Vec::new();
        for file in fs::read_dir(dir).unwrap() {
            let text = fs::read_to_string(file.unwrap().path()).unwrap();
            out.extend(text.lines().map(|l| serde_json::from_str::<AuditLogEntry>(l).unwrap()));
        }
        out
    }

    #[test]
    fn entries_round_trip_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        log.record(1, "run_tool", "search", "--pattern=x", "low", true).unwrap();
        log.record(2, "run_plugin", "db_reset", "", "high", false).unwrap();
        let other = AuditLog {
            dir: dir.path().to_path_buf(),
            session: "other".to_string(),
        };
        other.record(1, "answer", "", "", "low", true).unwrap();

        let entries = read_all(dir.path());
        assert_eq!(entries.len(), 3);
        let mine: Vec<_> = entries.iter().filter(|e| e.session == log.session).collect();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].target, "search");
        assert!(!mine[1].ok);
        assert!(mine[1].ts_utc.is_some());
    }

    #[test]
    fn creates_missing_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("audit");
        AuditLog::new(&nested)
            .record(1, "run_plugin", "net_ping", "-Target h", "medium", true)
            .unwrap();
        let files: Vec<_> = fs::read_dir(&nested).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(read_all(&nested)[0].args, "-Target h");
    }
}
