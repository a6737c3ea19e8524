use crate::{Action, ArgMap, Decision, RiskLevel, RiskPolicy, parse_bool_text};

const DESTRUCTIVE_VERBS: &[&str] = &["reset", "delete", "drop", "rm"];

fn flag_set(args: &ArgMap, key: &str) -> bool {
    args.iter()
        .any(|(k, v)| k.trim_start_matches('-').eq_ignore_ascii_case(key) && parse_bool_text(v))
}

/// Static risk of running built-in tool `name` with `args`.
pub(crate) fn tool_risk(name: &str, args: &ArgMap) -> RiskLevel {
    match name.trim().to_ascii_lowercase().as_str() {
        "search" | "recent" => RiskLevel::Low,
        "clean" | "rename" => {
            if flag_set(args, "apply") {
                RiskLevel::High
            } else {
                RiskLevel::Low
            }
        }
        "backup" => RiskLevel::Medium,
        _ => RiskLevel::Medium,
    }
}

pub(crate) fn plugin_risk(name: &str) -> RiskLevel {
    let lower = name.to_ascii_lowercase();
    if DESTRUCTIVE_VERBS.iter().any(|verb| lower.contains(verb)) {
        RiskLevel::High
    } else {
        RiskLevel::Medium
    }
}

pub(crate) fn classify(decision: &Decision) -> RiskLevel {
    match decision.action {
        Action::Answer => RiskLevel::Low,
        Action::RunPlugin => plugin_risk(&decision.plugin),
        Action::RunTool => tool_risk(&decision.tool, &decision.tool_args),
        Action::CreateFunction => RiskLevel::Medium,
    }
}

/// Whether the user must confirm, given the policy and the caller's own flag
/// for this kind of action.
pub(crate) fn needs_confirmation(policy: RiskPolicy, caller_flag: bool, risk: RiskLevel) -> bool {
    match policy {
        RiskPolicy::Strict => true,
        RiskPolicy::Off => caller_flag,
        RiskPolicy::Normal => caller_flag || risk == RiskLevel::High,
    }
}

/// `true` when an empty reply means "proceed".
pub(crate) fn default_to_proceed(risk: RiskLevel) -> bool {
    risk != RiskLevel::High
}

/// Interpret a typed reply; empty input takes the risk-dependent default.
pub(crate) fn interpret_reply(reply: &str, risk: RiskLevel) -> bool {
    match reply.trim().to_ascii_lowercase().as_str() {
        "" => default_to_proceed(risk),
        "y" | "yes" => true,
        _ => false,
    }
}

pub(crate) fn confirmation_prompt(summary: &str, risk: RiskLevel) -> String {
    let choices = if default_to_proceed(risk) { "[Y/n]" } else { "[y/N]" };
    format!("{summary} (risk: {}) proceed? {choices} ", risk.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> ArgMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn tool_table() {
        assert_eq!(tool_risk("search", &ArgMap::new()), RiskLevel::Low);
        assert_eq!(tool_risk("clean", &ArgMap::new()), RiskLevel::Low);
        assert_eq!(tool_risk("clean", &args(&[("apply", "true")])), RiskLevel::High);
        assert_eq!(tool_risk("rename", &args(&[("--apply", "yes")])), RiskLevel::High);
        assert_eq!(tool_risk("rename", &args(&[("apply", "false")])), RiskLevel::Low);
        assert_eq!(tool_risk("backup", &ArgMap::new()), RiskLevel::Medium);
        assert_eq!(tool_risk("mystery", &ArgMap::new()), RiskLevel::Medium);
    }

    #[test]
    fn destructive_plugin_names_are_high() {
        assert_eq!(plugin_risk("db_reset"), RiskLevel::High);
        assert_eq!(plugin_risk("fs_DeleteOld"), RiskLevel::High);
        assert_eq!(plugin_risk("net_ping"), RiskLevel::Medium);
    }

    #[test]
    fn answers_are_low() {
        assert_eq!(classify(&Decision::answer("hi")), RiskLevel::Low);
    }

    #[test]
    fn strict_always_confirms() {
        let decision = Decision {
            action: Action::RunTool,
            tool: "clean".to_string(),
            tool_args: args(&[("apply", "true")]),
            ..Decision::default()
        };
        let risk = classify(&decision);
        assert_eq!(risk, RiskLevel::High);
        assert!(needs_confirmation(RiskPolicy::Strict, false, risk));
        assert!(needs_confirmation(RiskPolicy::Strict, false, RiskLevel::Low));
    }

    #[test]
    fn normal_and_off_policies() {
        assert!(needs_confirmation(RiskPolicy::Normal, false, RiskLevel::High));
        assert!(!needs_confirmation(RiskPolicy::Normal, false, RiskLevel::Medium));
        assert!(needs_confirmation(RiskPolicy::Normal, true, RiskLevel::Low));
        assert!(!needs_confirmation(RiskPolicy::Off, false, RiskLevel::High));
        assert!(needs_confirmation(RiskPolicy::Off, true, RiskLevel::Low));
    }

    #[test]
    fn empty_reply_defaults_depend_on_risk() {
        assert!(!interpret_reply("", RiskLevel::High));
        assert!(interpret_reply("", RiskLevel::Medium));
        assert!(interpret_reply(" YES ", RiskLevel::High));
        assert!(!interpret_reply("n", RiskLevel::Low));
        assert!(confirmation_prompt("clean", RiskLevel::High).ends_with("[y/N] "));
    }
}
