// Module declarations
mod audit_log;
mod bridge;
mod builder;
mod catalog;
mod cli;
mod config;
mod decision_cache;
mod error;
mod llm;
mod metadata;
mod planner;
mod platform;
mod risk;
mod session;
mod tools;
mod types;
mod ui;
mod util;

// Items are re-exported at crate root so modules can reach each other via `crate::`.
#[allow(unused_imports)]
pub(crate) use audit_log::*;
#[allow(unused_imports)]
pub(crate) use bridge::*;
#[allow(unused_imports)]
pub(crate) use builder::*;
#[allow(unused_imports)]
pub(crate) use catalog::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use decision_cache::*;
#[allow(unused_imports)]
pub(crate) use error::*;
#[allow(unused_imports)]
pub(crate) use llm::*;
#[allow(unused_imports)]
pub(crate) use metadata::*;
#[allow(unused_imports)]
pub(crate) use planner::*;
#[allow(unused_imports)]
pub(crate) use platform::*;
#[allow(unused_imports)]
pub(crate) use risk::*;
#[allow(unused_imports)]
pub(crate) use session::*;
#[allow(unused_imports)]
pub(crate) use tools::*;
#[allow(unused_imports)]
pub(crate) use types::*;
#[allow(unused_imports)]
pub(crate) use ui::*;
#[allow(unused_imports)]
pub(crate) use util::*;

use std::io::{self, BufRead, IsTerminal, Write};

use clap::Parser;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SCRIPTPILOT_LOG";

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => env_optional(LOG_ENV)
            .and_then(|spec| EnvFilter::try_new(spec).ok())
            .unwrap_or_else(|| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut overrides = Overrides {
        config: cli.config.clone(),
        plugins_dir: cli.plugins_dir.clone(),
        ..Overrides::default()
    };

    match cli.command {
        Command::Ask {
            request,
            max_steps,
            risk_policy,
            confirm_tools,
            confirm_plugins,
            yes,
            json,
            provider,
            model,
            base_url,
            no_env,
        } => {
            overrides.provider = provider;
            overrides.model = model;
            overrides.base_url = base_url;
            let cfg = resolve(&overrides)?;
            let human = !json;

            let llm = HttpLlm::new(cfg.llm.clone())?;
            let cache = DecisionCache::new(cfg.decision_cache_ttl_secs);
            let planner = Planner::new(&llm).with_cache(&cache).with_spinner(human);
            let builder = Builder::new(&llm, catalog()).with_spinner(human);
            let mut runner = LiveRunner::new(catalog(), &cfg.plugins_dir, builder, human);
            let mut confirmer: Box<dyn Confirmer> = if yes {
                Box::new(AutoApprove)
            } else {
                Box::new(StdinConfirmer)
            };
            let audit = cfg.log_dir.as_ref().map(AuditLog::new);
            let options = SessionOptions {
                max_steps: max_steps.unwrap_or(cfg.max_steps).max(1),
                policy: risk_policy.unwrap_or(cfg.risk_policy),
                confirm_tools: confirm_tools || cfg.confirm_tools,
                confirm_plugins: confirm_plugins || cfg.confirm_plugins,
                environment: (cfg.include_env_context && !no_env).then(environment_context),
                progress: human,
            };
            tracing::info!(
                provider = cfg.llm.provider.as_str(),
                model = %cfg.llm.model,
                root = %cfg.plugins_dir.display(),
                "starting session"
            );

            let mut code = 0;
            let mut handle = |request: &str| -> Result<(), Box<dyn std::error::Error>> {
                let result = Session::new(&planner, &mut runner, confirmer.as_mut(), options.clone())
                    .with_audit(audit.as_ref())
                    .run(request);
                if json {
                    print_json(&result.report())?;
                } else {
                    print_outcome(&result);
                }
                code = code.max(result.outcome.exit_code());
                Ok(())
            };

            if request.is_empty() {
                // One request per line; the planner and its decision cache are shared.
                let stdin = io::stdin();
                loop {
                    if human && stdin.is_terminal() {
                        eprint!("> ");
                        io::stderr().flush()?;
                    }
                    let mut line = String::new();
                    if stdin.lock().read_line(&mut line)? == 0 {
                        break;
                    }
                    let line = line.trim();
                    if matches!(line, "exit" | "quit") {
                        break;
                    }
                    if !line.is_empty() {
                        handle(line)?;
                    }
                }
            } else {
                handle(&request.join(" "))?;
            }
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }

        Command::Plugins { command } => {
            let cfg = resolve(&overrides)?;
            let root = cfg.plugins_dir.as_path();
            match command {
                PluginsCommand::List { functions, json } => {
                    let entries = catalog().list_entries(root, functions)?;
                    if json {
                        print_json(&entries)?;
                    } else {
                        print!("{}", render_entries(&entries));
                    }
                }
                PluginsCommand::Info { name, json } => {
                    let info = catalog().get_info(root, &name)?;
                    if json {
                        print_json(&info)?;
                    } else {
                        print!("{}", render_info(&info));
                    }
                }
                PluginsCommand::Files { json } => {
                    let files = catalog().list_function_files(root)?;
                    if json {
                        print_json(&files)?;
                    } else {
                        print!("{}", render_function_files(&files));
                    }
                }
            }
            Ok(())
        }

        Command::Run { name, args } => {
            let cfg = resolve(&overrides)?;
            match ExecutionBridge::new(catalog())
                .mirror(true)
                .invoke(&cfg.plugins_dir, &name, &args)
            {
                Ok(_) => Ok(()),
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(1);
                }
            }
        }

        Command::Tool { name, args } => {
            let outcome = run_by_name(&name, &args)?;
            if !outcome.output.is_empty() {
                println!("{}", outcome.output);
            }
            if outcome.code != 0 {
                std::process::exit(outcome.code);
            }
            Ok(())
        }

        Command::Config => {
            let cfg = resolve(&overrides)?;
            print_json(&cfg.redacted())
        }
    }
}

fn print_outcome(result: &SessionResult) {
    match &result.outcome {
        SessionOutcome::Answered(answer) => println!("{answer}"),
        SessionOutcome::LoopDetected { last_answer } => {
            eprintln!("stopped: the planner repeated an action");
            if let Some(answer) = last_answer {
                println!("{answer}");
            }
        }
        SessionOutcome::MaxSteps => {
            eprintln!("stopped after {} steps without an answer", result.history.len());
        }
        SessionOutcome::Canceled => eprintln!("canceled"),
        SessionOutcome::Failed(err) => {
            eprintln!("error: {err}");
            if let Some(output) = err.output().filter(|o| !o.trim().is_empty()) {
                eprintln!("{}", output.trim_end());
            }
        }
    }
}
