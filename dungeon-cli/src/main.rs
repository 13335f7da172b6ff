use std::process;

use dungeon::{
    ClassicDungeon, ExitCode, OrchestratorConfig, Role, WorkerEnv, init_tracing, run_session, run_worker,
};

const USAGE: &str = "\
Usage: dungeon [--json]
       dungeon worker <barbarian|wizard|rogue>

Options:
  --json    Print the session report as JSON [default: text summary]

Environment:
  DUNGEON_LOG                 Log level for the dungeon crates [default: info]
  DUNGEON_ISOLATE             Use names private to this session
  DUNGEON_LOOT_INTERVAL_MS    Delay between treasure items
  DUNGEON_SUSPEND_PEER        Let the rogue stop the orchestrator between rounds";

enum Mode {
    Session { json: bool },
    Worker(Role),
}

fn main() -> process::ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let mode = match parse_args(&args) {
        Ok(mode) => mode,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            return ExitCode::Usage.into();
        }
    };

    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::Runtime.into();
        }
    };

    let code = match mode {
        Mode::Session { json } => runtime.block_on(session(json)),
        Mode::Worker(role) => runtime.block_on(worker(role)),
    };
    code.into()
}

fn parse_args(args: &[String]) -> Result<Mode, String> {
    let mut json = false;
    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--json" => json = true,
            "--help" | "-h" => return Err(String::new()),
            "worker" => {
                let role = args.get(i + 1).ok_or("worker requires a role")?;
                if let Some(extra) = args.get(i + 2) {
                    return Err(format!("unexpected argument: {extra}"));
                }
                return role.parse().map(Mode::Worker);
            }
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }
    Ok(Mode::Session { json })
}

async fn session(json: bool) -> ExitCode {
    let config = OrchestratorConfig::from_env();
    let outcome = run_session(&config, &ClassicDungeon::default()).await;

    if json {
        match serde_json::to_string_pretty(&outcome.report) {
            Ok(body) => println!("{body}"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize session report"),
        }
    } else {
        print!("{}", outcome.report.summary());
    }
    outcome.exit_code()
}

async fn worker(role: Role) -> ExitCode {
    let env = match WorkerEnv::from_env() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::Usage;
        }
    };
    if env.role != role {
        eprintln!("error: started as {role} but the environment describes {}", env.role);
        return ExitCode::Usage;
    }

    match run_worker(env).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(%role, error = %e, "Worker failed");
            e.exit_code()
        }
    }
}
