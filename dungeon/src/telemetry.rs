//! Tracing setup shared by the orchestrator and the worker entry points.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber.
///
/// `RUST_LOG` wins if set; otherwise `DUNGEON_LOG` picks the level for the
/// dungeon crates. `LOG_FORMAT=json` switches to JSON lines. Output always
/// goes to stderr: stdout carries the session report.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = level_from(std::env::var("DUNGEON_LOG").ok().as_deref());
        EnvFilter::new(format!("dungeon={level},dungeon_cli={level}"))
    };

    let json = is_json(std::env::var("LOG_FORMAT").ok().as_deref());

    // Exactly one of the two layers is present.
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .try_init();
    if let Err(e) = installed {
        eprintln!("tracing already initialized: {e}");
    }
}

fn is_json(raw: Option<&str>) -> bool {
    raw.is_some_and(|format| format.eq_ignore_ascii_case("json"))
}

fn level_from(raw: Option<&str>) -> &'static str {
    match raw {
        Some("debug") => "debug",
        Some("trace") => "trace",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}
