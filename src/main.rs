mod config;
mod db;
mod grading;
mod ipc;
mod policy;

use std::io::{self, BufRead, Write};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let config = config::Config::load().context("loading configuration")?;
    init_tracing(&config.log_filter);

    let conn = db::open_db(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    if db::ensure_admin(&conn, &config.admin).context("bootstrapping admin user")? {
        tracing::info!(user = %config.admin.id, "created bootstrap admin");
    }
    tracing::info!(database = %config.database_path.display(), "schoold ready");

    let mut state = ipc::AppState {
        db_path: config.database_path,
        db: conn,
        grading: config.grading,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::debug!(error = %e, "unparseable request line");
                let mut resp = ipc::err("", "bad_json", 400, e.to_string(), None);
                if let Some(obj) = resp.as_object_mut() {
                    obj.remove("id");
                }
                resp
            }
        };
        writeln!(stdout, "{resp}").context("writing response")?;
        stdout.flush().context("flushing response")?;
    }
    Ok(())
}
