mod calc;
mod config;
mod db;
mod error;
mod ipc;
mod model;
mod persist;
mod roster;
mod store;
mod validate;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env("GRADEBOOKD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

async fn write_line(stdout: &mut tokio::io::Stdout, resp: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(resp)?;
    stdout.write_all(&payload).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout carries responses only.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut state = ipc::AppState::default();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let req: ipc::Request = match serde_json::from_str(line) {
                    Ok(v) => v,
                    Err(e) => {
                        // Can't reply without id.
                        warn!("failed to parse request: {e}");
                        write_line(&mut stdout, &ipc::err("", "bad_json", e.to_string(), None)).await?;
                        continue;
                    }
                };
                debug!(id = %req.id, method = %req.method, "request");
                let resp = ipc::handle_request(&mut state, req).await;
                write_line(&mut stdout, &resp).await?;
            }
            Some(event) = state.next_sync_event() => {
                state.apply_sync_event(event);
            }
        }
    }

    Ok(())
}
