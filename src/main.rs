mod attendance;
mod db;
mod grades;
mod ipc;
mod resolve;

use std::io::{self, BufRead, Write};

use serde_json::json;

fn main() -> anyhow::Result<()> {
    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // The id is unreadable, so the reply carries a null one.
            Err(e) => json!({
                "id": null,
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() },
            }),
        };

        writeln!(stdout, "{}", resp)?;
        stdout.flush()?;
    }
    Ok(())
}
