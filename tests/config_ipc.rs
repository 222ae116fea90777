use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

#[test]
fn config_update_persists_and_drives_defaults() {
    let workspace = temp_dir("gradebook-config");

    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        request(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );

        let got = request(&mut stdin, &mut reader, "2", "config.get", json!({}));
        let cfg = &got["result"]["config"];
        assert_eq!(cfg["defaultAcademicYear"].as_str(), Some("2025-26"));
        assert_eq!(cfg["defaultExamType"].as_str(), Some("FA1"));
        assert_eq!(cfg["subjects"]["primary"][0].as_str(), Some("English"));

        let updated = request(
            &mut stdin,
            &mut reader,
            "3",
            "config.update",
            json!({ "patch": {
                "defaultAcademicYear": "2026-27",
                "defaultExamType": "SA2",
                "subjects": { "primary": ["English", "Art"] }
            } }),
        );
        assert_eq!(updated["ok"].as_bool(), Some(true), "{updated}");
        let cfg = &updated["result"]["config"];
        assert_eq!(cfg["subjects"]["primary"], json!(["English", "Art"]));
        assert_eq!(cfg["subjects"]["secondary"][3].as_str(), Some("Science"));

        let rejected = request(
            &mut stdin,
            &mut reader,
            "4",
            "config.update",
            json!({ "patch": { "syncPollMs": 0 } }),
        );
        assert_eq!(rejected["error"]["code"].as_str(), Some("bad_params"));
        let unknown = request(
            &mut stdin,
            &mut reader,
            "5",
            "config.update",
            json!({ "patch": { "colour": "blue" } }),
        );
        assert_eq!(unknown["error"]["code"].as_str(), Some("bad_params"));

        drop(stdin);
        let _ = child.wait();
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let selected = request(
        &mut stdin,
        &mut reader,
        "2",
        "grades.select",
        json!({ "className": "3" }),
    );
    assert_eq!(selected["ok"].as_bool(), Some(true), "{selected}");
    let view = &selected["result"]["view"];
    assert_eq!(view["filter"]["academicYear"].as_str(), Some("2026-27"));
    assert_eq!(view["filter"]["examType"].as_str(), Some("SA2"));
    assert_eq!(view["filter"]["className"].as_str(), Some("Class 3"));
    assert_eq!(view["subjects"], json!(["English", "Art"]));

    drop(stdin);
    let _ = child.wait();
}
