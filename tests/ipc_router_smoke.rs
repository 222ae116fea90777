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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"].as_bool(), Some(true));
    assert!(health["result"]["workspacePath"].is_null());

    let early = request(&mut stdin, &mut reader, "2", "grades.view", json!({}));
    assert_eq!(early["error"]["code"].as_str(), Some("no_workspace"));

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(&mut stdin, &mut reader, "4", "config.get", json!({}));
    let created = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "firstName": "Asha", "lastName": "Rao", "rollNumber": "1", "className": "5" }),
    );
    let student_id = created["result"]["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string();
    let _ = request(&mut stdin, &mut reader, "6", "students.list", json!({ "className": "5" }));

    let calls: Vec<(&str, serde_json::Value)> = vec![
        ("grades.select", json!({ "className": "5", "examType": "FA1", "academicYear": "2025-26", "examDate": "2025-07-01" })),
        ("grades.view", json!({})),
        ("grades.editMark", json!({ "studentId": student_id, "subject": "English", "value": "85" })),
        ("grades.addSubject", json!({ "name": "Art" })),
        ("grades.effectiveMark", json!({ "studentId": student_id, "subject": "English" })),
        ("grades.setExamDate", json!({ "examDate": "2025-07-02" })),
        ("grades.validate", json!({})),
        ("grades.pendingOverwrites", json!({})),
        ("grades.save", json!({ "savedBy": "smoke" })),
        ("grades.list", json!({ "className": "5", "examType": "FA1", "academicYear": "2025-26" })),
        ("reports.classSummary", json!({ "className": "5", "examType": "FA1", "academicYear": "2025-26" })),
        ("grades.refresh", json!({})),
        ("grades.discard", json!({})),
        ("grades.delete", json!({ "studentId": student_id })),
        ("grades.close", json!({})),
        ("config.update", json!({ "patch": { "syncPollMs": 100 } })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("c{i}");
        let resp = request(&mut stdin, &mut reader, &id, method, params);
        assert_eq!(resp["ok"].as_bool(), Some(true), "{method} failed: {resp}");
    }

    let unknown = request_raw(&mut stdin, &mut reader, "99", "grades.nope");
    assert_eq!(unknown["error"]["code"].as_str(), Some("not_implemented"));

    drop(stdin);
    let _ = child.wait();
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", json!({ "id": id, "method": method, "params": {} })).expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    serde_json::from_str(line.trim()).expect("json")
}

#[test]
fn malformed_line_gets_bad_json_and_loop_continues() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(v["ok"].as_bool(), Some(false));
    assert_eq!(v["error"]["code"].as_str(), Some("bad_json"));

    let health = request(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health["ok"].as_bool(), Some(true));

    drop(stdin);
    let _ = child.wait();
}
