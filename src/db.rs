use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

/// One connection per workspace, shared by the roster, the grade store
/// binding and live subscriptions.
pub type SharedConn = Arc<Mutex<Connection>>;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    // A second daemon on the same workspace holds the write lock briefly.
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    migrate(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<SharedConn> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            roll_number TEXT NOT NULL,
            class_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name, sort_order)",
        [],
    )?;

    // student_id is deliberately not a foreign key: grade records outlive
    // roster edits, as they did in the hosted store.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            exam_date TEXT NOT NULL,
            total_marks REAL NOT NULL,
            obtained_marks REAL NOT NULL,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_grades_filter
         ON student_grades(class_name, exam_type, academic_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_grades(
            grade_id TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            max_marks REAL NOT NULL,
            obtained_marks REAL NOT NULL,
            grade TEXT NOT NULL,
            remarks TEXT NOT NULL DEFAULT '',
            CHECK(obtained_marks >= 0 AND obtained_marks <= max_marks),
            PRIMARY KEY(grade_id, subject_name),
            FOREIGN KEY(grade_id) REFERENCES student_grades(id) ON DELETE CASCADE
        )",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings {key} is not valid json"))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let shared = open_in_memory().expect("db");
        let conn = shared.lock().expect("lock");
        assert_eq!(settings_get_json(&conn, "k").expect("get"), None);
        settings_set_json(&conn, "k", &json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "k", &json!({ "a": 2 })).expect("set");
        assert_eq!(settings_get_json(&conn, "k").expect("get"), Some(json!({ "a": 2 })));
    }

    #[test]
    fn open_db_is_reentrant() {
        let dir = std::env::temp_dir().join(format!("gradebookd-db-{}", uuid::Uuid::new_v4()));
        open_db(&dir).expect("first open");
        open_db(&dir).expect("second open");
        assert!(dir.join(DB_FILE_NAME).is_file());
    }
}
