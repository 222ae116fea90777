use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::MutexGuard;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::db::SharedConn;
use crate::model::Student;

/// Sort key for roll numbers that are not integers; they go after the rest.
const UNPARSED_ROLL_NUMBER: i64 = 999;

pub type RosterResult<T> = Result<T, RosterError>;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("roster backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for RosterError {
    fn from(e: rusqlite::Error) -> Self {
        RosterError::Backend(e.to_string())
    }
}

/// `"5"`, `"5th"` and `"Class 5"` all become `"Class 5"`; labels with no
/// digits keep their text (`"LKG"` -> `"Class LKG"`). Blank stays blank so
/// that normalizing twice never changes the result.
pub fn normalize_class_name(raw: &str) -> String {
    let t = raw.trim();
    if t.is_empty() {
        return String::new();
    }
    if t.starts_with("Class ") {
        return t.to_string();
    }
    let digits: String = t.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        format!("Class {t}")
    } else {
        format!("Class {digits}")
    }
}

fn roll_key(s: &Student) -> i64 {
    s.roll_number.trim().parse::<i64>().unwrap_or(UNPARSED_ROLL_NUMBER)
}

/// Stable sort by integer roll number; fetch order breaks ties.
pub fn sort_roster(mut students: Vec<Student>) -> Vec<Student> {
    students.sort_by_key(roll_key);
    students
}

#[async_trait]
pub trait ClassRosterProvider: Send + Sync {
    /// Students of an already-normalized class, in roll-number order.
    async fn list_students(&self, class_name: &str) -> RosterResult<Vec<Student>>;
}

pub struct SqliteRoster {
    conn: SharedConn,
}

impl SqliteRoster {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    fn lock(&self) -> RosterResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RosterError::Backend("connection lock poisoned".into()))
    }

    pub fn create_student(
        &self,
        first_name: &str,
        last_name: &str,
        roll_number: &str,
        class_name: &str,
    ) -> RosterResult<Student> {
        let conn = self.lock()?;
        let student = Student {
            id: Uuid::new_v4().to_string(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            roll_number: roll_number.trim().to_string(),
            class_name: normalize_class_name(class_name),
        };
        let sort_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
            [],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT INTO students(id, first_name, last_name, roll_number, class_name, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &student.id,
                &student.first_name,
                &student.last_name,
                &student.roll_number,
                &student.class_name,
                sort_order,
            ),
        )?;
        debug!(student_id = %student.id, class = %student.class_name, "student created");
        Ok(student)
    }

    /// Every student in the workspace, in insertion order.
    pub fn list_all(&self) -> RosterResult<Vec<Student>> {
        let conn = self.lock()?;
        query_students(&conn, None)
    }
}

fn query_students(conn: &Connection, class_name: Option<&str>) -> RosterResult<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT id, first_name, last_name, roll_number, class_name
         FROM students
         WHERE ?1 IS NULL OR class_name = ?1
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([class_name], |row| {
            Ok(Student {
                id: row.get(0)?,
                first_name: row.get(1)?,
                last_name: row.get(2)?,
                roll_number: row.get(3)?,
                class_name: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[async_trait]
impl ClassRosterProvider for SqliteRoster {
    async fn list_students(&self, class_name: &str) -> RosterResult<Vec<Student>> {
        let students = {
            let conn = self.lock()?;
            query_students(&conn, Some(class_name))?
        };
        debug!(class = class_name, count = students.len(), "roster fetched");
        Ok(sort_roster(students))
    }
}
