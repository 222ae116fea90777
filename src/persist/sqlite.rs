use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{Clock, GradePersistence, GradeSubscription, PersistError, PersistResult, SyncEvent};
use crate::db::SharedConn;
use crate::model::{stable_grade_id, GradeFilter, StudentGrade, SubjectGrade};
use crate::roster::normalize_class_name;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Grade records in the workspace database.
///
/// Commits made through this value wake every live subscription directly.
/// Commits made by another process on the same file are picked up by
/// polling `PRAGMA data_version`.
pub struct SqliteGradePersistence {
    conn: SharedConn,
    clock: Arc<dyn Clock>,
    changes: broadcast::Sender<()>,
    poll_interval: Duration,
}

impl SqliteGradePersistence {
    pub fn new(conn: SharedConn, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            conn,
            clock,
            changes,
            poll_interval,
        }
    }

    fn notify(&self) {
        // No receivers just means nobody is subscribed.
        let _ = self.changes.send(());
    }
}

fn lock(conn: &SharedConn) -> PersistResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| PersistError::backend("connection lock poisoned"))
}

fn query_grades(conn: &Connection, filter: &GradeFilter) -> PersistResult<Vec<StudentGrade>> {
    let key = (
        &filter.class_name,
        filter.exam_type.as_str(),
        &filter.academic_year,
    );

    let mut stmt = conn.prepare(
        "SELECT id, student_id, student_name, class_name, academic_year, exam_date,
                total_marks, obtained_marks, percentage, grade,
                created_by, created_at, updated_at
         FROM student_grades
         WHERE class_name = ? AND exam_type = ? AND academic_year = ?
         ORDER BY student_name, id",
    )?;
    let mut grades = stmt
        .query_map(key, |row| {
            Ok(StudentGrade {
                id: row.get(0)?,
                student_id: row.get(1)?,
                student_name: row.get(2)?,
                class_name: row.get(3)?,
                academic_year: row.get(4)?,
                exam_type: filter.exam_type,
                exam_date: row.get(5)?,
                subjects: Default::default(),
                total_marks: row.get(6)?,
                obtained_marks: row.get(7)?,
                percentage: row.get(8)?,
                grade: row.get(9)?,
                created_by: row.get(10)?,
                created_at: row.get(11)?,
                updated_at: row.get(12)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let index: HashMap<String, usize> = grades
        .iter()
        .enumerate()
        .map(|(i, g)| (g.id.clone(), i))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT sg.grade_id, sg.subject_name, sg.max_marks, sg.obtained_marks, sg.grade, sg.remarks
         FROM subject_grades sg
         JOIN student_grades g ON g.id = sg.grade_id
         WHERE g.class_name = ? AND g.exam_type = ? AND g.academic_year = ?",
    )?;
    let subjects = stmt
        .query_map(key, |row| {
            let grade_id: String = row.get(0)?;
            Ok((
                grade_id,
                SubjectGrade {
                    subject_name: row.get(1)?,
                    max_marks: row.get(2)?,
                    obtained_marks: row.get(3)?,
                    grade: row.get(4)?,
                    remarks: row.get(5)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (grade_id, s) in subjects {
        if let Some(&i) = index.get(&grade_id) {
            grades[i].subjects.insert(s.subject_name.clone(), s);
        }
    }

    Ok(grades)
}

fn write_batch(
    conn: &mut Connection,
    records: Vec<StudentGrade>,
    saved_by: &str,
    now: i64,
) -> PersistResult<Vec<String>> {
    if let Some(empty) = records.iter().find(|g| g.subjects.is_empty()) {
        return Err(PersistError::InvalidRecord(format!(
            "grade for student {} has no subjects",
            empty.student_id
        )));
    }

    let tx = conn.transaction()?;
    let mut ids = Vec::with_capacity(records.len());
    for g in records {
        let first_write = g.id.trim().is_empty();
        let class_name = normalize_class_name(&g.class_name);
        let academic_year = g.academic_year.trim().to_string();
        let id = if first_write {
            stable_grade_id(&g.student_id, &class_name, g.exam_type, &academic_year)
        } else {
            g.id.clone()
        };
        let created_at = if first_write { now } else { g.created_at };

        tx.execute(
            "INSERT INTO student_grades(
               id, student_id, student_name, class_name, academic_year, exam_type, exam_date,
               total_marks, obtained_marks, percentage, grade, created_by, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
               student_id = excluded.student_id,
               student_name = excluded.student_name,
               class_name = excluded.class_name,
               academic_year = excluded.academic_year,
               exam_type = excluded.exam_type,
               exam_date = excluded.exam_date,
               total_marks = excluded.total_marks,
               obtained_marks = excluded.obtained_marks,
               percentage = excluded.percentage,
               grade = excluded.grade,
               created_by = excluded.created_by,
               created_at = student_grades.created_at,
               updated_at = excluded.updated_at",
            params![
                id,
                g.student_id,
                g.student_name,
                class_name,
                academic_year,
                g.exam_type.as_str(),
                g.exam_date,
                g.total_marks,
                g.obtained_marks,
                g.percentage,
                g.grade,
                saved_by,
                created_at,
                now,
            ],
        )?;

        // The record replaces whatever subjects were stored before.
        tx.execute("DELETE FROM subject_grades WHERE grade_id = ?", [&id])?;
        for (name, s) in &g.subjects {
            tx.execute(
                "INSERT INTO subject_grades(grade_id, subject_name, max_marks, obtained_marks, grade, remarks)
                 VALUES(?, ?, ?, ?, ?, ?)",
                params![id, name, s.max_marks, s.obtained_marks, s.grade, s.remarks],
            )?;
        }
        ids.push(id);
    }
    tx.commit()?;
    Ok(ids)
}

fn data_version(conn: &SharedConn) -> Option<i64> {
    let guard = lock(conn).ok()?;
    guard
        .query_row("PRAGMA data_version", [], |r| r.get(0))
        .ok()
}

/// Queries and sends while holding the connection, so a snapshot taken
/// before a commit can never be delivered after that commit returns.
/// Returns false once the subscriber has gone away.
fn push_snapshot(
    conn: &SharedConn,
    filter: &GradeFilter,
    out: &mpsc::UnboundedSender<SyncEvent>,
    last: &mut Option<Vec<StudentGrade>>,
) -> bool {
    let guard = match lock(conn) {
        Ok(g) => g,
        Err(e) => return out.send(SyncEvent::Error(e.to_string())).is_ok(),
    };
    match query_grades(&guard, filter) {
        Ok(grades) => {
            if last.as_ref() == Some(&grades) {
                return !out.is_closed();
            }
            let sent = out.send(SyncEvent::Snapshot(grades.clone())).is_ok();
            *last = Some(grades);
            sent
        }
        Err(e) => out.send(SyncEvent::Error(e.to_string())).is_ok(),
    }
}

#[async_trait]
impl GradePersistence for SqliteGradePersistence {
    async fn list_grades(&self, filter: &GradeFilter) -> PersistResult<Vec<StudentGrade>> {
        let grades = {
            let conn = lock(&self.conn)?;
            query_grades(&conn, filter)?
        };
        debug!(
            class = %filter.class_name,
            exam = %filter.exam_type,
            year = %filter.academic_year,
            count = grades.len(),
            "grades listed"
        );
        Ok(grades)
    }

    async fn subscribe_grades(&self, filter: &GradeFilter) -> PersistResult<GradeSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut changes = self.changes.subscribe();
        let conn = self.conn.clone();
        let filter = filter.clone();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut last = None;
            let mut seen_version = data_version(&conn);
            if !push_snapshot(&conn, &filter, &tx, &mut last) {
                return;
            }

            let mut tick = tokio::time::interval(poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = changes.recv() => match changed {
                        Ok(()) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    _ = tick.tick() => {
                        let version = data_version(&conn);
                        if version == seen_version {
                            continue;
                        }
                        seen_version = version;
                    }
                }
                if !push_snapshot(&conn, &filter, &tx, &mut last) {
                    break;
                }
            }
            debug!(class = %filter.class_name, "grade subscription ended");
        });

        Ok(GradeSubscription::new(rx, Some(task)))
    }

    async fn save_batch(&self, records: Vec<StudentGrade>, saved_by: &str) -> PersistResult<()> {
        let now = self.clock.now_millis();
        let count = records.len();
        {
            let mut conn = lock(&self.conn)?;
            write_batch(&mut conn, records, saved_by, now)?;
        }
        info!(count, saved_by, "grade batch committed");
        self.notify();
        Ok(())
    }

    async fn delete_grade(&self, id: &str) -> PersistResult<()> {
        {
            let mut conn = lock(&self.conn)?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM subject_grades WHERE grade_id = ?", [id])?;
            tx.execute("DELETE FROM student_grades WHERE id = ?", [id])?;
            tx.commit()?;
        }
        info!(id, "grade deleted");
        self.notify();
        Ok(())
    }
}
