use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::calc::{build_grade_record, format_mark, parse_mark, sanitize_mark_input, MarkEntry, RecordContext};
use crate::config::GradebookConfig;
use crate::error::{GradeError, GradeResult};
use crate::model::{ExamType, GradeFilter, Student, StudentGrade};
use crate::persist::{GradePersistence, GradeSubscription, SyncEvent};
use crate::roster::ClassRosterProvider;
use crate::validate::{validate_marks, ValidationReport};

/// student id -> subject -> mark text.
type MarkGrid = HashMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overwrite {
    pub student_id: String,
    pub student_name: String,
    pub subject: String,
    pub previous: String,
    pub entered: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellView {
    pub value: String,
    pub dirty: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub student_id: String,
    pub student_name: String,
    pub roll_number: String,
    pub has_saved_grade: bool,
    pub marks: BTreeMap<String, CellView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub state: SessionState,
    pub filter: Option<GradeFilter>,
    pub exam_date: String,
    pub subjects: Vec<String>,
    pub rows: Vec<RowView>,
    pub has_unsaved_changes: bool,
    pub last_sync_error: Option<String>,
}

/// Owns one class/exam/year editing session at a time: the roster, the
/// persisted records, the baseline grid derived from them and the unsaved
/// edits layered on top.
///
/// All mutation goes through `&mut self`, so user actions and live updates
/// are applied one after the other by whoever owns the store. Local edits
/// win over pushed values until they are saved or discarded.
pub struct GradeStore {
    roster: Arc<dyn ClassRosterProvider>,
    persistence: Arc<dyn GradePersistence>,
    config: GradebookConfig,
    state: SessionState,
    filter: Option<GradeFilter>,
    exam_date: String,
    students: Vec<Student>,
    /// Persisted records keyed by student id.
    existing: HashMap<String, StudentGrade>,
    /// Subject universe, in display order.
    subjects: Vec<String>,
    baseline: MarkGrid,
    dirty: MarkGrid,
    subscription: Option<GradeSubscription>,
    last_sync_error: Option<String>,
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

impl GradeStore {
    pub fn new(
        roster: Arc<dyn ClassRosterProvider>,
        persistence: Arc<dyn GradePersistence>,
        config: GradebookConfig,
    ) -> Self {
        Self {
            roster,
            persistence,
            config,
            state: SessionState::Idle,
            filter: None,
            exam_date: today(),
            students: Vec::new(),
            existing: HashMap::new(),
            subjects: Vec::new(),
            baseline: HashMap::new(),
            dirty: HashMap::new(),
            subscription: None,
            last_sync_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &GradebookConfig {
        &self.config
    }

    /// Takes effect at the next `select_filters`.
    pub fn set_config(&mut self, config: GradebookConfig) {
        self.config = config;
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn exam_date(&self) -> &str {
        &self.exam_date
    }

    fn require_ready(&self) -> GradeResult<&GradeFilter> {
        match (&self.state, &self.filter) {
            (SessionState::Ready, Some(f)) => Ok(f),
            _ => Err(GradeError::NoSession),
        }
    }

    /// Starts a new session for the given key. Everything from the previous
    /// session, its live subscription included, is dropped first.
    pub async fn select_filters(
        &mut self,
        class_name: &str,
        exam_type: ExamType,
        academic_year: &str,
        exam_date: Option<&str>,
    ) -> GradeResult<()> {
        self.reset_session();
        self.state = SessionState::Loading;
        if let Some(d) = exam_date {
            self.exam_date = d.trim().to_string();
        }

        let filter = GradeFilter::new(class_name, exam_type, academic_year);
        match self.load(&filter).await {
            Ok(subscription) => {
                info!(
                    class = %filter.class_name,
                    exam = %exam_type,
                    year = %filter.academic_year,
                    students = self.students.len(),
                    records = self.existing.len(),
                    subjects = self.subjects.len(),
                    "grade session ready"
                );
                self.subscription = Some(subscription);
                self.filter = Some(filter);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(class = %filter.class_name, error = %e, "grade session failed to load");
                self.reset_session();
                Err(e)
            }
        }
    }

    async fn load(&mut self, filter: &GradeFilter) -> GradeResult<GradeSubscription> {
        let students = self.roster.list_students(&filter.class_name).await?;
        let grades = self.persistence.list_grades(filter).await?;

        self.students = students;
        self.subjects = self
            .config
            .default_subjects(&filter.class_name)
            .to_vec();
        self.set_existing(grades);
        self.rebuild_baseline();

        let subscription = self.persistence.subscribe_grades(filter).await?;
        Ok(subscription)
    }

    fn reset_session(&mut self) {
        self.subscription = None;
        self.state = SessionState::Idle;
        self.filter = None;
        self.students.clear();
        self.existing.clear();
        self.subjects.clear();
        self.baseline.clear();
        self.dirty.clear();
        self.last_sync_error = None;
    }

    /// Tears the session down and cancels its live subscription.
    pub fn close(&mut self) {
        if self.filter.is_some() {
            debug!("grade session closed");
        }
        self.reset_session();
    }

    /// Replaces the persisted-record map and grows the subject universe
    /// with any subject seen in the records.
    fn set_existing(&mut self, grades: Vec<StudentGrade>) {
        let cloud: BTreeSet<String> = grades
            .iter()
            .flat_map(|g| g.subjects.keys().cloned())
            .collect();
        for subject in cloud {
            if !self.subjects.contains(&subject) {
                self.subjects.push(subject);
            }
        }
        self.existing = grades
            .into_iter()
            .map(|g| (g.student_id.clone(), g))
            .collect();
    }

    fn persisted_mark(&self, student_id: &str, subject: &str) -> String {
        self.existing
            .get(student_id)
            .and_then(|g| g.subjects.get(subject))
            .map(|s| format_mark(s.obtained_marks))
            .unwrap_or_default()
    }

    fn rebuild_baseline(&mut self) {
        let mut base = HashMap::with_capacity(self.students.len());
        for st in &self.students {
            let row: BTreeMap<String, String> = self
                .subjects
                .iter()
                .map(|subj| (subj.clone(), self.persisted_mark(&st.id, subj)))
                .collect();
            base.insert(st.id.clone(), row);
        }
        self.baseline = base;
    }

    fn is_dirty(&self, student_id: &str, subject: &str) -> bool {
        self.dirty
            .get(student_id)
            .map(|row| row.contains_key(subject))
            .unwrap_or(false)
    }

    /// Applies a pushed update. Pairs with a pending local edit keep their
    /// baseline untouched; everything else follows the store.
    pub fn apply_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Snapshot(grades) => self.apply_snapshot(grades),
            SyncEvent::Error(message) => {
                warn!(error = %message, "live grade update failed");
                self.last_sync_error = Some(message);
            }
        }
    }

    fn apply_snapshot(&mut self, grades: Vec<StudentGrade>) {
        if self.state != SessionState::Ready {
            return;
        }
        let Some(filter) = self.filter.as_ref() else {
            return;
        };
        let grades: Vec<StudentGrade> = grades.into_iter().filter(|g| filter.matches(g)).collect();
        self.set_existing(grades);

        let mut updates = Vec::new();
        for st in &self.students {
            for subj in &self.subjects {
                if self.is_dirty(&st.id, subj) {
                    continue;
                }
                updates.push((st.id.clone(), subj.clone(), self.persisted_mark(&st.id, subj)));
            }
        }
        for (sid, subj, value) in updates {
            self.baseline.entry(sid).or_default().insert(subj, value);
        }
        self.last_sync_error = None;
        debug!(records = self.existing.len(), "baseline refreshed from store");
    }

    /// Applies everything the subscription has queued so far.
    pub fn pump_sync_events(&mut self) -> usize {
        let mut applied = 0;
        while let Some(ev) = self.subscription.as_mut().and_then(|s| s.try_recv()) {
            self.apply_sync_event(ev);
            applied += 1;
        }
        applied
    }

    /// Waits for the next live update. Pends forever while there is no
    /// subscription, so it can sit in a `select!` next to other input.
    pub async fn next_sync_event(&mut self) -> Option<SyncEvent> {
        let Some(sub) = self.subscription.as_mut() else {
            return std::future::pending().await;
        };
        match sub.recv().await {
            Some(ev) => Some(ev),
            None => {
                warn!("grade subscription closed by the store");
                self.subscription = None;
                None
            }
        }
    }

    fn discard_queued_events(&mut self) {
        if let Some(sub) = self.subscription.as_mut() {
            while sub.try_recv().is_some() {}
        }
    }

    /// Re-reads the persisted records for the current key.
    pub async fn refresh(&mut self) -> GradeResult<()> {
        let filter = self.require_ready()?.clone();
        self.discard_queued_events();
        let grades = self.persistence.list_grades(&filter).await?;
        self.apply_snapshot(grades);
        Ok(())
    }

    /// Records a local edit and returns the text actually stored.
    pub fn edit_mark(&mut self, student_id: &str, subject: &str, raw: &str) -> GradeResult<String> {
        self.require_ready()?;
        let cleaned = sanitize_mark_input(raw);
        self.dirty
            .entry(student_id.to_string())
            .or_default()
            .insert(subject.to_string(), cleaned.clone());
        debug!(student_id, subject, value = %cleaned, "mark edited");
        Ok(cleaned)
    }

    /// Adds a subject column; returns false for blank or duplicate names.
    pub fn add_subject(&mut self, name: &str) -> GradeResult<bool> {
        self.require_ready()?;
        let cleaned = name.trim();
        if cleaned.is_empty() || self.subjects.iter().any(|s| s == cleaned) {
            return Ok(false);
        }
        self.subjects.push(cleaned.to_string());
        for st in &self.students {
            self.baseline
                .entry(st.id.clone())
                .or_default()
                .entry(cleaned.to_string())
                .or_default();
        }
        Ok(true)
    }

    pub fn set_exam_date(&mut self, exam_date: &str) {
        self.exam_date = exam_date.trim().to_string();
    }

    /// The one read path for a cell: local edit, else baseline, else blank.
    pub fn effective_mark(&self, student_id: &str, subject: &str) -> String {
        if let Some(v) = self.dirty.get(student_id).and_then(|row| row.get(subject)) {
            return v.clone();
        }
        self.baseline
            .get(student_id)
            .and_then(|row| row.get(subject))
            .cloned()
            .unwrap_or_default()
    }

    /// Drops every unsaved edit and falls back to the persisted values.
    pub fn discard(&mut self) {
        self.dirty.clear();
        self.rebuild_baseline();
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty.iter().any(|(sid, row)| {
            row.iter()
                .any(|(subj, v)| v.trim() != self.persisted_mark(sid, subj))
        })
    }

    /// Non-blank entries that would replace a different saved mark.
    pub fn pending_overwrites(&self) -> Vec<Overwrite> {
        let mut out = Vec::new();
        for st in &self.students {
            let Some(saved) = self.existing.get(&st.id) else {
                continue;
            };
            for subj in &self.subjects {
                let Some(prev) = saved.subjects.get(subj) else {
                    continue;
                };
                let entered = self.effective_mark(&st.id, subj);
                let entered = entered.trim();
                if entered.is_empty() || parse_mark(entered) == MarkEntry::Scored(prev.obtained_marks) {
                    continue;
                }
                out.push(Overwrite {
                    student_id: st.id.clone(),
                    student_name: st.display_name(),
                    subject: subj.clone(),
                    previous: format_mark(prev.obtained_marks),
                    entered: entered.to_string(),
                });
            }
        }
        out
    }

    pub fn validate(&self) -> GradeResult<ValidationReport> {
        let filter = self.require_ready()?;
        Ok(validate_marks(
            &filter.academic_year,
            &self.exam_date,
            &self.students,
            &self.subjects,
            |sid, subj| self.effective_mark(sid, subj),
        ))
    }

    fn build_records(&self, filter: &GradeFilter) -> Vec<StudentGrade> {
        self.students
            .iter()
            .filter_map(|st| {
                let ctx = RecordContext {
                    filter,
                    exam_date: &self.exam_date,
                    existing: self.existing.get(&st.id),
                };
                let marks = self
                    .subjects
                    .iter()
                    .map(|subj| (subj.as_str(), self.effective_mark(&st.id, subj)));
                build_grade_record(st, marks, &ctx)
            })
            .collect()
    }

    /// Validates, builds and commits one record per student with at least
    /// one mark. On failure nothing is written and the edits stay in place.
    /// Returns the number of records written.
    pub async fn save(&mut self, saved_by: &str) -> GradeResult<usize> {
        let filter = self.require_ready()?.clone();

        let report = self.validate()?;
        if !report.is_valid() && !report.only_missing_marks() {
            return Err(GradeError::Validation(report.violations));
        }
        let records = self.build_records(&filter);
        if records.is_empty() {
            return Err(GradeError::NoValidGrades);
        }

        let count = records.len();
        self.persistence.save_batch(records, saved_by).await?;
        info!(class = %filter.class_name, exam = %filter.exam_type, count, "grades saved");

        self.dirty.clear();
        if let Err(e) = self.refresh().await {
            // The write went through; the next live update will catch up.
            warn!(error = %e, "reload after save failed");
            self.rebuild_baseline();
        }
        Ok(count)
    }

    /// Deletes the saved record of one student and blanks their row.
    pub async fn delete_grade(&mut self, student_id: &str) -> GradeResult<()> {
        self.require_ready()?;
        let Some(saved) = self.existing.get(student_id) else {
            return Err(GradeError::NotFound(student_id.to_string()));
        };
        let id = saved.id.clone();
        self.persistence.delete_grade(&id).await?;
        info!(student_id, id = %id, "saved grade deleted");

        self.existing.remove(student_id);
        let empty: BTreeMap<String, String> = self
            .subjects
            .iter()
            .map(|s| (s.clone(), String::new()))
            .collect();
        self.baseline.insert(student_id.to_string(), empty);
        self.dirty.remove(student_id);

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "reload after delete failed");
        }
        Ok(())
    }

    pub fn view(&self) -> SessionView {
        let rows = self
            .students
            .iter()
            .map(|st| RowView {
                student_id: st.id.clone(),
                student_name: st.display_name(),
                roll_number: st.roll_number.clone(),
                has_saved_grade: self.existing.contains_key(&st.id),
                marks: self
                    .subjects
                    .iter()
                    .map(|subj| {
                        (
                            subj.clone(),
                            CellView {
                                value: self.effective_mark(&st.id, subj),
                                dirty: self.is_dirty(&st.id, subj),
                            },
                        )
                    })
                    .collect(),
            })
            .collect();

        SessionView {
            state: self.state,
            filter: self.filter.clone(),
            exam_date: self.exam_date.clone(),
            subjects: self.subjects.clone(),
            rows,
            has_unsaved_changes: self.has_unsaved_changes(),
            last_sync_error: self.last_sync_error.clone(),
        }
    }
}
