use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::calc::{parse_mark, MarkEntry};
use crate::model::Student;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    AcademicYear,
    ExamDate,
    MarkOutOfRange,
    NoMarksEntered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub kind: ViolationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
}

impl Violation {
    fn field(kind: ViolationKind, message: &str) -> Self {
        Self {
            kind,
            student_id: None,
            subject: None,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// True when the only complaint is that nothing was entered.
    pub fn only_missing_marks(&self) -> bool {
        !self.violations.is_empty()
            && self
                .violations
                .iter()
                .all(|v| v.kind == ViolationKind::NoMarksEntered)
    }
}

fn academic_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // ASCII classes on purpose: `\d` would accept any Unicode digit.
    RE.get_or_init(|| Regex::new(r"^[0-9]{4}-[0-9]{2}$").expect("static pattern"))
}

fn exam_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("static pattern"))
}

pub fn is_academic_year(s: &str) -> bool {
    academic_year_re().is_match(s)
}

pub fn is_exam_date(s: &str) -> bool {
    exam_date_re().is_match(s)
}

/// Checks everything a save would write and collects every problem rather
/// than stopping at the first. `effective` yields the mark shown for a
/// student/subject pair.
pub fn validate_marks<F>(
    academic_year: &str,
    exam_date: &str,
    students: &[Student],
    subjects: &[String],
    effective: F,
) -> ValidationReport
where
    F: Fn(&str, &str) -> String,
{
    let mut violations = Vec::new();

    if !is_academic_year(academic_year) {
        violations.push(Violation::field(
            ViolationKind::AcademicYear,
            "Academic year must be like 2025-26",
        ));
    }
    if !is_exam_date(exam_date) {
        violations.push(Violation::field(
            ViolationKind::ExamDate,
            "Exam date must be YYYY-MM-DD",
        ));
    }

    let mut any_mark = false;
    for st in students {
        for subject in subjects {
            match parse_mark(&effective(&st.id, subject)) {
                MarkEntry::Blank => {}
                MarkEntry::Scored(_) => any_mark = true,
                MarkEntry::Invalid => {
                    any_mark = true;
                    violations.push(Violation {
                        kind: ViolationKind::MarkOutOfRange,
                        student_id: Some(st.id.clone()),
                        subject: Some(subject.clone()),
                        message: format!("{} - {} invalid (0-100)", st.display_name(), subject),
                    });
                }
            }
        }
    }

    if !any_mark {
        violations.push(Violation::field(
            ViolationKind::NoMarksEntered,
            "No marks entered",
        ));
    }

    ValidationReport { violations }
}
