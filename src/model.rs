use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::roster::normalize_class_name;

/// Every subject is marked out of 100 in this gradebook.
pub const SUBJECT_MAX_MARKS: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub roll_number: String,
    pub class_name: String,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGrade {
    pub subject_name: String,
    pub max_marks: f64,
    pub obtained_marks: f64,
    pub grade: String,
    #[serde(default)]
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    /// Blank until first persisted; see [`stable_grade_id`].
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub academic_year: String,
    pub exam_type: ExamType,
    pub exam_date: String,
    pub subjects: BTreeMap<String, SubjectGrade>,
    pub total_marks: f64,
    pub obtained_marks: f64,
    pub percentage: f64,
    pub grade: String,
    pub created_by: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExamType {
    FA1,
    FA2,
    FA3,
    FA4,
    SA1,
    SA2,
}

impl ExamType {
    pub const ALL: [ExamType; 6] = [
        ExamType::FA1,
        ExamType::FA2,
        ExamType::FA3,
        ExamType::FA4,
        ExamType::SA1,
        ExamType::SA2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExamType::FA1 => "FA1",
            ExamType::FA2 => "FA2",
            ExamType::FA3 => "FA3",
            ExamType::FA4 => "FA4",
            ExamType::SA1 => "SA1",
            ExamType::SA2 => "SA2",
        }
    }
}

impl fmt::Display for ExamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        ExamType::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(t))
            .ok_or_else(|| format!("examType must be one of FA1..FA4, SA1, SA2 (got {t:?})"))
    }
}

/// Query key for one class/exam/year. Construction normalizes the class
/// name and trims the year so every read and write agrees on the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeFilter {
    pub class_name: String,
    pub exam_type: ExamType,
    pub academic_year: String,
}

impl GradeFilter {
    pub fn new(class_name: &str, exam_type: ExamType, academic_year: &str) -> Self {
        Self {
            class_name: normalize_class_name(class_name),
            exam_type,
            academic_year: academic_year.trim().to_string(),
        }
    }

    pub fn matches(&self, g: &StudentGrade) -> bool {
        g.class_name == self.class_name
            && g.exam_type == self.exam_type
            && g.academic_year == self.academic_year
    }
}

/// `{studentId}_{Class N}_{exam}_{year}`; upserts for the same key land on
/// the same record.
pub fn stable_grade_id(
    student_id: &str,
    class_name: &str,
    exam_type: ExamType,
    academic_year: &str,
) -> String {
    format!(
        "{}_{}_{}_{}",
        student_id,
        normalize_class_name(class_name),
        exam_type.as_str(),
        academic_year.trim()
    )
}

/// Default subject band, chosen from the digits in the class label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassBand {
    Primary,
    Secondary,
    HigherSecondary,
}

impl ClassBand {
    pub fn for_class(class_name: &str) -> Self {
        if class_name.chars().any(|c| ('1'..='5').contains(&c)) {
            ClassBand::Primary
        } else if class_name.chars().any(|c| ('6'..='9').contains(&c)) {
            ClassBand::Secondary
        } else {
            ClassBand::HigherSecondary
        }
    }
}
