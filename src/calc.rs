use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::model::{GradeFilter, Student, StudentGrade, SubjectGrade, SUBJECT_MAX_MARKS};

/// Lower bound (inclusive) of each letter band, highest first. Anything
/// below the last band is an F.
pub const GRADE_BANDS: [(f64, &str); 7] = [
    (90.0, "A+"),
    (80.0, "A"),
    (70.0, "B+"),
    (60.0, "B"),
    (50.0, "C+"),
    (40.0, "C"),
    (35.0, "D"),
];
pub const FAILING_GRADE: &str = "F";

/// A raw mark string as typed into the grid.
///
/// Blank means "not graded" and is excluded from totals; `"0"` is a graded
/// zero and counts against the student.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarkEntry {
    Blank,
    Scored(f64),
    Invalid,
}

pub fn parse_mark(raw: &str) -> MarkEntry {
    let t = raw.trim();
    if t.is_empty() {
        return MarkEntry::Blank;
    }
    match t.parse::<f64>() {
        Ok(v) if (0.0..=SUBJECT_MAX_MARKS).contains(&v) => MarkEntry::Scored(v),
        _ => MarkEntry::Invalid,
    }
}

pub fn calculate_grade(percentage: f64) -> &'static str {
    GRADE_BANDS
        .iter()
        .find(|(floor, _)| percentage >= *floor)
        .map(|(_, letter)| *letter)
        .unwrap_or(FAILING_GRADE)
}

/// Baseline text for a persisted mark: `85` rather than `85.0`, `72.5` as is.
pub fn format_mark(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

/// Keeps ASCII digits and the first `.`, with at most two digits after it.
pub fn sanitize_mark_input(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let Some(dot) = cleaned.find('.') else {
        return cleaned;
    };
    let (before, rest) = cleaned.split_at(dot + 1);
    let after: String = rest.chars().filter(|c| *c != '.').take(2).collect();
    format!("{before}{after}")
}

#[derive(Debug, Clone)]
pub struct RecordContext<'a> {
    pub filter: &'a GradeFilter,
    pub exam_date: &'a str,
    /// Persisted record for this student and filter, if any. Its id,
    /// creation time and per-subject remarks carry over.
    pub existing: Option<&'a StudentGrade>,
}

/// Builds the record to persist for one student, or `None` when no subject
/// has a usable mark. Blank and unusable entries are skipped; callers reject
/// unusable entries through validation before getting here.
pub fn build_grade_record<I, S, R>(
    student: &Student,
    marks: I,
    ctx: &RecordContext<'_>,
) -> Option<StudentGrade>
where
    I: IntoIterator<Item = (S, R)>,
    S: AsRef<str>,
    R: AsRef<str>,
{
    let mut subjects: BTreeMap<String, SubjectGrade> = BTreeMap::new();
    let mut total = 0.0;
    let mut obtained = 0.0;

    for (subject, raw) in marks {
        let subject = subject.as_ref();
        let MarkEntry::Scored(v) = parse_mark(raw.as_ref()) else {
            continue;
        };
        total += SUBJECT_MAX_MARKS;
        obtained += v;
        let remarks = ctx
            .existing
            .and_then(|g| g.subjects.get(subject))
            .map(|s| s.remarks.clone())
            .unwrap_or_default();
        subjects.insert(
            subject.to_string(),
            SubjectGrade {
                subject_name: subject.to_string(),
                max_marks: SUBJECT_MAX_MARKS,
                obtained_marks: v,
                grade: calculate_grade(v).to_string(),
                remarks,
            },
        );
    }

    if subjects.is_empty() {
        return None;
    }

    let percentage = if total > 0.0 {
        obtained / total * 100.0
    } else {
        0.0
    };

    Some(StudentGrade {
        id: ctx.existing.map(|g| g.id.clone()).unwrap_or_default(),
        student_id: student.id.clone(),
        student_name: student.display_name(),
        class_name: ctx.filter.class_name.clone(),
        academic_year: ctx.filter.academic_year.clone(),
        exam_type: ctx.filter.exam_type,
        exam_date: ctx.exam_date.to_string(),
        subjects,
        total_marks: total,
        obtained_marks: obtained,
        percentage,
        grade: calculate_grade(percentage).to_string(),
        created_by: String::new(),
        created_at: ctx.existing.map(|g| g.created_at).unwrap_or(0),
        updated_at: 0,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub subject: String,
    pub graded_count: usize,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCount {
    pub grade: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub rank: usize,
    pub student_id: String,
    pub student_name: String,
    pub percentage: f64,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub student_count: usize,
    pub class_average_percentage: f64,
    pub grade_distribution: Vec<GradeCount>,
    pub subjects: Vec<SubjectStats>,
    pub ranking: Vec<RankEntry>,
}

/// Per-subject statistics, letter distribution and competition ranking
/// (1, 2, 2, 4) by overall percentage for a set of saved records.
pub fn class_summary(records: &[StudentGrade]) -> ClassSummary {
    let mut per_subject: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for r in records {
        for (name, s) in &r.subjects {
            per_subject
                .entry(name.as_str())
                .or_default()
                .push(s.obtained_marks);
        }
    }

    let subjects = per_subject
        .into_iter()
        .map(|(subject, marks)| {
            let sum: f64 = marks.iter().sum();
            SubjectStats {
                subject: subject.to_string(),
                graded_count: marks.len(),
                average: sum / marks.len() as f64,
                highest: marks.iter().copied().fold(f64::MIN, f64::max),
                lowest: marks.iter().copied().fold(f64::MAX, f64::min),
            }
        })
        .collect();

    let grade_distribution = GRADE_BANDS
        .iter()
        .map(|(_, letter)| *letter)
        .chain(std::iter::once(FAILING_GRADE))
        .map(|letter| GradeCount {
            grade: letter.to_string(),
            count: records.iter().filter(|r| r.grade == letter).count(),
        })
        .collect();

    let class_average_percentage = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.percentage).sum::<f64>() / records.len() as f64
    };

    let mut ordered: Vec<&StudentGrade> = records.iter().collect();
    ordered.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.student_name.cmp(&b.student_name))
    });

    let mut ranking: Vec<RankEntry> = Vec::with_capacity(ordered.len());
    for (i, r) in ordered.iter().enumerate() {
        let rank = match ranking.last() {
            Some(prev) if prev.percentage == r.percentage => prev.rank,
            _ => i + 1,
        };
        ranking.push(RankEntry {
            rank,
            student_id: r.student_id.clone(),
            student_name: r.student_name.clone(),
            percentage: r.percentage,
            grade: r.grade.clone(),
        });
    }

    ClassSummary {
        student_count: records.len(),
        class_average_percentage,
        grade_distribution,
        subjects,
        ranking,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExamType;

    fn student(id: &str) -> Student {
        Student {
            id: id.to_string(),
            first_name: "Asha".to_string(),
            last_name: "Rao".to_string(),
            roll_number: "1".to_string(),
            class_name: "Class 5".to_string(),
        }
    }

    fn saved(student_id: &str, name: &str, marks: &[(&str, f64)]) -> StudentGrade {
        let filter = GradeFilter::new("5", ExamType::FA1, "2025-26");
        let mut st = student(student_id);
        st.first_name = name.to_string();
        st.last_name = String::new();
        let raw: Vec<(String, String)> = marks
            .iter()
            .map(|(s, v)| (s.to_string(), format_mark(*v)))
            .collect();
        let ctx = RecordContext {
            filter: &filter,
            exam_date: "2025-07-01",
            existing: None,
        };
        let mut g = build_grade_record(&st, raw, &ctx).expect("record");
        g.student_name = name.to_string();
        g
    }

    #[test]
    fn grade_bands_are_inclusive_on_the_lower_bound() {
        assert_eq!(calculate_grade(100.0), "A+");
        assert_eq!(calculate_grade(90.0), "A+");
        assert_eq!(calculate_grade(89.999), "A");
        assert_eq!(calculate_grade(80.0), "A");
        assert_eq!(calculate_grade(79.99), "B+");
        assert_eq!(calculate_grade(70.0), "B+");
        assert_eq!(calculate_grade(60.0), "B");
        assert_eq!(calculate_grade(50.0), "C+");
        assert_eq!(calculate_grade(40.0), "C");
        assert_eq!(calculate_grade(35.0), "D");
        assert_eq!(calculate_grade(34.999), "F");
        assert_eq!(calculate_grade(0.0), "F");
    }

    #[test]
    fn sanitize_keeps_one_dot_and_two_decimals() {
        assert_eq!(sanitize_mark_input("12.345"), "12.34");
        assert_eq!(sanitize_mark_input("12..3"), "12.3");
        assert_eq!(sanitize_mark_input("-5"), "5");
        assert_eq!(sanitize_mark_input("1.2.3.4"), "1.23");
        assert_eq!(sanitize_mark_input("ab"), "");
        assert_eq!(sanitize_mark_input("."), ".");
    }

    #[test]
    fn format_mark_drops_integral_fraction() {
        assert_eq!(format_mark(85.0), "85");
        assert_eq!(format_mark(0.0), "0");
        assert_eq!(format_mark(72.5), "72.5");
        assert_eq!(format_mark(33.25), "33.25");
    }

    #[test]
    fn parse_mark_distinguishes_blank_zero_and_invalid() {
        assert_eq!(parse_mark("  "), MarkEntry::Blank);
        assert_eq!(parse_mark("0"), MarkEntry::Scored(0.0));
        assert_eq!(parse_mark("100"), MarkEntry::Scored(100.0));
        assert_eq!(parse_mark("100.01"), MarkEntry::Invalid);
        assert_eq!(parse_mark("."), MarkEntry::Invalid);
        assert_eq!(parse_mark("NaN"), MarkEntry::Invalid);
    }

    #[test]
    fn build_record_skips_blank_subjects() {
        let filter = GradeFilter::new("5", ExamType::FA1, "2025-26");
        let ctx = RecordContext {
            filter: &filter,
            exam_date: "2025-07-01",
            existing: None,
        };
        let g = build_grade_record(
            &student("s1"),
            [("English", "85"), ("Mathematics", "")],
            &ctx,
        )
        .expect("record");

        assert_eq!(g.subjects.len(), 1);
        let english = &g.subjects["English"];
        assert_eq!(english.obtained_marks, 85.0);
        assert_eq!(english.grade, "A");
        assert_eq!(g.total_marks, 100.0);
        assert_eq!(g.obtained_marks, 85.0);
        assert_eq!(g.percentage, 85.0);
        assert_eq!(g.grade, "A");
        assert_eq!(g.class_name, "Class 5");
        assert_eq!(g.student_name, "Asha Rao");
        assert!(g.id.is_empty());
    }

    #[test]
    fn graded_zero_counts_but_blank_does_not() {
        let filter = GradeFilter::new("5", ExamType::FA1, "2025-26");
        let ctx = RecordContext {
            filter: &filter,
            exam_date: "2025-07-01",
            existing: None,
        };
        let g = build_grade_record(
            &student("s1"),
            [("English", "80"), ("Hindi", "0"), ("Telugu", "")],
            &ctx,
        )
        .expect("record");
        assert_eq!(g.total_marks, 200.0);
        assert_eq!(g.percentage, 40.0);
        assert_eq!(g.grade, "C");
        assert_eq!(g.subjects["Hindi"].grade, "F");
        assert!(!g.subjects.contains_key("Telugu"));
    }

    #[test]
    fn build_record_returns_none_without_usable_marks() {
        let filter = GradeFilter::new("5", ExamType::FA1, "2025-26");
        let ctx = RecordContext {
            filter: &filter,
            exam_date: "2025-07-01",
            existing: None,
        };
        assert!(build_grade_record(&student("s1"), [("English", ""), ("Hindi", "x")], &ctx).is_none());
    }

    #[test]
    fn build_record_carries_existing_identity_and_remarks() {
        let mut prev = saved("s1", "Asha", &[("English", 50.0)]);
        prev.id = "s1_Class 5_FA1_2025-26".to_string();
        prev.created_at = 1_700_000_000_000;
        prev.subjects.get_mut("English").expect("english").remarks = "retest".to_string();

        let filter = GradeFilter::new("Class 5", ExamType::FA1, "2025-26");
        let ctx = RecordContext {
            filter: &filter,
            exam_date: "2025-07-02",
            existing: Some(&prev),
        };
        let g = build_grade_record(&student("s1"), [("English", "60")], &ctx).expect("record");
        assert_eq!(g.id, prev.id);
        assert_eq!(g.created_at, prev.created_at);
        assert_eq!(g.subjects["English"].remarks, "retest");
        assert_eq!(g.exam_date, "2025-07-02");
    }

    #[test]
    fn class_summary_ranks_ties_with_competition_ranking() {
        let records = vec![
            saved("s1", "Asha", &[("English", 90.0), ("Hindi", 70.0)]),
            saved("s2", "Bala", &[("English", 80.0)]),
            saved("s3", "Chitra", &[("English", 60.0), ("Hindi", 100.0)]),
            saved("s4", "Dev", &[("English", 30.0)]),
        ];
        let summary = class_summary(&records);

        assert_eq!(summary.student_count, 4);
        let ranks: Vec<(usize, &str)> = summary
            .ranking
            .iter()
            .map(|r| (r.rank, r.student_id.as_str()))
            .collect();
        assert_eq!(ranks, vec![(1, "s1"), (1, "s2"), (1, "s3"), (4, "s4")]);

        let english = summary
            .subjects
            .iter()
            .find(|s| s.subject == "English")
            .expect("english stats");
        assert_eq!(english.graded_count, 4);
        assert_eq!(english.average, 65.0);
        assert_eq!(english.highest, 90.0);
        assert_eq!(english.lowest, 30.0);

        let a_count = summary
            .grade_distribution
            .iter()
            .find(|g| g.grade == "A")
            .map(|g| g.count);
        assert_eq!(a_count, Some(3));
        let f_count = summary
            .grade_distribution
            .iter()
            .find(|g| g.grade == "F")
            .map(|g| g.count);
        assert_eq!(f_count, Some(1));
        assert_eq!(summary.class_average_percentage, (80.0 * 3.0 + 30.0) / 4.0);
    }

    #[test]
    fn class_summary_of_nothing_is_empty() {
        let summary = class_summary(&[]);
        assert_eq!(summary.student_count, 0);
        assert_eq!(summary.class_average_percentage, 0.0);
        assert!(summary.ranking.is_empty());
        assert_eq!(summary.grade_distribution.len(), 8);
    }
}
