use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Status of a section enrollment row as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    Active,
    Dropped,
    Completed,
}

impl EnrollmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "dropped" => Some(Self::Dropped),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Dropped => "dropped",
            Self::Completed => "completed",
        }
    }
}

/// The cohort key of a course assignment. `year_level: None` matches every
/// year level in the cohort.
#[derive(Debug, Clone)]
pub struct AssignmentKey {
    pub assignment_id: String,
    pub program_id: String,
    pub semester_id: String,
    pub academic_year_id: String,
    pub year_level: Option<i64>,
    pub is_mandatory: bool,
}

#[derive(Debug, Clone)]
pub struct EnrollmentRow {
    pub student_id: String,
    pub student_name: String,
    pub program_id: String,
    pub semester_id: String,
    pub academic_year_id: String,
    pub year_level: i64,
    pub section_code: String,
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStudent {
    pub student_id: String,
    pub student_name: String,
    pub program_id: String,
    pub year_level: i64,
    pub sections: Vec<String>,
    pub assignment_id: String,
    pub is_mandatory: bool,
}

fn matches(a: &AssignmentKey, e: &EnrollmentRow) -> bool {
    e.status == EnrollmentStatus::Active
        && e.program_id == a.program_id
        && e.semester_id == a.semester_id
        && e.academic_year_id == a.academic_year_id
        && a.year_level.map(|y| e.year_level == y).unwrap_or(true)
}

/// Derives the students a set of course assignments reaches by matching
/// assignment cohorts against active section enrollments.
///
/// A student matched through two assignments to the same
/// (program, semester, academic year) cohort is kept once, under the first
/// assignment that matched; the same student enrolled in two programs is
/// kept once per program. Section codes accumulate across all matching
/// enrollment rows of the retained cohort.
pub fn resolve_roster(
    assignments: &[AssignmentKey],
    enrollments: &[EnrollmentRow],
) -> Vec<ResolvedStudent> {
    if assignments.is_empty() || enrollments.is_empty() {
        return Vec::new();
    }

    // Keyed by (student, program, semester, academic year); insertion order kept.
    let mut order: Vec<(String, String, String, String)> = Vec::new();
    let mut by_key: HashMap<(String, String, String, String), (ResolvedStudent, BTreeSet<String>)> =
        HashMap::new();

    for a in assignments {
        for e in enrollments {
            if !matches(a, e) {
                continue;
            }
            let key = (
                e.student_id.clone(),
                e.program_id.clone(),
                e.semester_id.clone(),
                e.academic_year_id.clone(),
            );
            let entry = by_key.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                (
                    ResolvedStudent {
                        student_id: e.student_id.clone(),
                        student_name: e.student_name.clone(),
                        program_id: e.program_id.clone(),
                        year_level: e.year_level,
                        sections: Vec::new(),
                        assignment_id: a.assignment_id.clone(),
                        is_mandatory: a.is_mandatory,
                    },
                    BTreeSet::new(),
                )
            });
            entry.1.insert(e.section_code.clone());
        }
    }

    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .map(|(mut resolved, sections)| {
            resolved.sections = sections.into_iter().collect();
            resolved
        })
        .collect()
}
