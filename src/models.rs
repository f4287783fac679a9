use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudyLevel {
    FirstYear,
    SecondYear,
    ThirdYear,
    Graduation,
}

impl StudyLevel {
    /// Levels that make up the success-rate grid, in display order.
    pub const GRID: [StudyLevel; 3] = [
        StudyLevel::FirstYear,
        StudyLevel::SecondYear,
        StudyLevel::ThirdYear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StudyLevel::FirstYear => "FIRST_YEAR",
            StudyLevel::SecondYear => "SECOND_YEAR",
            StudyLevel::ThirdYear => "THIRD_YEAR",
            StudyLevel::Graduation => "GRADUATION",
        }
    }
}

impl FromStr for StudyLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FIRST_YEAR" => Ok(StudyLevel::FirstYear),
            "SECOND_YEAR" => Ok(StudyLevel::SecondYear),
            "THIRD_YEAR" => Ok(StudyLevel::ThirdYear),
            "GRADUATION" => Ok(StudyLevel::Graduation),
            other => anyhow::bail!("unknown study level '{other}'"),
        }
    }
}

impl fmt::Display for StudyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Period {
    First,
    Second,
    Third,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::First, Period::Second, Period::Third];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::First => "FIRST",
            Period::Second => "SECOND",
            Period::Third => "THIRD",
        }
    }

    /// Lowercase name for prose output.
    pub fn label(self) -> &'static str {
        match self {
            Period::First => "first",
            Period::Second => "second",
            Period::Third => "third",
        }
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FIRST" => Ok(Period::First),
            "SECOND" => Ok(Period::Second),
            "THIRD" => Ok(Period::Third),
            other => anyhow::bail!("unknown period '{other}'"),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping key for cohort aggregation. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CohortKey {
    pub study_level: StudyLevel,
    pub period: Period,
}

/// One stored grade row for a (student, subject, academic year, period).
#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub academic_year: String,
    pub period: Period,
    pub month1: Option<f64>,
    pub month2: Option<f64>,
    pub month3: Option<f64>,
    pub exam: Option<f64>,
    pub work_total: f64,
    pub period_total: f64,
}

/// Scores a teacher submits for one subject and period.
#[derive(Debug, Clone)]
pub struct GradeSubmission {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub academic_year: String,
    pub period: Period,
    pub month1: Option<f64>,
    pub month2: Option<f64>,
    pub month3: Option<f64>,
    pub exam: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct SubjectLimits {
    pub max_monthly: f64,
    pub max_exam: f64,
}

impl SubjectLimits {
    /// Maxima given to a subject created without explicit limits.
    pub const DEFAULT: SubjectLimits = SubjectLimits {
        max_monthly: 50.0,
        max_exam: 50.0,
    };
}

/// Row shape consumed by the cohort reducer. Keys are optional because
/// the store may hold students without a study level or rows with an
/// unrecognised period.
#[derive(Debug, Clone)]
pub struct GradeSample {
    pub student_id: Uuid,
    pub study_level: Option<StudyLevel>,
    pub period: Option<Period>,
    pub period_total: f64,
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub session: String,
    pub attended_on: NaiveDate,
    pub present: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AttendanceMark {
    pub student_id: Uuid,
    pub present: bool,
}

/// A subject line on a student's results sheet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject: String,
    pub period: Period,
    pub work_total: f64,
    pub exam: Option<f64>,
    pub period_total: f64,
    pub passed: bool,
}

/// Who is asking. Decides which rows the store hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Admin,
    Teacher(Uuid),
    Student(Uuid),
    Parent(Uuid),
}

impl Visibility {
    pub fn from_scope(
        teacher: Option<Uuid>,
        student: Option<Uuid>,
        parent: Option<Uuid>,
    ) -> Self {
        match (teacher, student, parent) {
            (Some(id), _, _) => Visibility::Teacher(id),
            (_, Some(id), _) => Visibility::Student(id),
            (_, _, Some(id)) => Visibility::Parent(id),
            _ => Visibility::Admin,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Visibility::Admin => "all students".to_string(),
            Visibility::Teacher(id) => format!("teacher {id}"),
            Visibility::Student(id) => format!("student {id}"),
            Visibility::Parent(id) => format!("parent {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn study_levels_parse_case_insensitively() {
        assert_eq!("first_year".parse::<StudyLevel>().unwrap(), StudyLevel::FirstYear);
        assert_eq!(" GRADUATION ".parse::<StudyLevel>().unwrap(), StudyLevel::Graduation);
        assert!("fourth_year".parse::<StudyLevel>().is_err());
    }

    #[test]
    fn periods_serialize_as_upper_case_tags() {
        let json = serde_json::to_string(&Period::Second).unwrap();
        assert_eq!(json, "\"SECOND\"");
        assert_eq!(Period::Third.to_string(), "THIRD");
        assert_eq!(Period::Second.label(), "second");
    }

    #[test]
    fn scope_flags_pick_visibility() {
        let id = Uuid::new_v4();
        assert_eq!(Visibility::from_scope(None, None, None), Visibility::Admin);
        assert_eq!(
            Visibility::from_scope(None, Some(id), None),
            Visibility::Student(id)
        );
        assert_eq!(
            Visibility::from_scope(None, None, Some(id)),
            Visibility::Parent(id)
        );
    }
}
