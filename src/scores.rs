use serde::Serialize;
use thiserror::Error;

use crate::models::{GradeSubmission, SubjectLimits};

/// Period total a student needs to pass.
pub const PASS_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodTotals {
    pub work_total: f64,
    pub period_total: f64,
}

impl PeriodTotals {
    pub fn passed(&self) -> bool {
        passed(self.period_total)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScoreError {
    #[error("{field} score {score} is outside 0..={max}")]
    OutOfRange {
        field: &'static str,
        score: f64,
        max: f64,
    },
}

/// Work total is the mean of the monthly scores that are present; absent or
/// negative months are ignored. The exam is added on top.
pub fn aggregate(
    month1: Option<f64>,
    month2: Option<f64>,
    month3: Option<f64>,
    exam: Option<f64>,
) -> PeriodTotals {
    let present: Vec<f64> = [month1, month2, month3]
        .into_iter()
        .flatten()
        .filter(|score| *score >= 0.0)
        .collect();

    let work_total = if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    };

    PeriodTotals {
        work_total,
        period_total: work_total + exam.unwrap_or(0.0),
    }
}

pub fn passed(period_total: f64) -> bool {
    period_total >= PASS_THRESHOLD
}

/// `part / whole` as a whole percentage, rounding halves up. Zero when
/// `whole` is zero.
pub fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    (part as f64 / whole as f64 * 100.0).round() as u32
}

pub fn is_valid_monthly(score: f64, max: f64) -> bool {
    in_bounds(score, max)
}

pub fn is_valid_exam(score: f64, max: f64) -> bool {
    in_bounds(score, max)
}

fn in_bounds(score: f64, max: f64) -> bool {
    score.is_finite() && score >= 0.0 && score <= max
}

/// Checks every present score against the subject's maxima.
pub fn validate_submission(
    submission: &GradeSubmission,
    limits: SubjectLimits,
) -> Result<(), ScoreError> {
    validate_scores(
        [submission.month1, submission.month2, submission.month3],
        submission.exam,
        limits,
    )
}

pub fn validate_scores(
    months: [Option<f64>; 3],
    exam: Option<f64>,
    limits: SubjectLimits,
) -> Result<(), ScoreError> {
    for (field, score) in ["month1", "month2", "month3"].into_iter().zip(months) {
        if let Some(score) = score {
            if !is_valid_monthly(score, limits.max_monthly) {
                return Err(ScoreError::OutOfRange {
                    field,
                    score,
                    max: limits.max_monthly,
                });
            }
        }
    }

    if let Some(score) = exam {
        if !is_valid_exam(score, limits.max_exam) {
            return Err(ScoreError::OutOfRange {
                field: "exam",
                score,
                max: limits.max_exam,
            });
        }
    }

    Ok(())
}
