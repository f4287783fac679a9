use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::models::{CohortKey, GradeSample, Period, StudyLevel};
use crate::scores;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortCell {
    pub study_level: StudyLevel,
    pub period: Period,
    pub total: usize,
    pub passed: usize,
    pub success_rate_percent: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSummary {
    pub total_students: usize,
    pub total_grades: usize,
    pub overall_success_rate_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortStats {
    pub grid: Vec<CohortCell>,
    pub summary: CohortSummary,
    /// Rows dropped because a grouping key was missing.
    pub skipped: usize,
}

impl CohortStats {
    pub fn cell(&self, study_level: StudyLevel, period: Period) -> Option<&CohortCell> {
        self.grid
            .iter()
            .find(|cell| cell.study_level == study_level && cell.period == period)
    }

    /// Populated cells ordered from lowest to highest success rate.
    pub fn weakest_cells(&self, limit: usize) -> Vec<&CohortCell> {
        let mut cells: Vec<&CohortCell> = self.grid.iter().filter(|cell| cell.total > 0).collect();
        cells.sort_by_key(|cell| cell.success_rate_percent);
        cells.truncate(limit);
        cells
    }
}

pub fn reduce(samples: &[GradeSample]) -> CohortStats {
    let mut groups: HashMap<CohortKey, (usize, usize)> = HashMap::new();
    let mut students: HashSet<Uuid> = HashSet::new();
    let mut total_grades = 0usize;
    let mut total_passed = 0usize;
    let mut skipped = 0usize;

    for sample in samples {
        let (Some(study_level), Some(period)) = (sample.study_level, sample.period) else {
            warn!(
                student_id = %sample.student_id,
                has_study_level = sample.study_level.is_some(),
                has_period = sample.period.is_some(),
                "skipping grade without a cohort key"
            );
            skipped += 1;
            continue;
        };

        let passed = scores::passed(sample.period_total);
        let entry = groups
            .entry(CohortKey {
                study_level,
                period,
            })
            .or_insert((0, 0));
        entry.0 += 1;
        total_grades += 1;
        if passed {
            entry.1 += 1;
            total_passed += 1;
        }
        students.insert(sample.student_id);
    }

    let mut grid = Vec::with_capacity(StudyLevel::GRID.len() * Period::ALL.len());
    for study_level in StudyLevel::GRID {
        for period in Period::ALL {
            let (total, passed) = groups
                .get(&CohortKey {
                    study_level,
                    period,
                })
                .copied()
                .unwrap_or((0, 0));
            grid.push(CohortCell {
                study_level,
                period,
                total,
                passed,
                success_rate_percent: scores::percent(passed, total),
            });
        }
    }

    CohortStats {
        grid,
        summary: CohortSummary {
            total_students: students.len(),
            total_grades,
            overall_success_rate_percent: scores::percent(total_passed, total_grades),
        },
        skipped,
    }
}
