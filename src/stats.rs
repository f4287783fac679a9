use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::attendance::{self, AttendanceStats, DailyAttendance, SessionAttendance, Trend};
use crate::cohort::{self, CohortStats};
use crate::db::GradeRepository;
use crate::models::{SubjectResult, Visibility};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceOverview {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub stats: AttendanceStats,
    pub previous: AttendanceStats,
    pub trend: Trend,
    pub sessions: Vec<SessionAttendance>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSheet {
    pub student_id: Uuid,
    pub academic_year: String,
    pub subjects: Vec<SubjectResult>,
    pub passed: usize,
    pub failed: usize,
}

pub async fn academic_stats<R>(
    repo: &R,
    academic_year: &str,
    visibility: Visibility,
) -> anyhow::Result<CohortStats>
where
    R: GradeRepository + ?Sized,
{
    let samples = repo.fetch_grade_samples(academic_year, visibility).await?;
    let stats = cohort::reduce(&samples);
    info!(
        academic_year,
        grades = stats.summary.total_grades,
        students = stats.summary.total_students,
        skipped = stats.skipped,
        "academic stats computed"
    );
    Ok(stats)
}

/// Stats for `day` with the trend measured against the day before.
pub async fn attendance_stats<R>(
    repo: &R,
    day: NaiveDate,
    visibility: Visibility,
) -> anyhow::Result<AttendanceOverview>
where
    R: GradeRepository + ?Sized,
{
    let previous_day = day - Duration::days(1);
    let records = repo.fetch_attendance(previous_day, day, visibility).await?;

    let (today, yesterday): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|record| record.attended_on == day);

    let stats = attendance::reduce(today.iter().map(|record| record.present));
    let previous = attendance::reduce(yesterday.iter().map(|record| record.present));

    Ok(AttendanceOverview {
        date: day,
        stats,
        previous,
        trend: attendance::trend(stats.attendance_rate, previous.attendance_rate),
        sessions: attendance::by_session(&today),
    })
}

pub async fn attendance_series<R>(
    repo: &R,
    from: NaiveDate,
    to: NaiveDate,
    visibility: Visibility,
) -> anyhow::Result<Vec<DailyAttendance>>
where
    R: GradeRepository + ?Sized,
{
    if to < from {
        anyhow::bail!("date range ends ({to}) before it starts ({from})");
    }
    let records = repo.fetch_attendance(from, to, visibility).await?;
    Ok(attendance::daily(&records))
}

pub async fn student_results<R>(
    repo: &R,
    student_id: Uuid,
    academic_year: &str,
) -> anyhow::Result<ResultsSheet>
where
    R: GradeRepository + ?Sized,
{
    let subjects = repo.fetch_results(student_id, academic_year).await?;
    let passed = subjects.iter().filter(|result| result.passed).count();

    Ok(ResultsSheet {
        student_id,
        academic_year: academic_year.to_string(),
        failed: subjects.len() - passed,
        passed,
        subjects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttendanceRecord, GradeSample, Period, StudyLevel};
    use crate::scores;
    use async_trait::async_trait;

    #[derive(Default)]
    struct MemoryRepository {
        grades: Vec<(String, GradeSample)>,
        attendance: Vec<AttendanceRecord>,
        results: Vec<(Uuid, String, SubjectResult)>,
    }

    #[async_trait]
    impl GradeRepository for MemoryRepository {
        async fn fetch_grade_samples(
            &self,
            academic_year: &str,
            visibility: Visibility,
        ) -> anyhow::Result<Vec<GradeSample>> {
            Ok(self
                .grades
                .iter()
                .filter(|(year, _)| year == academic_year)
                .filter(|(_, sample)| match visibility {
                    Visibility::Student(id) => sample.student_id == id,
                    _ => true,
                })
                .map(|(_, sample)| sample.clone())
                .collect())
        }

        async fn fetch_attendance(
            &self,
            from: NaiveDate,
            to: NaiveDate,
            _visibility: Visibility,
        ) -> anyhow::Result<Vec<AttendanceRecord>> {
            Ok(self
                .attendance
                .iter()
                .filter(|record| record.attended_on >= from && record.attended_on <= to)
                .cloned()
                .collect())
        }

        async fn fetch_results(
            &self,
            student_id: Uuid,
            academic_year: &str,
        ) -> anyhow::Result<Vec<SubjectResult>> {
            Ok(self
                .results
                .iter()
                .filter(|(id, year, _)| *id == student_id && year == academic_year)
                .map(|(_, _, result)| result.clone())
                .collect())
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, day).unwrap()
    }

    fn marks(day: u32, present: usize, absent: usize) -> Vec<AttendanceRecord> {
        (0..present + absent)
            .map(|index| AttendanceRecord {
                session: "morning".to_string(),
                attended_on: date(day),
                present: index < present,
            })
            .collect()
    }

    #[tokio::test]
    async fn academic_stats_use_only_requested_year() {
        let student = Uuid::new_v4();
        let repo = MemoryRepository {
            grades: vec![
                (
                    "2025-2026".to_string(),
                    GradeSample {
                        student_id: student,
                        study_level: Some(StudyLevel::FirstYear),
                        period: Some(Period::First),
                        period_total: 64.0,
                    },
                ),
                (
                    "2024-2025".to_string(),
                    GradeSample {
                        student_id: student,
                        study_level: Some(StudyLevel::FirstYear),
                        period: Some(Period::First),
                        period_total: 12.0,
                    },
                ),
            ],
            ..Default::default()
        };

        let stats = academic_stats(&repo, "2025-2026", Visibility::Admin)
            .await
            .unwrap();
        assert_eq!(stats.summary.total_grades, 1);
        assert_eq!(stats.summary.overall_success_rate_percent, 100);
        assert_eq!(stats.grid.len(), 9);
    }

    #[tokio::test]
    async fn academic_stats_on_empty_store_are_zero() {
        let repo = MemoryRepository::default();
        let stats = academic_stats(&repo, "2025-2026", Visibility::Student(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(stats.summary.total_students, 0);
        assert_eq!(stats.summary.overall_success_rate_percent, 0);
        assert!(stats.grid.iter().all(|cell| cell.success_rate_percent == 0));
    }

    #[tokio::test]
    async fn attendance_trend_compares_with_previous_day() {
        let mut attendance = marks(2, 7, 3);
        attendance.extend(marks(3, 9, 1));
        attendance.extend(marks(1, 0, 5));
        let repo = MemoryRepository {
            attendance,
            ..Default::default()
        };

        let overview = attendance_stats(&repo, date(3), Visibility::Admin)
            .await
            .unwrap();
        assert_eq!(overview.stats.attendance_rate, 90.0);
        assert_eq!(overview.previous.attendance_rate, 70.0);
        assert_eq!(overview.trend, Trend::Up);
        assert_eq!(overview.sessions.len(), 1);
        assert_eq!(overview.sessions[0].session, "morning");
        assert_eq!(overview.sessions[0].stats.present, 9);

        let json = serde_json::to_value(&overview).unwrap();
        assert_eq!(json["attendanceRate"], 90.0);
        assert_eq!(json["totalStudents"], 10);
        assert_eq!(json["trend"], "up");
    }

    #[tokio::test]
    async fn trend_is_not_flattened_by_rounding() {
        let mut attendance = marks(1, 70, 30);
        attendance.extend(marks(2, 377, 123));
        let repo = MemoryRepository {
            attendance,
            ..Default::default()
        };

        let overview = attendance_stats(&repo, date(2), Visibility::Admin)
            .await
            .unwrap();
        assert!((overview.stats.attendance_rate - 75.4).abs() < 1e-9);
        assert_eq!(overview.previous.attendance_rate, 70.0);
        assert_eq!(overview.trend, Trend::Up);
    }

    #[tokio::test]
    async fn attendance_without_rows_is_stable_and_zero() {
        let repo = MemoryRepository::default();
        let overview = attendance_stats(&repo, date(10), Visibility::Admin)
            .await
            .unwrap();
        assert_eq!(overview.stats, AttendanceStats::default());
        assert_eq!(overview.trend, Trend::Stable);
        assert!(overview.sessions.is_empty());
    }

    #[tokio::test]
    async fn attendance_series_rejects_inverted_range() {
        let repo = MemoryRepository::default();
        assert!(attendance_series(&repo, date(5), date(1), Visibility::Admin)
            .await
            .is_err());

        let mut attendance = marks(4, 1, 1);
        attendance.extend(marks(2, 2, 0));
        let repo = MemoryRepository {
            attendance,
            ..Default::default()
        };
        let series = attendance_series(&repo, date(1), date(5), Visibility::Admin)
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].date, date(2));
        assert_eq!(series[1].stats.attendance_rate, 50.0);
    }

    #[tokio::test]
    async fn results_sheet_counts_passes() {
        let student = Uuid::new_v4();
        let result = |subject: &str, month: f64, exam: f64| {
            let totals = scores::aggregate(Some(month), None, None, Some(exam));
            SubjectResult {
                subject: subject.to_string(),
                period: Period::First,
                work_total: totals.work_total,
                exam: Some(exam),
                period_total: totals.period_total,
                passed: totals.passed(),
            }
        };
        let repo = MemoryRepository {
            results: vec![
                (student, "2025-2026".to_string(), result("Mathematics", 30.0, 25.0)),
                (student, "2025-2026".to_string(), result("Physics", 10.0, 20.0)),
            ],
            ..Default::default()
        };

        let sheet = student_results(&repo, student, "2025-2026").await.unwrap();
        assert_eq!(sheet.subjects.len(), 2);
        assert_eq!(sheet.passed, 1);
        assert_eq!(sheet.failed, 1);
    }
}
