use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    AttendanceMark, AttendanceRecord, GradeRecord, GradeSample, GradeSubmission, Period,
    StudyLevel, SubjectLimits, SubjectResult, Visibility,
};
use crate::scores;

/// Read side of the grade store. Rows come back already restricted to what
/// the caller may see.
#[async_trait]
pub trait GradeRepository: Send + Sync {
    async fn fetch_grade_samples(
        &self,
        academic_year: &str,
        visibility: Visibility,
    ) -> anyhow::Result<Vec<GradeSample>>;

    async fn fetch_attendance(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        visibility: Visibility,
    ) -> anyhow::Result<Vec<AttendanceRecord>>;

    async fn fetch_results(
        &self,
        student_id: Uuid,
        academic_year: &str,
    ) -> anyhow::Result<Vec<SubjectResult>>;
}

#[derive(Clone)]
pub struct PgGradeRepository {
    pool: PgPool,
}

impl PgGradeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl GradeRepository for PgGradeRepository {
    async fn fetch_grade_samples(
        &self,
        academic_year: &str,
        visibility: Visibility,
    ) -> anyhow::Result<Vec<GradeSample>> {
        fetch_grade_samples(&self.pool, academic_year, visibility).await
    }

    async fn fetch_attendance(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        visibility: Visibility,
    ) -> anyhow::Result<Vec<AttendanceRecord>> {
        fetch_attendance(&self.pool, from, to, visibility).await
    }

    async fn fetch_results(
        &self,
        student_id: Uuid,
        academic_year: &str,
    ) -> anyhow::Result<Vec<SubjectResult>> {
        fetch_results(&self.pool, student_id, academic_year).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeTarget {
    Grades,
    Attendance,
}

/// SQL predicate restricting rows to the caller's visibility, bound at
/// placeholder `$param`.
fn scope_clause(visibility: Visibility, target: ScopeTarget, param: usize) -> (String, Option<Uuid>) {
    let student_column = match target {
        ScopeTarget::Grades => "g.student_id",
        ScopeTarget::Attendance => "a.student_id",
    };

    match visibility {
        Visibility::Admin => (String::new(), None),
        Visibility::Student(id) => (format!(" AND {student_column} = ${param}"), Some(id)),
        Visibility::Parent(id) => (
            format!(
                " AND {student_column} IN \
                 (SELECT pl.student_id FROM school_stats.parent_links pl WHERE pl.parent_id = ${param})"
            ),
            Some(id),
        ),
        Visibility::Teacher(id) => match target {
            ScopeTarget::Grades => (
                format!(
                    " AND g.subject_id IN \
                     (SELECT ts.subject_id FROM school_stats.teacher_subjects ts WHERE ts.teacher_id = ${param})"
                ),
                Some(id),
            ),
            ScopeTarget::Attendance => (
                format!(
                    " AND a.student_id IN \
                     (SELECT tg.student_id FROM school_stats.grades tg \
                     JOIN school_stats.teacher_subjects ts ON ts.subject_id = tg.subject_id \
                     WHERE ts.teacher_id = ${param})"
                ),
                Some(id),
            ),
        },
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn fetch_grade_samples(
    pool: &PgPool,
    academic_year: &str,
    visibility: Visibility,
) -> anyhow::Result<Vec<GradeSample>> {
    let (scope, scope_id) = scope_clause(visibility, ScopeTarget::Grades, 2);
    let query = format!(
        "SELECT g.student_id, st.study_level, g.period, g.period_total \
         FROM school_stats.grades g \
         JOIN school_stats.students st ON st.id = g.student_id \
         WHERE g.academic_year = $1{scope}"
    );

    let mut rows = sqlx::query(&query).bind(academic_year);
    if let Some(id) = scope_id {
        rows = rows.bind(id);
    }

    let records = rows.fetch_all(pool).await?;
    let mut samples = Vec::with_capacity(records.len());

    for row in records {
        let study_level: Option<String> = row.get("study_level");
        let period: String = row.get("period");
        samples.push(GradeSample {
            student_id: row.get("student_id"),
            study_level: study_level.and_then(|value| value.parse::<StudyLevel>().ok()),
            period: period.parse::<Period>().ok(),
            period_total: row.get("period_total"),
        });
    }

    debug!(academic_year, rows = samples.len(), "fetched grade samples");
    Ok(samples)
}

pub async fn fetch_attendance(
    pool: &PgPool,
    from: NaiveDate,
    to: NaiveDate,
    visibility: Visibility,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let (scope, scope_id) = scope_clause(visibility, ScopeTarget::Attendance, 3);
    let query = format!(
        "SELECT a.session, a.attended_on, a.present \
         FROM school_stats.attendance a \
         WHERE a.attended_on BETWEEN $1 AND $2{scope} \
         ORDER BY a.attended_on"
    );

    let mut rows = sqlx::query(&query).bind(from).bind(to);
    if let Some(id) = scope_id {
        rows = rows.bind(id);
    }

    let records = rows
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| AttendanceRecord {
            session: row.get("session"),
            attended_on: row.get("attended_on"),
            present: row.get("present"),
        })
        .collect::<Vec<_>>();

    debug!(%from, %to, rows = records.len(), "fetched attendance");
    Ok(records)
}

pub async fn fetch_results(
    pool: &PgPool,
    student_id: Uuid,
    academic_year: &str,
) -> anyhow::Result<Vec<SubjectResult>> {
    let rows = sqlx::query(
        r#"
        SELECT sub.name, g.period, g.month1, g.month2, g.month3, g.exam
        FROM school_stats.grades g
        JOIN school_stats.subjects sub ON sub.id = g.subject_id
        WHERE g.student_id = $1 AND g.academic_year = $2
        ORDER BY sub.name, g.period
        "#,
    )
    .bind(student_id)
    .bind(academic_year)
    .fetch_all(pool)
    .await?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let subject: String = row.get("name");
        let period: String = row.get("period");
        let Ok(period) = period.parse::<Period>() else {
            warn!(%student_id, %subject, %period, "skipping result with unknown period");
            continue;
        };

        let exam: Option<f64> = row.get("exam");
        let totals = scores::aggregate(row.get("month1"), row.get("month2"), row.get("month3"), exam);
        results.push(SubjectResult {
            subject,
            period,
            work_total: totals.work_total,
            exam,
            period_total: totals.period_total,
            passed: totals.passed(),
        });
    }

    Ok(results)
}

pub async fn subject_limits(pool: &PgPool, subject_id: Uuid) -> anyhow::Result<SubjectLimits> {
    let row = sqlx::query("SELECT max_monthly, max_exam FROM school_stats.subjects WHERE id = $1")
        .bind(subject_id)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("unknown subject {subject_id}"))?;

    Ok(SubjectLimits {
        max_monthly: row.get("max_monthly"),
        max_exam: row.get("max_exam"),
    })
}

async fn subject_limits_by_name(
    conn: &mut PgConnection,
    name: &str,
) -> anyhow::Result<Option<SubjectLimits>> {
    let row = sqlx::query("SELECT max_monthly, max_exam FROM school_stats.subjects WHERE name = $1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|row| SubjectLimits {
        max_monthly: row.get("max_monthly"),
        max_exam: row.get("max_exam"),
    }))
}

/// Validates the scores against the subject, recomputes the totals and
/// upserts on (student, subject, academic year, period).
pub async fn upsert_grade(pool: &PgPool, submission: &GradeSubmission) -> anyhow::Result<GradeRecord> {
    let limits = subject_limits(pool, submission.subject_id).await?;
    scores::validate_submission(submission, limits)?;

    let mut conn = pool.acquire().await?;
    store_grade(&mut conn, submission).await
}

/// Writes an already validated submission with freshly computed totals.
async fn store_grade(
    conn: &mut PgConnection,
    submission: &GradeSubmission,
) -> anyhow::Result<GradeRecord> {
    let totals = scores::aggregate(
        submission.month1,
        submission.month2,
        submission.month3,
        submission.exam,
    );

    sqlx::query(
        r#"
        INSERT INTO school_stats.grades
        (id, student_id, subject_id, academic_year, period,
         month1, month2, month3, exam, work_total, period_total)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (student_id, subject_id, academic_year, period) DO UPDATE
        SET month1 = EXCLUDED.month1,
            month2 = EXCLUDED.month2,
            month3 = EXCLUDED.month3,
            exam = EXCLUDED.exam,
            work_total = EXCLUDED.work_total,
            period_total = EXCLUDED.period_total,
            updated_at = now()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(submission.student_id)
    .bind(submission.subject_id)
    .bind(&submission.academic_year)
    .bind(submission.period.as_str())
    .bind(submission.month1)
    .bind(submission.month2)
    .bind(submission.month3)
    .bind(submission.exam)
    .bind(totals.work_total)
    .bind(totals.period_total)
    .execute(&mut *conn)
    .await?;

    Ok(GradeRecord {
        student_id: submission.student_id,
        subject_id: submission.subject_id,
        academic_year: submission.academic_year.clone(),
        period: submission.period,
        month1: submission.month1,
        month2: submission.month2,
        month3: submission.month3,
        exam: submission.exam,
        work_total: totals.work_total,
        period_total: totals.period_total,
    })
}

/// Replaces every mark for one session on one day.
pub async fn replace_attendance(
    pool: &PgPool,
    session: &str,
    attended_on: NaiveDate,
    marks: &[AttendanceMark],
) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query(
        "DELETE FROM school_stats.attendance WHERE session = $1 AND attended_on = $2",
    )
    .bind(session)
    .bind(attended_on)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    for mark in marks {
        sqlx::query(
            r#"
            INSERT INTO school_stats.attendance (id, student_id, session, attended_on, present)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, session, attended_on) DO UPDATE SET present = EXCLUDED.present
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(mark.student_id)
        .bind(session)
        .bind(attended_on)
        .bind(mark.present)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(session, %attended_on, removed, inserted = marks.len(), "attendance replaced");
    Ok(marks.len())
}

pub async fn reset_grades(pool: &PgPool, academic_year: &str) -> anyhow::Result<u64> {
    let removed = sqlx::query("DELETE FROM school_stats.grades WHERE academic_year = $1")
        .bind(academic_year)
        .execute(pool)
        .await?
        .rows_affected();

    warn!(academic_year, removed, "grades reset");
    Ok(removed)
}

async fn upsert_student(
    conn: &mut PgConnection,
    id: Uuid,
    full_name: &str,
    email: &str,
    study_level: Option<&str>,
) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO school_stats.students (id, full_name, email, study_level)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name, study_level = EXCLUDED.study_level
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(full_name)
    .bind(email)
    .bind(study_level)
    .fetch_one(&mut *conn)
    .await?
    .get("id");

    Ok(id)
}

async fn upsert_subject(conn: &mut PgConnection, id: Uuid, name: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO school_stats.subjects (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(name)
    .fetch_one(&mut *conn)
    .await?
    .get("id");

    Ok(id)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        (
            Uuid::parse_str("5b2e9c41-7a3d-4e18-9f06-c2d84a1b6e37")?,
            "Amina Haddad",
            "amina.haddad@school.example",
            StudyLevel::FirstYear,
        ),
        (
            Uuid::parse_str("e47a10d3-2c95-4b7f-8a61-93f0d5c2b8e4")?,
            "Yacine Brahimi",
            "yacine.brahimi@school.example",
            StudyLevel::FirstYear,
        ),
        (
            Uuid::parse_str("1f8d3b6a-94e2-4c07-b5d9-6a2e7c0f4b13")?,
            "Lina Saidi",
            "lina.saidi@school.example",
            StudyLevel::SecondYear,
        ),
        (
            Uuid::parse_str("8f1c2b7e-5d4a-4f3b-9c2d-1e0f9a8b7c6d")?,
            "Omar Mansouri",
            "omar.mansouri@school.example",
            StudyLevel::ThirdYear,
        ),
    ];

    let mut conn = pool.acquire().await?;
    let mut student_ids = Vec::with_capacity(students.len());
    for (id, name, email, level) in &students {
        student_ids.push(upsert_student(&mut conn, *id, name, email, Some(level.as_str())).await?);
    }

    let math = upsert_subject(
        &mut conn,
        Uuid::parse_str("6a0b8c1d-2e3f-4a5b-8c7d-9e0f1a2b3c4d")?,
        "Mathematics",
    )
    .await?;
    let physics = upsert_subject(
        &mut conn,
        Uuid::parse_str("7b1c9d2e-3f4a-4b6c-9d8e-0f1a2b3c4d5e")?,
        "Physics",
    )
    .await?;
    drop(conn);

    let teacher = Uuid::parse_str("a1b2c3d4-e5f6-4789-8abc-def012345678")?;
    let parent = Uuid::parse_str("b2c3d4e5-f6a7-4890-9bcd-ef0123456789")?;

    sqlx::query(
        "INSERT INTO school_stats.teacher_subjects (teacher_id, subject_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(teacher)
    .bind(math)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO school_stats.parent_links (parent_id, student_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(parent)
    .bind(student_ids[0])
    .execute(pool)
    .await?;

    let grade_rows = [
        (0, math, Period::First, [Some(40.0), Some(35.0), None], Some(30.0)),
        (0, physics, Period::First, [Some(20.0), Some(18.0), Some(22.0)], Some(25.0)),
        (1, math, Period::First, [Some(12.0), None, Some(16.0)], Some(20.0)),
        (2, math, Period::Second, [Some(45.0), Some(42.0), Some(48.0)], Some(40.0)),
        (3, physics, Period::Third, [None, None, None], Some(47.0)),
    ];

    for (student, subject_id, period, months, exam) in grade_rows {
        upsert_grade(
            pool,
            &GradeSubmission {
                student_id: student_ids[student],
                subject_id,
                academic_year: "2025-2026".to_string(),
                period,
                month1: months[0],
                month2: months[1],
                month3: months[2],
                exam,
            },
        )
        .await?;
    }

    let days = [
        (
            NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?,
            [true, true, false, true],
        ),
        (
            NaiveDate::from_ymd_opt(2026, 2, 3).context("invalid date")?,
            [true, false, false, true],
        ),
    ];

    for (day, presence) in days {
        let marks: Vec<AttendanceMark> = student_ids
            .iter()
            .zip(presence)
            .map(|(student_id, present)| AttendanceMark {
                student_id: *student_id,
                present,
            })
            .collect();
        replace_attendance(pool, "morning", day, &marks).await?;
    }

    info!(students = student_ids.len(), "seed data loaded");
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct GradeCsvRow {
    full_name: String,
    email: String,
    study_level: Option<String>,
    subject: String,
    academic_year: String,
    period: String,
    month1: Option<f64>,
    month2: Option<f64>,
    month3: Option<f64>,
    exam: Option<f64>,
}

/// A CSV row whose keys parsed and whose scores fit the subject.
#[derive(Debug, Clone, PartialEq)]
struct ImportRow {
    full_name: String,
    email: String,
    study_level: Option<StudyLevel>,
    subject: String,
    academic_year: String,
    period: Period,
    months: [Option<f64>; 3],
    exam: Option<f64>,
}

/// Decides whether a CSV row can be imported. `limits` is `None` when the
/// subject does not exist yet and will be created with default maxima.
fn check_import_row(row: GradeCsvRow, limits: Option<SubjectLimits>) -> anyhow::Result<ImportRow> {
    for (field, value) in [
        ("email", &row.email),
        ("subject", &row.subject),
        ("academic_year", &row.academic_year),
    ] {
        if value.trim().is_empty() {
            anyhow::bail!("missing {field}");
        }
    }

    let period: Period = row.period.parse()?;
    let study_level = row
        .study_level
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(str::parse::<StudyLevel>)
        .transpose()?;

    let months = [row.month1, row.month2, row.month3];
    scores::validate_scores(months, row.exam, limits.unwrap_or(SubjectLimits::DEFAULT))?;

    Ok(ImportRow {
        full_name: row.full_name,
        email: row.email,
        study_level,
        subject: row.subject,
        academic_year: row.academic_year,
        period,
        months,
        exam: row.exam,
    })
}

/// Imports every acceptable row in one transaction. Rows that fail to parse
/// or validate are counted as rejected and leave nothing behind.
pub async fn import_grades_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();
    let mut tx = pool.begin().await?;

    for (line, result) in reader.deserialize::<GradeCsvRow>().enumerate() {
        let line = line + 1;
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(line, error = %err, "rejected unreadable grade row");
                summary.rejected += 1;
                continue;
            }
        };

        let limits = subject_limits_by_name(&mut tx, &row.subject).await?;
        let row = match check_import_row(row, limits) {
            Ok(row) => row,
            Err(err) => {
                warn!(line, error = %err, "rejected grade row");
                summary.rejected += 1;
                continue;
            }
        };

        let student_id = upsert_student(
            &mut tx,
            Uuid::new_v4(),
            &row.full_name,
            &row.email,
            row.study_level.map(StudyLevel::as_str),
        )
        .await?;
        let subject_id = upsert_subject(&mut tx, Uuid::new_v4(), &row.subject).await?;

        store_grade(
            &mut tx,
            &GradeSubmission {
                student_id,
                subject_id,
                academic_year: row.academic_year,
                period: row.period,
                month1: row.months[0],
                month2: row.months[1],
                month3: row.months[2],
                exam: row.exam,
            },
        )
        .await?;
        summary.imported += 1;
    }

    tx.commit().await?;
    info!(
        imported = summary.imported,
        rejected = summary.rejected,
        "grade import finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_scope_adds_no_filter() {
        let (clause, id) = scope_clause(Visibility::Admin, ScopeTarget::Grades, 2);
        assert!(clause.is_empty());
        assert!(id.is_none());
    }

    #[test]
    fn student_scope_binds_requested_placeholder() {
        let student = Uuid::new_v4();
        let (clause, id) = scope_clause(Visibility::Student(student), ScopeTarget::Attendance, 3);
        assert_eq!(clause, " AND a.student_id = $3");
        assert_eq!(id, Some(student));
    }

    #[test]
    fn teacher_scope_filters_by_subject_for_grades() {
        let teacher = Uuid::new_v4();
        let (grades, _) = scope_clause(Visibility::Teacher(teacher), ScopeTarget::Grades, 2);
        assert!(grades.contains("g.subject_id IN"));
        assert!(grades.contains("ts.teacher_id = $2"));

        let (attendance, _) =
            scope_clause(Visibility::Teacher(teacher), ScopeTarget::Attendance, 3);
        assert!(attendance.contains("a.student_id IN"));
        assert!(attendance.contains("ts.teacher_id = $3"));
    }

    fn csv_row(period: &str, study_level: Option<&str>, month1: Option<f64>) -> GradeCsvRow {
        GradeCsvRow {
            full_name: "Amina Haddad".to_string(),
            email: "amina.haddad@school.example".to_string(),
            study_level: study_level.map(str::to_string),
            subject: "Mathematics".to_string(),
            academic_year: "2025-2026".to_string(),
            period: period.to_string(),
            month1,
            month2: None,
            month3: None,
            exam: Some(30.0),
        }
    }

    #[test]
    fn import_accepts_well_formed_row() {
        let row = check_import_row(csv_row("first", Some("FIRST_YEAR"), Some(40.0)), None).unwrap();
        assert_eq!(row.period, Period::First);
        assert_eq!(row.study_level, Some(StudyLevel::FirstYear));
        assert_eq!(row.months, [Some(40.0), None, None]);

        let row = check_import_row(csv_row("THIRD", Some(" "), None), None).unwrap();
        assert_eq!(row.study_level, None);
    }

    #[test]
    fn import_rejects_bad_keys_before_any_write() {
        assert!(check_import_row(csv_row("FOURTH", Some("FIRST_YEAR"), None), None).is_err());
        assert!(check_import_row(csv_row("FIRST", Some("FIFTH_YEAR"), None), None).is_err());

        let mut row = csv_row("FIRST", None, None);
        row.email = "  ".to_string();
        assert!(check_import_row(row, None).is_err());
    }

    #[test]
    fn import_checks_scores_against_subject_limits() {
        let strict = SubjectLimits {
            max_monthly: 20.0,
            max_exam: 60.0,
        };
        assert!(check_import_row(csv_row("FIRST", None, Some(40.0)), Some(strict)).is_err());
        assert!(check_import_row(csv_row("FIRST", None, Some(20.0)), Some(strict)).is_ok());
        assert!(check_import_row(csv_row("FIRST", None, Some(51.0)), None).is_err());
    }

    #[test]
    fn parent_scope_goes_through_links() {
        let (clause, _) = scope_clause(Visibility::Parent(Uuid::new_v4()), ScopeTarget::Grades, 2);
        assert!(clause.contains("school_stats.parent_links"));
        assert!(clause.contains("g.student_id IN"));
    }
}
