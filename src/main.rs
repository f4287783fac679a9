use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod attendance;
mod cohort;
mod config;
mod db;
mod models;
mod report;
mod scores;
mod stats;

use crate::config::Config;
use crate::db::PgGradeRepository;
use crate::models::{AttendanceMark, GradeSubmission, Period, Visibility};

#[derive(Parser)]
#[command(name = "school-stats")]
#[command(about = "Grade and attendance statistics for a school", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Whose data the caller may see. No flag means administrator.
#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
struct ScopeArgs {
    /// Restrict to subjects taught by this teacher
    #[arg(long)]
    teacher: Option<Uuid>,
    /// Restrict to this student
    #[arg(long)]
    student: Option<Uuid>,
    /// Restrict to the children linked to this parent
    #[arg(long)]
    parent: Option<Uuid>,
}

impl ScopeArgs {
    fn visibility(&self) -> Visibility {
        Visibility::from_scope(self.teacher, self.student, self.parent)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import grades from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record or replace a student's scores for one subject and period
    SubmitGrade {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        subject: Uuid,
        #[arg(long)]
        academic_year: String,
        #[arg(long)]
        period: Period,
        #[arg(long)]
        month1: Option<f64>,
        #[arg(long)]
        month2: Option<f64>,
        #[arg(long)]
        month3: Option<f64>,
        #[arg(long)]
        exam: Option<f64>,
    },
    /// Replace attendance for one session on one day
    MarkAttendance {
        #[arg(long)]
        session: String,
        #[arg(long)]
        date: NaiveDate,
        /// Students present (repeatable)
        #[arg(long = "present")]
        present: Vec<Uuid>,
        /// Students absent (repeatable)
        #[arg(long = "absent")]
        absent: Vec<Uuid>,
    },
    /// Success rates per study level and period
    AcademicStats {
        #[arg(long)]
        academic_year: String,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Attendance for a day, its trend, and the preceding days
    AttendanceStats {
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 7)]
        days: i64,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Per-subject results for one student
    Results {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        academic_year: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        academic_year: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 7)]
        days: i64,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Delete every grade for an academic year
    ResetGrades {
        #[arg(long)]
        academic_year: String,
        /// Required; the reset cannot be undone
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn init_logging(config: &Config) {
    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.log_filter))
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn series_start(day: NaiveDate, days: i64) -> NaiveDate {
    day - Duration::days(days.max(1) - 1)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_logging(&config);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let repo = PgGradeRepository::new(pool);

    match cli.command {
        Commands::InitDb => {
            db::init_db(repo.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(repo.pool()).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let summary = db::import_grades_csv(repo.pool(), &csv).await?;
            println!(
                "Imported {} grades from {} ({} rejected).",
                summary.imported,
                csv.display(),
                summary.rejected
            );
        }
        Commands::SubmitGrade {
            student,
            subject,
            academic_year,
            period,
            month1,
            month2,
            month3,
            exam,
        } => {
            let record = db::upsert_grade(
                repo.pool(),
                &GradeSubmission {
                    student_id: student,
                    subject_id: subject,
                    academic_year,
                    period,
                    month1,
                    month2,
                    month3,
                    exam,
                },
            )
            .await?;
            println!(
                "Saved {} period: work total {:.2}, period total {:.2} ({}).",
                record.period.label(),
                record.work_total,
                record.period_total,
                if scores::passed(record.period_total) {
                    "passed"
                } else {
                    "failed"
                }
            );
        }
        Commands::MarkAttendance {
            session,
            date,
            present,
            absent,
        } => {
            let marks: Vec<AttendanceMark> = present
                .into_iter()
                .map(|student_id| AttendanceMark {
                    student_id,
                    present: true,
                })
                .chain(absent.into_iter().map(|student_id| AttendanceMark {
                    student_id,
                    present: false,
                }))
                .collect();
            let saved = db::replace_attendance(repo.pool(), &session, date, &marks).await?;
            println!("Recorded {saved} marks for {session} on {date}.");
        }
        Commands::AcademicStats {
            academic_year,
            scope,
            json,
        } => {
            let cohorts = stats::academic_stats(&repo, &academic_year, scope.visibility()).await?;
            if json {
                return print_json(&cohorts);
            }

            if cohorts.summary.total_grades == 0 {
                println!("No grades found for {academic_year}.");
                return Ok(());
            }

            println!("Success rate by study level and period:");
            for cell in &cohorts.grid {
                println!(
                    "- {} / {}: {}% ({} of {})",
                    cell.study_level, cell.period, cell.success_rate_percent, cell.passed, cell.total
                );
            }
            println!(
                "{} students, {} grades, {}% overall.",
                cohorts.summary.total_students,
                cohorts.summary.total_grades,
                cohorts.summary.overall_success_rate_percent
            );
        }
        Commands::AttendanceStats {
            date,
            days,
            scope,
            json,
        } => {
            let day = date.unwrap_or_else(|| Utc::now().date_naive());
            let visibility = scope.visibility();
            let overview = stats::attendance_stats(&repo, day, visibility).await?;
            let series =
                stats::attendance_series(&repo, series_start(day, days), day, visibility).await?;

            if json {
                return print_json(&serde_json::json!({
                    "today": overview,
                    "daily": series,
                }));
            }

            if overview.stats.total_students == 0 {
                println!("No attendance recorded on {day}.");
            } else {
                println!(
                    "{day}: {} present, {} absent, {:.1}% attendance ({}).",
                    overview.stats.present,
                    overview.stats.absent,
                    overview.stats.attendance_rate,
                    overview.trend.as_str()
                );
                for session in &overview.sessions {
                    println!(
                        "  {}: {:.1}% ({}/{})",
                        session.session,
                        session.stats.attendance_rate,
                        session.stats.present,
                        session.stats.total_students
                    );
                }
            }
            for entry in &series {
                println!("- {}: {:.1}%", entry.date, entry.stats.attendance_rate);
            }
        }
        Commands::Results {
            student,
            academic_year,
            json,
        } => {
            let sheet = stats::student_results(&repo, student, &academic_year).await?;
            if json {
                return print_json(&sheet);
            }

            if sheet.subjects.is_empty() {
                println!("No results for {student} in {academic_year}.");
                return Ok(());
            }

            for result in &sheet.subjects {
                println!(
                    "- {} ({}): work {:.2}, total {:.2} {}",
                    result.subject,
                    result.period,
                    result.work_total,
                    result.period_total,
                    if result.passed { "passed" } else { "failed" }
                );
            }
            println!("{} passed, {} failed.", sheet.passed, sheet.failed);
        }
        Commands::Report {
            academic_year,
            date,
            days,
            scope,
            out,
        } => {
            let day = date.unwrap_or_else(|| Utc::now().date_naive());
            let visibility = scope.visibility();
            let cohorts = stats::academic_stats(&repo, &academic_year, visibility).await?;
            let overview = stats::attendance_stats(&repo, day, visibility).await?;
            let series =
                stats::attendance_series(&repo, series_start(day, days), day, visibility).await?;

            let report = report::build_report(
                &visibility.label(),
                &academic_year,
                &cohorts,
                &overview,
                &series,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(path = %out.display(), "report written");
            println!("Report written to {}.", out.display());
        }
        Commands::ResetGrades {
            academic_year,
            confirm,
        } => {
            if !confirm {
                anyhow::bail!("refusing to reset grades for {academic_year} without --confirm");
            }
            let removed = db::reset_grades(repo.pool(), &academic_year).await?;
            println!("Removed {removed} grades for {academic_year}.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scope_flags_are_mutually_exclusive() {
        let id = Uuid::new_v4().to_string();
        let result = Cli::try_parse_from([
            "school-stats",
            "academic-stats",
            "--academic-year",
            "2025-2026",
            "--teacher",
            id.as_str(),
            "--student",
            id.as_str(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn period_flag_parses_case_insensitively() {
        let student = Uuid::new_v4().to_string();
        let subject = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "school-stats",
            "submit-grade",
            "--student",
            student.as_str(),
            "--subject",
            subject.as_str(),
            "--academic-year",
            "2025-2026",
            "--period",
            "second",
            "--exam",
            "42.5",
        ])
        .unwrap();
        match cli.command {
            Commands::SubmitGrade { period, exam, month1, .. } => {
                assert_eq!(period, Period::Second);
                assert_eq!(exam, Some(42.5));
                assert_eq!(month1, None);
            }
            _ => panic!("expected submit-grade"),
        }
    }

    #[test]
    fn series_covers_requested_days() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(series_start(day, 7), NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());
        assert_eq!(series_start(day, 0), day);
    }
}
