use std::fmt::Write;

use crate::attendance::DailyAttendance;
use crate::cohort::CohortStats;
use crate::models::{Period, StudyLevel};
use crate::stats::AttendanceOverview;

fn level_label(level: StudyLevel) -> &'static str {
    match level {
        StudyLevel::FirstYear => "First year",
        StudyLevel::SecondYear => "Second year",
        StudyLevel::ThirdYear => "Third year",
        StudyLevel::Graduation => "Graduation",
    }
}

pub fn build_report(
    scope: &str,
    academic_year: &str,
    cohorts: &CohortStats,
    attendance: &AttendanceOverview,
    series: &[DailyAttendance],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# School Statistics Report");
    let _ = writeln!(
        output,
        "Generated for {} (academic year {}, attendance on {})",
        scope, academic_year, attendance.date
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Success Rate by Cohort");

    if cohorts.summary.total_grades == 0 {
        let _ = writeln!(output, "No grades recorded for this academic year.");
    } else {
        let _ = writeln!(output, "| Level | First | Second | Third |");
        let _ = writeln!(output, "|---|---|---|---|");
        for level in StudyLevel::GRID {
            let mut line = format!("| {} |", level_label(level));
            for period in Period::ALL {
                match cohorts.cell(level, period) {
                    Some(cell) if cell.total > 0 => {
                        let _ = write!(
                            line,
                            " {}% ({}/{}) |",
                            cell.success_rate_percent, cell.passed, cell.total
                        );
                    }
                    _ => line.push_str(" - |"),
                }
            }
            let _ = writeln!(output, "{line}");
        }
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "{} students, {} grades, {}% overall success rate.",
            cohorts.summary.total_students,
            cohorts.summary.total_grades,
            cohorts.summary.overall_success_rate_percent
        );
        if cohorts.skipped > 0 {
            let _ = writeln!(
                output,
                "{} grades were left out for lacking a study level or period.",
                cohorts.skipped
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohorts Needing Attention");
    let weakest = cohorts.weakest_cells(3);
    if weakest.is_empty() {
        let _ = writeln!(output, "No cohorts with grades in this academic year.");
    } else {
        for cell in weakest {
            let _ = writeln!(
                output,
                "- {}, {} period: {}% success across {} grades",
                level_label(cell.study_level),
                cell.period.label(),
                cell.success_rate_percent,
                cell.total
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance");

    if attendance.stats.total_students == 0 {
        let _ = writeln!(output, "No attendance recorded on {}.", attendance.date);
    } else {
        let _ = writeln!(
            output,
            "- {} present, {} absent ({:.1}% attendance, trend {} vs {:.1}% the day before)",
            attendance.stats.present,
            attendance.stats.absent,
            attendance.stats.attendance_rate,
            attendance.trend.as_str(),
            attendance.previous.attendance_rate
        );
        for session in &attendance.sessions {
            let _ = writeln!(
                output,
                "  - {}: {:.1}% ({}/{})",
                session.session,
                session.stats.attendance_rate,
                session.stats.present,
                session.stats.total_students
            );
        }
    }

    if !series.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Daily Attendance");
        for day in series {
            let _ = writeln!(
                output,
                "- {}: {:.1}% ({}/{})",
                day.date, day.stats.attendance_rate, day.stats.present, day.stats.total_students
            );
        }
    }

    output
}
