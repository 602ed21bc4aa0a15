use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{require_row, required_str};
use crate::ipc::types::{AppState, Request};
use crate::resolve::{resolve_roster, AssignmentKey, EnrollmentRow, EnrollmentStatus};
use rusqlite::Connection;
use serde_json::json;

fn load_assignment_keys(
    conn: &Connection,
    course_id: &str,
) -> Result<Vec<AssignmentKey>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, program_id, semester_id, academic_year_id, year_level, is_mandatory
             FROM course_assignments
             WHERE course_id = ?
             ORDER BY rowid",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([course_id], |r| {
        Ok(AssignmentKey {
            assignment_id: r.get(0)?,
            program_id: r.get(1)?,
            semester_id: r.get(2)?,
            academic_year_id: r.get(3)?,
            year_level: r.get(4)?,
            is_mandatory: r.get::<_, i64>(5)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

/// Full enrollment snapshot; the resolver does the matching in memory.
fn load_enrollment_snapshot(conn: &Connection) -> Result<Vec<EnrollmentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               e.student_id, st.last_name, st.first_name, e.program_id,
               e.semester_id, e.academic_year_id, e.year_level, s.code, e.status
             FROM section_enrollments e
             JOIN students st ON st.id = e.student_id
             JOIN sections s ON s.id = e.section_id
             ORDER BY st.last_name, st.first_name",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([], |r| {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        let status_raw: String = r.get(8)?;
        Ok(EnrollmentRow {
            student_id: r.get(0)?,
            student_name: format!("{}, {}", last, first),
            program_id: r.get(3)?,
            semester_id: r.get(4)?,
            academic_year_id: r.get(5)?,
            year_level: r.get(6)?,
            section_code: r.get(7)?,
            // Unknown status strings are treated as inactive.
            status: EnrollmentStatus::parse(&status_raw).unwrap_or(EnrollmentStatus::Dropped),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

pub fn course_roster_rows(
    conn: &Connection,
    course_id: &str,
) -> Result<Vec<crate::resolve::ResolvedStudent>, HandlerErr> {
    let assignments = load_assignment_keys(conn, course_id)?;
    let enrollments = load_enrollment_snapshot(conn)?;
    Ok(resolve_roster(&assignments, &enrollments))
}

fn courses_roster(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;
    let students = course_roster_rows(conn, &course_id)?;
    Ok(json!({
        "courseId": course_id,
        "studentCount": students.len(),
        "students": students,
    }))
}

fn lecturers_roster(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = required_str(params, "lecturerId")?;
    require_row(conn, "lecturers", &lecturer_id, "lecturer")?;

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT la.course_id, c.code, c.title
             FROM lecturer_assignments la
             JOIN courses c ON c.id = la.course_id
             WHERE la.lecturer_id = ?
             ORDER BY c.code",
        )
        .map_err(HandlerErr::db)?;
    let courses: Vec<(String, String, String)> = stmt
        .query_map([&lecturer_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let enrollments = load_enrollment_snapshot(conn)?;
    let mut out: Vec<serde_json::Value> = Vec::new();
    for (course_id, code, title) in courses {
        let assignments = load_assignment_keys(conn, &course_id)?;
        let students = resolve_roster(&assignments, &enrollments);
        out.push(json!({
            "courseId": course_id,
            "courseCode": code,
            "courseTitle": title,
            "studentCount": students.len(),
            "students": students,
        }));
    }
    Ok(json!({ "lecturerId": lecturer_id, "courses": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    let known = matches!(method, "courses.roster" | "lecturers.roster");
    if !known {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match method {
        "courses.roster" => courses_roster(conn, &req.params),
        "lecturers.roster" => lecturers_roster(conn, &req.params),
        _ => unreachable!(),
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
