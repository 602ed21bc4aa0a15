use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_bool, optional_f64, optional_i64, require_row, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn course_assignments_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;
    let mut stmt = conn
        .prepare(
            "SELECT
               ca.id, ca.course_id, ca.program_id, p.code, ca.academic_year_id, y.name,
               ca.semester_id, sm.name, ca.year_level, ca.is_mandatory, ca.max_students
             FROM course_assignments ca
             JOIN programs p ON p.id = ca.program_id
             JOIN academic_years y ON y.id = ca.academic_year_id
             JOIN semesters sm ON sm.id = ca.semester_id
             WHERE ca.course_id = ?
             ORDER BY y.name, sm.name, p.code",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "courseId": r.get::<_, String>(1)?,
                "programId": r.get::<_, String>(2)?,
                "programCode": r.get::<_, String>(3)?,
                "academicYearId": r.get::<_, String>(4)?,
                "academicYearName": r.get::<_, String>(5)?,
                "semesterId": r.get::<_, String>(6)?,
                "semesterName": r.get::<_, String>(7)?,
                "yearLevel": r.get::<_, Option<i64>>(8)?,
                "isMandatory": r.get::<_, i64>(9)? != 0,
                "maxStudents": r.get::<_, Option<i64>>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "assignments": rows }))
}

fn course_assignments_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let program_id = required_str(params, "programId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let semester_id = required_str(params, "semesterId")?;
    let year_level = optional_i64(params, "yearLevel")?;
    let is_mandatory = optional_bool(params, "isMandatory")?.unwrap_or(true);
    let max_students = optional_i64(params, "maxStudents")?;

    require_row(conn, "courses", &course_id, "course")?;
    require_row(conn, "programs", &program_id, "program")?;
    require_row(conn, "academic_years", &academic_year_id, "academic year")?;
    require_row(conn, "semesters", &semester_id, "semester")?;

    let duplicate = conn
        .query_row(
            "SELECT 1 FROM course_assignments
             WHERE course_id = ? AND program_id = ? AND academic_year_id = ? AND semester_id = ?",
            (&course_id, &program_id, &academic_year_id, &semester_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if duplicate {
        return Err(HandlerErr::new(
            "conflict",
            "course is already assigned to this program for the term",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO course_assignments(
           id, course_id, program_id, academic_year_id, semester_id,
           year_level, is_mandatory, max_students)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &course_id,
            &program_id,
            &academic_year_id,
            &semester_id,
            &year_level,
            is_mandatory as i64,
            &max_students,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "assignmentId": id }))
}

// Identity fields (course/program/term) are immutable; only scheduling
// fields may change.
fn course_assignments_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "assignmentId")?;
    require_row(conn, "course_assignments", &id, "course assignment")?;
    if params.get("yearLevel").is_some() {
        let year_level = optional_i64(params, "yearLevel")?;
        conn.execute(
            "UPDATE course_assignments SET year_level = ? WHERE id = ?",
            (&year_level, &id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(is_mandatory) = optional_bool(params, "isMandatory")? {
        conn.execute(
            "UPDATE course_assignments SET is_mandatory = ? WHERE id = ?",
            (is_mandatory as i64, &id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if params.get("maxStudents").is_some() {
        let max_students = optional_i64(params, "maxStudents")?;
        conn.execute(
            "UPDATE course_assignments SET max_students = ? WHERE id = ?",
            (&max_students, &id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    Ok(json!({ "ok": true }))
}

// Dependent enrollments are cohort rows, not assignment rows; nothing else
// is cleaned up here.
fn course_assignments_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "assignmentId")?;
    let n = conn
        .execute("DELETE FROM course_assignments WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "course assignment not found"));
    }
    Ok(json!({ "ok": true }))
}

fn lecturer_assignments_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = required_str(params, "lecturerId")?;
    require_row(conn, "lecturers", &lecturer_id, "lecturer")?;
    let mut stmt = conn
        .prepare(
            "SELECT
               la.id, la.course_id, c.code, c.title, la.section_id, s.code,
               la.program_id, la.semester_id, la.academic_year_id,
               la.is_primary, la.teaching_hours_per_week
             FROM lecturer_assignments la
             JOIN courses c ON c.id = la.course_id
             JOIN sections s ON s.id = la.section_id
             WHERE la.lecturer_id = ?
             ORDER BY c.code, s.code",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&lecturer_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "courseId": r.get::<_, String>(1)?,
                "courseCode": r.get::<_, String>(2)?,
                "courseTitle": r.get::<_, String>(3)?,
                "sectionId": r.get::<_, String>(4)?,
                "sectionCode": r.get::<_, String>(5)?,
                "programId": r.get::<_, String>(6)?,
                "semesterId": r.get::<_, String>(7)?,
                "academicYearId": r.get::<_, String>(8)?,
                "isPrimary": r.get::<_, i64>(9)? != 0,
                "teachingHoursPerWeek": r.get::<_, Option<f64>>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "assignments": rows }))
}

fn lecturer_assignments_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = required_str(params, "lecturerId")?;
    let course_id = required_str(params, "courseId")?;
    let section_id = required_str(params, "sectionId")?;
    let semester_id = required_str(params, "semesterId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let is_primary = optional_bool(params, "isPrimary")?.unwrap_or(false);
    let hours = optional_f64(params, "teachingHoursPerWeek")?;

    require_row(conn, "lecturers", &lecturer_id, "lecturer")?;
    require_row(conn, "courses", &course_id, "course")?;
    require_row(conn, "semesters", &semester_id, "semester")?;
    require_row(conn, "academic_years", &academic_year_id, "academic year")?;

    // The section fixes the program; the course must be assigned to that
    // program for the same term, otherwise there is no delivery to teach.
    let program_id: Option<String> = conn
        .query_row("SELECT program_id FROM sections WHERE id = ?", [&section_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(program_id) = program_id else {
        return Err(HandlerErr::new("not_found", "section not found"));
    };
    let delivery_exists = conn
        .query_row(
            "SELECT 1 FROM course_assignments
             WHERE course_id = ? AND program_id = ? AND academic_year_id = ? AND semester_id = ?",
            (&course_id, &program_id, &academic_year_id, &semester_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if !delivery_exists {
        return Err(HandlerErr::new(
            "not_found",
            "course is not assigned to the section's program for this term",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lecturer_assignments(
           id, lecturer_id, course_id, section_id, program_id,
           semester_id, academic_year_id, is_primary, teaching_hours_per_week)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &lecturer_id,
            &course_id,
            &section_id,
            &program_id,
            &semester_id,
            &academic_year_id,
            is_primary as i64,
            &hours,
        ),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::new("conflict", "lecturer already assigned to this delivery")
        }
        other => HandlerErr::new("db_insert_failed", other.to_string()),
    })?;
    Ok(json!({ "assignmentId": id }))
}

fn lecturer_assignments_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "assignmentId")?;
    let n = conn
        .execute("DELETE FROM lecturer_assignments WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "lecturer assignment not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    let known = matches!(
        method,
        "courseAssignments.list"
            | "courseAssignments.create"
            | "courseAssignments.update"
            | "courseAssignments.delete"
            | "lecturerAssignments.list"
            | "lecturerAssignments.create"
            | "lecturerAssignments.delete"
    );
    if !known {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match method {
        "courseAssignments.list" => course_assignments_list(conn, &req.params),
        "courseAssignments.create" => course_assignments_create(conn, &req.params),
        "courseAssignments.update" => course_assignments_update(conn, &req.params),
        "courseAssignments.delete" => course_assignments_delete(conn, &req.params),
        "lecturerAssignments.list" => lecturer_assignments_list(conn, &req.params),
        "lecturerAssignments.create" => lecturer_assignments_create(conn, &req.params),
        "lecturerAssignments.delete" => lecturer_assignments_delete(conn, &req.params),
        _ => unreachable!(),
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
