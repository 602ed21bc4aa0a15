use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_i64, optional_str, require_row, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn programs_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               p.id,
               p.code,
               p.name,
               (SELECT COUNT(*) FROM sections s WHERE s.program_id = p.id) AS section_count
             FROM programs p
             ORDER BY p.code",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "sectionCount": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "programs": rows }))
}

fn programs_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = required_str(params, "code")?;
    let name = required_str(params, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO programs(id, code, name) VALUES(?, ?, ?)",
        (&id, &code, &name),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::field("code", "a program with this code already exists")
        }
        other => HandlerErr::new("db_insert_failed", other.to_string()),
    })?;
    Ok(json!({ "programId": id }))
}

fn programs_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "programId")?;
    require_row(conn, "programs", &id, "program")?;
    if let Some(code) = optional_str(params, "code") {
        conn.execute("UPDATE programs SET code = ? WHERE id = ?", (&code, &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(name) = optional_str(params, "name") {
        conn.execute("UPDATE programs SET name = ? WHERE id = ?", (&name, &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    Ok(json!({ "ok": true }))
}

// Structural entities refuse deletion while anything still points at them;
// only courses and students get an explicit cascade.
fn refuse_if_referenced(
    conn: &Connection,
    checks: &[(&'static str, &'static str)],
    id: &str,
) -> Result<(), HandlerErr> {
    for (what, sql) in checks {
        let referenced = conn
            .query_row(sql, [id], |r| r.get::<_, i64>(0))
            .map_err(HandlerErr::db)?
            > 0;
        if referenced {
            return Err(HandlerErr::new(
                "conflict",
                format!("cannot delete: {} still reference this record", what),
            ));
        }
    }
    Ok(())
}

fn programs_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "programId")?;
    require_row(conn, "programs", &id, "program")?;
    refuse_if_referenced(
        conn,
        &[
            ("sections", "SELECT COUNT(*) FROM sections WHERE program_id = ?"),
            (
                "course assignments",
                "SELECT COUNT(*) FROM course_assignments WHERE program_id = ?",
            ),
            (
                "enrollments",
                "SELECT COUNT(*) FROM section_enrollments WHERE program_id = ?",
            ),
        ],
        &id,
    )?;
    conn.execute("DELETE FROM programs WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn academic_years_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM academic_years ORDER BY name")
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({ "id": r.get::<_, String>(0)?, "name": r.get::<_, String>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "academicYears": rows }))
}

fn academic_years_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO academic_years(id, name) VALUES(?, ?)", (&id, &name))
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                HandlerErr::field("name", "an academic year with this name already exists")
            }
            other => HandlerErr::new("db_insert_failed", other.to_string()),
        })?;
    Ok(json!({ "academicYearId": id }))
}

fn academic_years_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "academicYearId")?;
    let name = required_str(params, "name")?;
    require_row(conn, "academic_years", &id, "academic year")?;
    conn.execute("UPDATE academic_years SET name = ? WHERE id = ?", (&name, &id))
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                HandlerErr::field("name", "an academic year with this name already exists")
            }
            other => HandlerErr::new("db_update_failed", other.to_string()),
        })?;
    Ok(json!({ "ok": true }))
}

fn academic_years_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "academicYearId")?;
    require_row(conn, "academic_years", &id, "academic year")?;
    refuse_if_referenced(
        conn,
        &[
            ("semesters", "SELECT COUNT(*) FROM semesters WHERE academic_year_id = ?"),
            (
                "course assignments",
                "SELECT COUNT(*) FROM course_assignments WHERE academic_year_id = ?",
            ),
            (
                "enrollments",
                "SELECT COUNT(*) FROM section_enrollments WHERE academic_year_id = ?",
            ),
        ],
        &id,
    )?;
    conn.execute("DELETE FROM academic_years WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn semesters_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = optional_str(params, "academicYearId");
    let mut rows: Vec<serde_json::Value> = Vec::new();
    let mut push_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
        rows.push(json!({
            "id": r.get::<_, String>(0)?,
            "academicYearId": r.get::<_, String>(1)?,
            "name": r.get::<_, String>(2)?,
        }));
        Ok(())
    };
    if let Some(year_id) = year_id {
        let mut stmt = conn
            .prepare(
                "SELECT id, academic_year_id, name FROM semesters
                 WHERE academic_year_id = ? ORDER BY name",
            )
            .map_err(HandlerErr::db)?;
        let mut q = stmt.query([&year_id]).map_err(HandlerErr::db)?;
        while let Some(r) = q.next().map_err(HandlerErr::db)? {
            push_row(r).map_err(HandlerErr::db)?;
        }
    } else {
        let mut stmt = conn
            .prepare("SELECT id, academic_year_id, name FROM semesters ORDER BY name")
            .map_err(HandlerErr::db)?;
        let mut q = stmt.query([]).map_err(HandlerErr::db)?;
        while let Some(r) = q.next().map_err(HandlerErr::db)? {
            push_row(r).map_err(HandlerErr::db)?;
        }
    }
    Ok(json!({ "semesters": rows }))
}

fn semesters_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = required_str(params, "academicYearId")?;
    let name = required_str(params, "name")?;
    require_row(conn, "academic_years", &year_id, "academic year")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO semesters(id, academic_year_id, name) VALUES(?, ?, ?)",
        (&id, &year_id, &name),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::field("name", "a semester with this name already exists in the year")
        }
        other => HandlerErr::new("db_insert_failed", other.to_string()),
    })?;
    Ok(json!({ "semesterId": id }))
}

fn semesters_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "semesterId")?;
    let name = required_str(params, "name")?;
    require_row(conn, "semesters", &id, "semester")?;
    conn.execute("UPDATE semesters SET name = ? WHERE id = ?", (&name, &id))
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                HandlerErr::field("name", "a semester with this name already exists in the year")
            }
            other => HandlerErr::new("db_update_failed", other.to_string()),
        })?;
    Ok(json!({ "ok": true }))
}

fn semesters_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "semesterId")?;
    require_row(conn, "semesters", &id, "semester")?;
    refuse_if_referenced(
        conn,
        &[
            (
                "course assignments",
                "SELECT COUNT(*) FROM course_assignments WHERE semester_id = ?",
            ),
            (
                "enrollments",
                "SELECT COUNT(*) FROM section_enrollments WHERE semester_id = ?",
            ),
            (
                "lecturer assignments",
                "SELECT COUNT(*) FROM lecturer_assignments WHERE semester_id = ?",
            ),
        ],
        &id,
    )?;
    conn.execute("DELETE FROM semesters WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn students_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, student_no, active
             FROM students
             ORDER BY last_name, first_name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "lastName": last,
                "firstName": first,
                "studentNo": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "students": rows }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last = required_str(params, "lastName")?;
    let first = required_str(params, "firstName")?;
    let student_no = optional_str(params, "studentNo");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, last_name, first_name, student_no, active)
         VALUES(?, ?, ?, ?, 1)",
        (&id, &last, &first, &student_no),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "studentId": id }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "studentId")?;
    require_row(conn, "students", &id, "student")?;
    if let Some(last) = optional_str(params, "lastName") {
        conn.execute("UPDATE students SET last_name = ? WHERE id = ?", (&last, &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(first) = optional_str(params, "firstName") {
        conn.execute("UPDATE students SET first_name = ? WHERE id = ?", (&first, &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(active) = params.get("active").and_then(|v| v.as_bool()) {
        conn.execute(
            "UPDATE students SET active = ? WHERE id = ?",
            (active as i64, &id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "studentId")?;
    require_row(conn, "students", &id, "student")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let steps = [
        "DELETE FROM attendance_records WHERE student_id = ?",
        "DELETE FROM student_grades WHERE student_id = ?",
        "DELETE FROM section_enrollments WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_delete_failed", e.to_string()));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn lecturers_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, email
             FROM lecturers
             ORDER BY last_name, first_name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "email": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "lecturers": rows }))
}

fn lecturers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last = required_str(params, "lastName")?;
    let first = required_str(params, "firstName")?;
    let email = optional_str(params, "email");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lecturers(id, last_name, first_name, email) VALUES(?, ?, ?, ?)",
        (&id, &last, &first, &email),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "lecturerId": id }))
}

fn lecturers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "lecturerId")?;
    require_row(conn, "lecturers", &id, "lecturer")?;
    if let Some(last) = optional_str(params, "lastName") {
        conn.execute("UPDATE lecturers SET last_name = ? WHERE id = ?", (&last, &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(first) = optional_str(params, "firstName") {
        conn.execute("UPDATE lecturers SET first_name = ? WHERE id = ?", (&first, &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if params.get("email").is_some() {
        let email = optional_str(params, "email");
        conn.execute("UPDATE lecturers SET email = ? WHERE id = ?", (&email, &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    Ok(json!({ "ok": true }))
}

fn lecturers_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "lecturerId")?;
    require_row(conn, "lecturers", &id, "lecturer")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Err(e) = tx.execute("DELETE FROM lecturer_assignments WHERE lecturer_id = ?", [&id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_delete_failed", e.to_string()));
    }
    if let Err(e) = tx.execute("DELETE FROM lecturers WHERE id = ?", [&id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_delete_failed", e.to_string()));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn courses_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Include basic counts so the UI can show a useful dashboard.
    // Use correlated subqueries to avoid double-counting from joins.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.code,
               c.title,
               c.credit_hours,
               (SELECT COUNT(*) FROM course_assignments ca WHERE ca.course_id = c.id) AS assignment_count,
               (SELECT COUNT(*) FROM grade_categories gc WHERE gc.course_id = c.id) AS category_count
             FROM courses c
             ORDER BY c.code",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "creditHours": r.get::<_, Option<i64>>(3)?,
                "assignmentCount": r.get::<_, i64>(4)?,
                "categoryCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "courses": rows }))
}

fn courses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = required_str(params, "code")?;
    let title = required_str(params, "title")?;
    let credit_hours = optional_i64(params, "creditHours")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, code, title, credit_hours) VALUES(?, ?, ?, ?)",
        (&id, &code, &title, &credit_hours),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::field("code", "a course with this code already exists")
        }
        other => HandlerErr::new("db_insert_failed", other.to_string()),
    })?;
    Ok(json!({ "courseId": id }))
}

fn courses_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "courseId")?;
    require_row(conn, "courses", &id, "course")?;
    if let Some(title) = optional_str(params, "title") {
        conn.execute("UPDATE courses SET title = ? WHERE id = ?", (&title, &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(hours) = optional_i64(params, "creditHours")? {
        conn.execute(
            "UPDATE courses SET credit_hours = ? WHERE id = ?",
            (hours, &id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    Ok(json!({ "ok": true }))
}

fn courses_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "courseId")?;
    require_row(conn, "courses", &id, "course")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    // Section enrollments are cohort-scoped, not course-scoped, and stay.
    let steps: &[(&str, &str)] = &[
        (
            "attendance_records",
            "DELETE FROM attendance_records WHERE session_id IN (
               SELECT id FROM attendance_sessions WHERE course_id = ?1)",
        ),
        (
            "attendance_sessions",
            "DELETE FROM attendance_sessions WHERE course_id = ?1",
        ),
        ("student_grades", "DELETE FROM student_grades WHERE course_id = ?1"),
        ("grade_categories", "DELETE FROM grade_categories WHERE course_id = ?1"),
        (
            "lecturer_assignments",
            "DELETE FROM lecturer_assignments WHERE course_id = ?1",
        ),
        (
            "course_assignments",
            "DELETE FROM course_assignments WHERE course_id = ?1",
        ),
        ("courses", "DELETE FROM courses WHERE id = ?1"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&id]) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn sections_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let program_id = optional_str(params, "programId");
    let mut rows: Vec<serde_json::Value> = Vec::new();
    let mut push_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
        rows.push(json!({
            "id": r.get::<_, String>(0)?,
            "programId": r.get::<_, String>(1)?,
            "code": r.get::<_, String>(2)?,
            "yearLevel": r.get::<_, Option<i64>>(3)?,
            "enrolledCount": r.get::<_, i64>(4)?,
        }));
        Ok(())
    };
    let base = "SELECT
           s.id, s.program_id, s.code, s.year_level,
           (SELECT COUNT(*) FROM section_enrollments e
            WHERE e.section_id = s.id AND e.status = 'active') AS enrolled_count
         FROM sections s";
    if let Some(program_id) = program_id {
        let sql = format!("{} WHERE s.program_id = ? ORDER BY s.code", base);
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
        let mut q = stmt.query([&program_id]).map_err(HandlerErr::db)?;
        while let Some(r) = q.next().map_err(HandlerErr::db)? {
            push_row(r).map_err(HandlerErr::db)?;
        }
    } else {
        let sql = format!("{} ORDER BY s.code", base);
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
        let mut q = stmt.query([]).map_err(HandlerErr::db)?;
        while let Some(r) = q.next().map_err(HandlerErr::db)? {
            push_row(r).map_err(HandlerErr::db)?;
        }
    }
    Ok(json!({ "sections": rows }))
}

fn sections_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let program_id = required_str(params, "programId")?;
    let code = required_str(params, "code")?;
    let year_level = optional_i64(params, "yearLevel")?;
    require_row(conn, "programs", &program_id, "program")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sections(id, program_id, code, year_level) VALUES(?, ?, ?, ?)",
        (&id, &program_id, &code, &year_level),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::field("code", "a section with this code already exists in the program")
        }
        other => HandlerErr::new("db_insert_failed", other.to_string()),
    })?;
    Ok(json!({ "sectionId": id }))
}

fn sections_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "sectionId")?;
    require_row(conn, "sections", &id, "section")?;
    if let Some(code) = optional_str(params, "code") {
        conn.execute("UPDATE sections SET code = ? WHERE id = ?", (&code, &id))
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    HandlerErr::field("code", "a section with this code already exists in the program")
                }
                other => HandlerErr::new("db_update_failed", other.to_string()),
            })?;
    }
    if params.get("yearLevel").is_some() {
        let year_level = optional_i64(params, "yearLevel")?;
        conn.execute(
            "UPDATE sections SET year_level = ? WHERE id = ?",
            (&year_level, &id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    Ok(json!({ "ok": true }))
}

fn sections_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "sectionId")?;
    require_row(conn, "sections", &id, "section")?;
    refuse_if_referenced(
        conn,
        &[
            (
                "enrollments",
                "SELECT COUNT(*) FROM section_enrollments WHERE section_id = ?",
            ),
            (
                "attendance sessions",
                "SELECT COUNT(*) FROM attendance_sessions WHERE section_id = ?",
            ),
            (
                "lecturer assignments",
                "SELECT COUNT(*) FROM lecturer_assignments WHERE section_id = ?",
            ),
        ],
        &id,
    )?;
    conn.execute("DELETE FROM sections WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    let known = matches!(
        method,
        "programs.list"
            | "programs.create"
            | "programs.update"
            | "programs.delete"
            | "academicYears.list"
            | "academicYears.create"
            | "academicYears.update"
            | "academicYears.delete"
            | "semesters.list"
            | "semesters.create"
            | "semesters.update"
            | "semesters.delete"
            | "students.list"
            | "students.create"
            | "students.update"
            | "students.delete"
            | "lecturers.list"
            | "lecturers.create"
            | "lecturers.update"
            | "lecturers.delete"
            | "courses.list"
            | "courses.create"
            | "courses.update"
            | "courses.delete"
            | "sections.list"
            | "sections.create"
            | "sections.update"
            | "sections.delete"
    );
    if !known {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match method {
        "programs.list" => programs_list(conn),
        "programs.create" => programs_create(conn, &req.params),
        "programs.update" => programs_update(conn, &req.params),
        "programs.delete" => programs_delete(conn, &req.params),
        "academicYears.list" => academic_years_list(conn),
        "academicYears.create" => academic_years_create(conn, &req.params),
        "academicYears.update" => academic_years_update(conn, &req.params),
        "academicYears.delete" => academic_years_delete(conn, &req.params),
        "semesters.list" => semesters_list(conn, &req.params),
        "semesters.create" => semesters_create(conn, &req.params),
        "semesters.update" => semesters_update(conn, &req.params),
        "semesters.delete" => semesters_delete(conn, &req.params),
        "students.list" => students_list(conn),
        "students.create" => students_create(conn, &req.params),
        "students.update" => students_update(conn, &req.params),
        "students.delete" => students_delete(conn, &req.params),
        "lecturers.list" => lecturers_list(conn),
        "lecturers.create" => lecturers_create(conn, &req.params),
        "lecturers.update" => lecturers_update(conn, &req.params),
        "lecturers.delete" => lecturers_delete(conn, &req.params),
        "courses.list" => courses_list(conn),
        "courses.create" => courses_create(conn, &req.params),
        "courses.update" => courses_update(conn, &req.params),
        "courses.delete" => courses_delete(conn, &req.params),
        "sections.list" => sections_list(conn, &req.params),
        "sections.create" => sections_create(conn, &req.params),
        "sections.update" => sections_update(conn, &req.params),
        "sections.delete" => sections_delete(conn, &req.params),
        _ => unreachable!(),
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
