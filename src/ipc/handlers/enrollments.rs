use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_str, require_row, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::resolve::EnrollmentStatus;
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn enrollments_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = optional_str(params, "studentId");
    let section_id = optional_str(params, "sectionId");
    let (filter_sql, filter_value) = match (&student_id, &section_id) {
        (Some(sid), _) => ("WHERE e.student_id = ?", sid.clone()),
        (None, Some(sec)) => ("WHERE e.section_id = ?", sec.clone()),
        (None, None) => {
            return Err(HandlerErr::field(
                "studentId",
                "pass studentId or sectionId",
            ))
        }
    };
    let sql = format!(
        "SELECT
           e.id, e.student_id, st.last_name, st.first_name, e.section_id, s.code,
           e.program_id, e.semester_id, e.academic_year_id, e.year_level,
           e.status, e.enrolled_at
         FROM section_enrollments e
         JOIN students st ON st.id = e.student_id
         JOIN sections s ON s.id = e.section_id
         {}
         ORDER BY st.last_name, st.first_name, s.code",
        filter_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&filter_value], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": format!("{}, {}", last, first),
                "sectionId": r.get::<_, String>(4)?,
                "sectionCode": r.get::<_, String>(5)?,
                "programId": r.get::<_, String>(6)?,
                "semesterId": r.get::<_, String>(7)?,
                "academicYearId": r.get::<_, String>(8)?,
                "yearLevel": r.get::<_, i64>(9)?,
                "status": r.get::<_, String>(10)?,
                "enrolledAt": r.get::<_, Option<String>>(11)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "enrollments": rows }))
}

fn enrollments_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let section_id = required_str(params, "sectionId")?;
    let semester_id = required_str(params, "semesterId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let year_level = required_i64(params, "yearLevel")?;

    require_row(conn, "students", &student_id, "student")?;
    require_row(conn, "semesters", &semester_id, "semester")?;
    require_row(conn, "academic_years", &academic_year_id, "academic year")?;

    let program_id: Option<String> = conn
        .query_row("SELECT program_id FROM sections WHERE id = ?", [&section_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(program_id) = program_id else {
        return Err(HandlerErr::new("not_found", "section not found"));
    };

    // One active enrollment per (student, program, semester, academic year).
    // The existence check and the insert share one transaction.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let duplicate = tx
        .query_row(
            "SELECT 1 FROM section_enrollments
             WHERE student_id = ? AND program_id = ? AND semester_id = ?
               AND academic_year_id = ? AND status = 'active'",
            (&student_id, &program_id, &semester_id, &academic_year_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if duplicate {
        let _ = tx.rollback();
        return Err(HandlerErr::new(
            "conflict",
            "student already has an active enrollment in this program for the term",
        ));
    }
    let id = Uuid::new_v4().to_string();
    let enrolled_at = Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S").to_string();
    tx.execute(
        "INSERT INTO section_enrollments(
           id, student_id, section_id, program_id, semester_id,
           academic_year_id, year_level, status, enrolled_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'active', ?)",
        (
            &id,
            &student_id,
            &section_id,
            &program_id,
            &semester_id,
            &academic_year_id,
            year_level,
            &enrolled_at,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "enrollmentId": id }))
}

fn enrollments_update_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "enrollmentId")?;
    let status_raw = required_str(params, "status")?;
    let Some(status) = EnrollmentStatus::parse(&status_raw) else {
        return Err(HandlerErr::field(
            "status",
            "status must be active, dropped or completed",
        ));
    };
    require_row(conn, "section_enrollments", &id, "enrollment")?;

    // Clash check and status write share one transaction, same as create.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if status == EnrollmentStatus::Active {
        // Re-activation must respect the same one-active-per-cohort rule.
        let clash = tx
            .query_row(
                "SELECT 1 FROM section_enrollments other
                 WHERE other.id != ?1 AND other.status = 'active'
                   AND other.student_id = (SELECT student_id FROM section_enrollments WHERE id = ?1)
                   AND other.program_id = (SELECT program_id FROM section_enrollments WHERE id = ?1)
                   AND other.semester_id = (SELECT semester_id FROM section_enrollments WHERE id = ?1)
                   AND other.academic_year_id =
                       (SELECT academic_year_id FROM section_enrollments WHERE id = ?1)",
                [&id],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(HandlerErr::db)?
            .is_some();
        if clash {
            let _ = tx.rollback();
            return Err(HandlerErr::new(
                "conflict",
                "another active enrollment exists for this cohort",
            ));
        }
    }

    tx.execute(
        "UPDATE section_enrollments SET status = ? WHERE id = ?",
        (status.as_str(), &id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn enrollments_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "enrollmentId")?;
    let n = conn
        .execute("DELETE FROM section_enrollments WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "enrollment not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    let known = matches!(
        method,
        "enrollments.list"
            | "enrollments.create"
            | "enrollments.updateStatus"
            | "enrollments.delete"
    );
    if !known {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match method {
        "enrollments.list" => enrollments_list(conn, &req.params),
        "enrollments.create" => enrollments_create(conn, &req.params),
        "enrollments.updateStatus" => enrollments_update_status(conn, &req.params),
        "enrollments.delete" => enrollments_delete(conn, &req.params),
        _ => unreachable!(),
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
