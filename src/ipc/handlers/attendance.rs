use crate::attendance::{
    attendance_rate, parse_session_window, session_status, RecordStatus, SessionStatus,
};
use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_bool, optional_str, require_row, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::{Local, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const LINK_SECRET_KEY: &str = "attendance.link_secret";

#[derive(Debug, Clone)]
struct SessionRow {
    id: String,
    course_id: String,
    section_id: String,
    session_date: String,
    start_time: String,
    end_time: String,
    link_token: Option<String>,
}

fn now_naive() -> NaiveDateTime {
    Local::now().naive_local()
}

fn derived_status(session: &SessionRow, now: NaiveDateTime) -> SessionStatus {
    match parse_session_window(&session.session_date, &session.start_time, &session.end_time) {
        Some((start, end)) => session_status(now, start, end),
        // Unparseable stored fields: treat as already over rather than open.
        None => SessionStatus::Completed,
    }
}

fn link_secret(conn: &Connection) -> Result<String, HandlerErr> {
    if let Some(secret) =
        db::settings_get(conn, LINK_SECRET_KEY).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
    {
        return Ok(secret);
    }
    let secret = Uuid::new_v4().to_string();
    db::settings_set(conn, LINK_SECRET_KEY, &secret)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(secret)
}

fn sign_link_token(secret: &str, session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(session_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn get_session(conn: &Connection, session_id: &str) -> Result<SessionRow, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, course_id, section_id, session_date, start_time, end_time, link_token
             FROM attendance_sessions WHERE id = ?",
            [session_id],
            |r| {
                Ok(SessionRow {
                    id: r.get(0)?,
                    course_id: r.get(1)?,
                    section_id: r.get(2)?,
                    session_date: r.get(3)?,
                    start_time: r.get(4)?,
                    end_time: r.get(5)?,
                    link_token: r.get(6)?,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;
    row.ok_or_else(|| HandlerErr::new("not_found", "session not found"))
}

fn session_json(session: &SessionRow, now: NaiveDateTime) -> serde_json::Value {
    json!({
        "id": session.id,
        "courseId": session.course_id,
        "sectionId": session.section_id,
        "date": session.session_date,
        "startTime": session.start_time,
        "endTime": session.end_time,
        "status": derived_status(session, now),
        "hasLink": session.link_token.is_some(),
    })
}

fn sessions_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, course_id, section_id, session_date, start_time, end_time, link_token
             FROM attendance_sessions
             WHERE course_id = ?
             ORDER BY session_date, start_time",
        )
        .map_err(HandlerErr::db)?;
    let sessions: Vec<SessionRow> = stmt
        .query_map([&course_id], |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                course_id: r.get(1)?,
                section_id: r.get(2)?,
                session_date: r.get(3)?,
                start_time: r.get(4)?,
                end_time: r.get(5)?,
                link_token: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    let now = now_naive();
    let rows: Vec<serde_json::Value> = sessions.iter().map(|s| session_json(s, now)).collect();
    Ok(json!({ "sessions": rows }))
}

fn sessions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let section_id = required_str(params, "sectionId")?;
    let date = required_str(params, "date")?;
    let start_time = required_str(params, "startTime")?;
    let end_time = required_str(params, "endTime")?;
    let with_link = optional_bool(params, "withLink")?.unwrap_or(false);

    require_row(conn, "courses", &course_id, "course")?;
    require_row(conn, "sections", &section_id, "section")?;
    let Some((start, end)) = parse_session_window(&date, &start_time, &end_time) else {
        return Err(HandlerErr::field(
            "date",
            "expected date YYYY-MM-DD and times HH:MM",
        ));
    };
    if end < start {
        return Err(HandlerErr::field("endTime", "end time precedes start time"));
    }

    let id = Uuid::new_v4().to_string();
    let link_token = if with_link {
        Some(sign_link_token(&link_secret(conn)?, &id))
    } else {
        None
    };
    let created_at = now_naive().format("%Y-%m-%dT%H:%M:%S").to_string();
    conn.execute(
        "INSERT INTO attendance_sessions(
           id, course_id, section_id, session_date, start_time, end_time, link_token, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &course_id,
            &section_id,
            &date,
            &start_time,
            &end_time,
            &link_token,
            &created_at,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "sessionId": id, "linkToken": link_token }))
}

// Reschedules an existing session. The combined window is re-validated
// against whichever fields change; the link token, if any, stays valid
// because it signs the session id, not the schedule.
fn sessions_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "sessionId")?;
    let current = get_session(conn, &id)?;

    let date = optional_str(params, "date").unwrap_or(current.session_date);
    let start_time = optional_str(params, "startTime").unwrap_or(current.start_time);
    let end_time = optional_str(params, "endTime").unwrap_or(current.end_time);
    let Some((start, end)) = parse_session_window(&date, &start_time, &end_time) else {
        return Err(HandlerErr::field(
            "date",
            "expected date YYYY-MM-DD and times HH:MM",
        ));
    };
    if end < start {
        return Err(HandlerErr::field("endTime", "end time precedes start time"));
    }

    conn.execute(
        "UPDATE attendance_sessions SET session_date = ?, start_time = ?, end_time = ? WHERE id = ?",
        (&date, &start_time, &end_time, &id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn sessions_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "sessionId")?;
    require_row(conn, "attendance_sessions", &id, "session")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Err(e) = tx.execute("DELETE FROM attendance_records WHERE session_id = ?", [&id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_delete_failed", e.to_string()));
    }
    if let Err(e) = tx.execute("DELETE FROM attendance_sessions WHERE id = ?", [&id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_delete_failed", e.to_string()));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn sessions_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let session = get_session(conn, &session_id)?;
    let now = now_naive();

    // Roster is the section's active enrollments, not the full course roster:
    // a session belongs to one section's delivery.
    let mut stmt = conn
        .prepare(
            "SELECT e.student_id, st.last_name, st.first_name
             FROM section_enrollments e
             JOIN students st ON st.id = e.student_id
             WHERE e.section_id = ? AND e.status = 'active'
             ORDER BY st.last_name, st.first_name",
        )
        .map_err(HandlerErr::db)?;
    let students: Vec<(String, String)> = stmt
        .query_map([&session.section_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok((r.get::<_, String>(0)?, format!("{}, {}", last, first)))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut rec_stmt = conn
        .prepare(
            "SELECT student_id, status, method, marked_at
             FROM attendance_records WHERE session_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let records: Vec<(String, String, String, Option<String>)> = rec_stmt
        .query_map([&session_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    let by_student: std::collections::HashMap<&str, &(String, String, String, Option<String>)> =
        records.iter().map(|rec| (rec.0.as_str(), rec)).collect();

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|(student_id, name)| {
            let rec = by_student.get(student_id.as_str());
            json!({
                "studentId": student_id,
                "studentName": name,
                "status": rec.map(|r| r.1.clone()),
                "method": rec.map(|r| r.2.clone()),
                "markedAt": rec.and_then(|r| r.3.clone()),
            })
        })
        .collect();

    Ok(json!({
        "session": session_json(&session, now),
        "linkToken": session.link_token,
        "rows": rows,
    }))
}

fn mark_manual(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let student_id = required_str(params, "studentId")?;
    let status_raw = required_str(params, "status")?;
    let Some(status) = RecordStatus::parse(&status_raw) else {
        return Err(HandlerErr::field(
            "status",
            "status must be present, absent, late or excused",
        ));
    };
    let session = get_session(conn, &session_id)?;
    require_row(conn, "students", &student_id, "student")?;

    let enrolled = student_in_section(conn, &student_id, &session.section_id)?;
    if !enrolled {
        return Err(HandlerErr::new(
            "not_enrolled",
            "student has no active enrollment in the session's section",
        ));
    }

    // Manual marking is a correction surface; it upserts.
    let id = Uuid::new_v4().to_string();
    let marked_at = now_naive().format("%Y-%m-%dT%H:%M:%S").to_string();
    conn.execute(
        "INSERT INTO attendance_records(id, session_id, student_id, status, method, marked_at)
         VALUES(?, ?, ?, ?, 'manual', ?)
         ON CONFLICT(session_id, student_id) DO UPDATE SET
           status = excluded.status,
           method = excluded.method,
           marked_at = excluded.marked_at",
        (&id, &session_id, &student_id, status.as_str(), &marked_at),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn student_in_section(
    conn: &Connection,
    student_id: &str,
    section_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM section_enrollments
         WHERE student_id = ? AND section_id = ? AND status = 'active'",
        (student_id, section_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

/// The public "mark attendance" link: session id plus the session's signed
/// token. Validation order matters for the user-facing messages: token,
/// then time window, then enrollment, then duplicates.
fn mark_via_link(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let student_id = required_str(params, "studentId")?;
    let token = params
        .get("token")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let session = get_session(conn, &session_id)?;
    require_row(conn, "students", &student_id, "student")?;

    if let Some(expected) = &session.link_token {
        match token {
            Some(provided) if &provided == expected => {}
            _ => return Err(HandlerErr::new("bad_token", "invalid or missing link token")),
        }
    }

    let now = now_naive();
    if derived_status(&session, now) != SessionStatus::Active {
        return Err(HandlerErr::new(
            "session_not_active",
            "session is not currently accepting attendance",
        ));
    }

    if !student_in_section(conn, &student_id, &session.section_id)? {
        return Err(HandlerErr::new(
            "not_enrolled",
            "student has no active enrollment in the session's section",
        ));
    }

    let existing = conn
        .query_row(
            "SELECT 1 FROM attendance_records WHERE session_id = ? AND student_id = ?",
            (&session_id, &student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if existing {
        return Err(HandlerErr::new(
            "conflict",
            "attendance already marked for this session",
        ));
    }

    let id = Uuid::new_v4().to_string();
    let marked_at = now.format("%Y-%m-%dT%H:%M:%S").to_string();
    conn.execute(
        "INSERT INTO attendance_records(id, session_id, student_id, status, method, marked_at)
         VALUES(?, ?, ?, 'present', 'qr_code', ?)",
        (&id, &session_id, &student_id, &marked_at),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "recordId": id, "status": "present", "method": "qr_code" }))
}

fn load_student_course_records(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<Vec<RecordStatus>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT r.status
             FROM attendance_records r
             JOIN attendance_sessions s ON s.id = r.session_id
             WHERE s.course_id = ? AND r.student_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let raw: Vec<String> = stmt
        .query_map((course_id, student_id), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(raw.iter().filter_map(|s| RecordStatus::parse(s)).collect())
}

fn student_rate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let course_id = required_str(params, "courseId")?;
    require_row(conn, "students", &student_id, "student")?;
    require_row(conn, "courses", &course_id, "course")?;

    let session_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance_sessions WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    let records = load_student_course_records(conn, &course_id, &student_id)?;
    let rate = attendance_rate(records);
    Ok(json!({
        "studentId": student_id,
        "courseId": course_id,
        "sessionCount": session_count,
        "rate": rate,
    }))
}

fn course_rates(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let roster = super::roster::course_roster_rows(conn, &course_id)?;
    let mut rows: Vec<serde_json::Value> = Vec::new();
    for student in &roster {
        let records = load_student_course_records(conn, &course_id, &student.student_id)?;
        let rate = attendance_rate(records);
        rows.push(json!({
            "studentId": student.student_id,
            "studentName": student.student_name,
            "sections": student.sections,
            "rate": rate,
        }));
    }
    Ok(json!({ "courseId": course_id, "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    let known = matches!(
        method,
        "attendanceSessions.list"
            | "attendanceSessions.create"
            | "attendanceSessions.update"
            | "attendanceSessions.delete"
            | "attendanceSessions.open"
            | "attendance.mark"
            | "attendance.markViaLink"
            | "attendance.studentRate"
            | "attendance.courseRates"
    );
    if !known {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match method {
        "attendanceSessions.list" => sessions_list(conn, &req.params),
        "attendanceSessions.create" => sessions_create(conn, &req.params),
        "attendanceSessions.update" => sessions_update(conn, &req.params),
        "attendanceSessions.delete" => sessions_delete(conn, &req.params),
        "attendanceSessions.open" => sessions_open(conn, &req.params),
        "attendance.mark" => mark_manual(conn, &req.params),
        "attendance.markViaLink" => mark_via_link(conn, &req.params),
        "attendance.studentRate" => student_rate(conn, &req.params),
        "attendance.courseRates" => course_rates(conn, &req.params),
        _ => unreachable!(),
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
