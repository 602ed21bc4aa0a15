use crate::grades::{weighted_final, CategoryWeight};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_bool, require_row, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn load_categories(conn: &Connection, course_id: &str) -> Result<Vec<CategoryWeight>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, percentage FROM grade_categories
             WHERE course_id = ?
             ORDER BY name",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([course_id], |r| {
        Ok(CategoryWeight {
            category_id: r.get(0)?,
            name: r.get(1)?,
            percentage: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn load_scores_for_student(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<HashMap<String, f64>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT category_id, percentage FROM student_grades
             WHERE course_id = ? AND student_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((course_id, student_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(rows.into_iter().collect())
}

fn categories_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;
    let categories = load_categories(conn, &course_id)?;
    let weight_total: f64 = categories.iter().map(|c| c.percentage).sum();
    Ok(json!({
        "courseId": course_id,
        "categories": categories,
        "weightTotal": weight_total,
        // Soft invariant: warn in the UI, never reject here.
        "weightsBalanced": (weight_total - 100.0).abs() < 1e-6,
    }))
}

fn categories_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let name = required_str(params, "name")?;
    let percentage = required_f64(params, "percentage")?;
    if !(0.0..=100.0).contains(&percentage) {
        return Err(HandlerErr::field(
            "percentage",
            "percentage must be between 0 and 100",
        ));
    }
    let is_default = optional_bool(params, "isDefault")?.unwrap_or(false);
    require_row(conn, "courses", &course_id, "course")?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_categories(id, course_id, name, percentage, is_default)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &course_id, &name, percentage, is_default as i64),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::field("name", "a category with this name already exists for the course")
        }
        other => HandlerErr::new("db_insert_failed", other.to_string()),
    })?;
    Ok(json!({ "categoryId": id }))
}

fn categories_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "categoryId")?;
    require_row(conn, "grade_categories", &id, "grade category")?;
    if let Some(name) = params.get("name").and_then(|v| v.as_str()) {
        let name = name.trim();
        if name.is_empty() {
            return Err(HandlerErr::field("name", "name must not be empty"));
        }
        conn.execute("UPDATE grade_categories SET name = ? WHERE id = ?", (name, &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(percentage) = params.get("percentage").and_then(|v| v.as_f64()) {
        if !(0.0..=100.0).contains(&percentage) {
            return Err(HandlerErr::field(
                "percentage",
                "percentage must be between 0 and 100",
            ));
        }
        conn.execute(
            "UPDATE grade_categories SET percentage = ? WHERE id = ?",
            (percentage, &id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    Ok(json!({ "ok": true }))
}

fn categories_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "categoryId")?;
    require_row(conn, "grade_categories", &id, "grade category")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Err(e) = tx.execute("DELETE FROM student_grades WHERE category_id = ?", [&id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_delete_failed", e.to_string()));
    }
    if let Err(e) = tx.execute("DELETE FROM grade_categories WHERE id = ?", [&id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_delete_failed", e.to_string()));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn grades_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let course_id = required_str(params, "courseId")?;
    let category_id = required_str(params, "categoryId")?;
    let percentage = required_f64(params, "percentage")?;
    if !(0.0..=100.0).contains(&percentage) {
        return Err(HandlerErr::field(
            "percentage",
            "percentage must be between 0 and 100",
        ));
    }
    require_row(conn, "students", &student_id, "student")?;
    require_row(conn, "courses", &course_id, "course")?;

    let category_course: Option<String> = conn
        .query_row(
            "SELECT course_id FROM grade_categories WHERE id = ?",
            [&category_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    match category_course {
        None => return Err(HandlerErr::new("not_found", "grade category not found")),
        Some(owner) if owner != course_id => {
            return Err(HandlerErr::field(
                "categoryId",
                "category belongs to a different course",
            ))
        }
        Some(_) => {}
    }

    let id = Uuid::new_v4().to_string();
    let updated_at = Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S").to_string();
    conn.execute(
        "INSERT INTO student_grades(id, student_id, course_id, category_id, percentage, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_id, category_id) DO UPDATE SET
           percentage = excluded.percentage,
           updated_at = excluded.updated_at",
        (&id, &student_id, &course_id, &category_id, percentage, &updated_at),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn grades_clear(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let course_id = required_str(params, "courseId")?;
    let category_id = required_str(params, "categoryId")?;
    let n = conn
        .execute(
            "DELETE FROM student_grades
             WHERE student_id = ? AND course_id = ? AND category_id = ?",
            (&student_id, &course_id, &category_id),
        )
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "no grade recorded for this category"));
    }
    Ok(json!({ "ok": true }))
}

fn grades_student_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let course_id = required_str(params, "courseId")?;
    require_row(conn, "students", &student_id, "student")?;
    require_row(conn, "courses", &course_id, "course")?;

    let categories = load_categories(conn, &course_id)?;
    let scores = load_scores_for_student(conn, &course_id, &student_id)?;
    let final_grade = weighted_final(&categories, &scores);

    let breakdown: Vec<serde_json::Value> = categories
        .iter()
        .map(|c| {
            let score = scores.get(&c.category_id).copied();
            json!({
                "categoryId": c.category_id,
                "name": c.name,
                "percentage": c.percentage,
                "score": score,
                "graded": score.is_some(),
                "contribution": score.unwrap_or(0.0) * c.percentage / 100.0,
            })
        })
        .collect();

    Ok(json!({
        "studentId": student_id,
        "courseId": course_id,
        "categories": breakdown,
        "final": final_grade,
    }))
}

fn gradebook_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let categories = load_categories(conn, &course_id)?;
    let weight_total: f64 = categories.iter().map(|c| c.percentage).sum();
    let roster = super::roster::course_roster_rows(conn, &course_id)?;

    // One pass over the course's grades instead of a query per student.
    let mut stmt = conn
        .prepare(
            "SELECT student_id, category_id, percentage FROM student_grades
             WHERE course_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let all_scores: Vec<(String, String, f64)> = stmt
        .query_map([&course_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    let mut by_student: HashMap<String, HashMap<String, f64>> = HashMap::new();
    for (student_id, category_id, percentage) in all_scores {
        by_student
            .entry(student_id)
            .or_default()
            .insert(category_id, percentage);
    }

    let empty: HashMap<String, f64> = HashMap::new();
    let rows: Vec<serde_json::Value> = roster
        .iter()
        .map(|student| {
            let scores = by_student.get(&student.student_id).unwrap_or(&empty);
            let final_grade = weighted_final(&categories, scores);
            json!({
                "studentId": student.student_id,
                "studentName": student.student_name,
                "programId": student.program_id,
                "sections": student.sections,
                "final": final_grade,
            })
        })
        .collect();

    Ok(json!({
        "courseId": course_id,
        "categories": categories,
        "weightTotal": weight_total,
        "weightsBalanced": (weight_total - 100.0).abs() < 1e-6,
        "rows": rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    let known = matches!(
        method,
        "gradeCategories.list"
            | "gradeCategories.create"
            | "gradeCategories.update"
            | "gradeCategories.delete"
            | "grades.set"
            | "grades.clear"
            | "grades.studentSummary"
            | "gradebook.open"
    );
    if !known {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match method {
        "gradeCategories.list" => categories_list(conn, &req.params),
        "gradeCategories.create" => categories_create(conn, &req.params),
        "gradeCategories.update" => categories_update(conn, &req.params),
        "gradeCategories.delete" => categories_delete(conn, &req.params),
        "grades.set" => grades_set(conn, &req.params),
        "grades.clear" => grades_clear(conn, &req.params),
        "grades.studentSummary" => grades_student_summary(conn, &req.params),
        "gradebook.open" => gradebook_open(conn, &req.params),
        _ => unreachable!(),
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
