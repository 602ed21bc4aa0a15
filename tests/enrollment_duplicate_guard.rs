use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn rid() -> String {
    NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string()
}

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let id = rid();
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

struct Cohort {
    student_id: String,
    section_a: String,
    section_b: String,
    semester_id: String,
    year_id: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Cohort {
    let program = request_ok(stdin, reader, "programs.create", json!({ "code": "SE", "name": "Software Eng" }));
    let program_id = str_field(&program, "programId");
    let year = request_ok(stdin, reader, "academicYears.create", json!({ "name": "2024/2025" }));
    let year_id = str_field(&year, "academicYearId");
    let semester = request_ok(
        stdin,
        reader,
        "semesters.create",
        json!({ "academicYearId": year_id, "name": "Semester 1" }),
    );
    let semester_id = str_field(&semester, "semesterId");
    let section_a = request_ok(
        stdin,
        reader,
        "sections.create",
        json!({ "programId": program_id, "code": "A", "yearLevel": 1 }),
    );
    let section_b = request_ok(
        stdin,
        reader,
        "sections.create",
        json!({ "programId": program_id, "code": "B", "yearLevel": 1 }),
    );
    let student = request_ok(
        stdin,
        reader,
        "students.create",
        json!({ "lastName": "Guard", "firstName": "Dup" }),
    );
    Cohort {
        student_id: str_field(&student, "studentId"),
        section_a: str_field(&section_a, "sectionId"),
        section_b: str_field(&section_b, "sectionId"),
        semester_id,
        year_id,
    }
}

fn enroll_params(cohort: &Cohort, section_id: &str) -> serde_json::Value {
    json!({
        "studentId": cohort.student_id,
        "sectionId": section_id,
        "semesterId": cohort.semester_id,
        "academicYearId": cohort.year_id,
        "yearLevel": 1,
    })
}

#[test]
fn second_active_enrollment_in_same_cohort_conflicts() {
    let workspace = temp_dir("campusd-enroll-guard");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cohort = seed(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.create",
        enroll_params(&cohort, &cohort.section_a),
    );
    // Same cohort, different section: still one active enrollment allowed.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "enrollments.create",
        enroll_params(&cohort, &cohort.section_b),
    );
    assert_eq!(code, "conflict");
}

#[test]
fn dropping_frees_the_cohort_for_reenrollment() {
    let workspace = temp_dir("campusd-enroll-drop");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cohort = seed(&mut stdin, &mut reader);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.create",
        enroll_params(&cohort, &cohort.section_a),
    );
    let first_id = str_field(&first, "enrollmentId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.updateStatus",
        json!({ "enrollmentId": first_id, "status": "dropped" }),
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.create",
        enroll_params(&cohort, &cohort.section_b),
    );
    let second_id = str_field(&second, "enrollmentId");

    // Re-activating the dropped row while the new one is active must clash.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "enrollments.updateStatus",
        json!({ "enrollmentId": first_id, "status": "active" }),
    );
    assert_eq!(code, "conflict");

    // Completing the new one unblocks re-activation.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.updateStatus",
        json!({ "enrollmentId": second_id, "status": "completed" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.updateStatus",
        json!({ "enrollmentId": first_id, "status": "active" }),
    );
}

#[test]
fn status_values_are_validated() {
    let workspace = temp_dir("campusd-enroll-status");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cohort = seed(&mut stdin, &mut reader);
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.create",
        enroll_params(&cohort, &cohort.section_a),
    );
    let first_id = str_field(&first, "enrollmentId");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "enrollments.updateStatus",
        json!({ "enrollmentId": first_id, "status": "paused" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn missing_year_level_is_a_field_error() {
    let workspace = temp_dir("campusd-enroll-yearlevel");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cohort = seed(&mut stdin, &mut reader);

    let mut params = enroll_params(&cohort, &cohort.section_a);
    params.as_object_mut().expect("params object").remove("yearLevel");
    let value = request(&mut stdin, &mut reader, "enrollments.create", params);
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    let error = value.get("error").expect("error envelope");
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));
    let message = error
        .get("details")
        .and_then(|d| d.get("fieldErrors"))
        .and_then(|f| f.get("yearLevel"))
        .and_then(|v| v.as_str())
        .expect("fieldErrors.yearLevel");
    assert!(message.contains("missing"), "message: {}", message);

    // Wrong type gets its own message, not the missing-field one.
    let mut params = enroll_params(&cohort, &cohort.section_a);
    params["yearLevel"] = json!("first");
    let value = request(&mut stdin, &mut reader, "enrollments.create", params);
    let message = value
        .get("error")
        .and_then(|e| e.get("details"))
        .and_then(|d| d.get("fieldErrors"))
        .and_then(|f| f.get("yearLevel"))
        .and_then(|v| v.as_str())
        .expect("fieldErrors.yearLevel");
    assert!(message.contains("must be an integer"), "message: {}", message);
}

#[test]
fn listing_by_student_shows_section_and_status() {
    let workspace = temp_dir("campusd-enroll-list");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cohort = seed(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.create",
        enroll_params(&cohort, &cohort.section_a),
    );
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.list",
        json!({ "studentId": cohort.student_id }),
    );
    let rows = listing.get("enrollments").and_then(|v| v.as_array()).expect("enrollments");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("sectionCode").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(rows[0].get("status").and_then(|v| v.as_str()), Some("active"));
    assert!(rows[0].get("enrolledAt").and_then(|v| v.as_str()).is_some());
}
