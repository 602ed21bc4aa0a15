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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

struct Term {
    program_id: String,
    year_id: String,
    semester_id: String,
}

fn seed_term(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    program_code: &str,
) -> Term {
    let program = request_ok(
        stdin,
        reader,
        "programs.create",
        json!({ "code": program_code, "name": format!("Program {}", program_code) }),
    );
    let year = request_ok(
        stdin,
        reader,
        "academicYears.create",
        json!({ "name": format!("2024/2025-{}", program_code) }),
    );
    let year_id = str_field(&year, "academicYearId");
    let semester = request_ok(
        stdin,
        reader,
        "semesters.create",
        json!({ "academicYearId": year_id, "name": "Semester 1" }),
    );
    Term {
        program_id: str_field(&program, "programId"),
        year_id,
        semester_id: str_field(&semester, "semesterId"),
    }
}

fn seed_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    last: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        "students.create",
        json!({ "lastName": last, "firstName": "Test" }),
    );
    str_field(&created, "studentId")
}

fn seed_section(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    program_id: &str,
    code: &str,
    year_level: i64,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        "sections.create",
        json!({ "programId": program_id, "code": code, "yearLevel": year_level }),
    );
    str_field(&created, "sectionId")
}

fn enroll(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    section_id: &str,
    term: &Term,
    year_level: i64,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        "enrollments.create",
        json!({
            "studentId": student_id,
            "sectionId": section_id,
            "semesterId": term.semester_id,
            "academicYearId": term.year_id,
            "yearLevel": year_level,
        }),
    );
    str_field(&created, "enrollmentId")
}

fn assign_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    course_id: &str,
    term: &Term,
    year_level: Option<i64>,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        "courseAssignments.create",
        json!({
            "courseId": course_id,
            "programId": term.program_id,
            "academicYearId": term.year_id,
            "semesterId": term.semester_id,
            "yearLevel": year_level,
        }),
    );
    str_field(&created, "assignmentId")
}

#[test]
fn roster_inherits_from_cohort_and_dedupes() {
    let workspace = temp_dir("campusd-roster");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let term = seed_term(&mut stdin, &mut reader, "CS");
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "courses.create",
        json!({ "code": "CS101", "title": "Intro" }),
    );
    let course_id = str_field(&course, "courseId");

    let section_a = seed_section(&mut stdin, &mut reader, &term.program_id, "A", 2);
    let section_b = seed_section(&mut stdin, &mut reader, &term.program_id, "B", 2);

    let alice = seed_student(&mut stdin, &mut reader, "Alice");
    let bob = seed_student(&mut stdin, &mut reader, "Bob");
    let carol = seed_student(&mut stdin, &mut reader, "Carol");

    let _ = enroll(&mut stdin, &mut reader, &alice, &section_a, &term, 2);
    let _ = enroll(&mut stdin, &mut reader, &bob, &section_b, &term, 2);
    let carol_enrollment = enroll(&mut stdin, &mut reader, &carol, &section_a, &term, 2);

    // Carol drops out before the roster is read.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.updateStatus",
        json!({ "enrollmentId": carol_enrollment, "status": "dropped" }),
    );

    let _ = assign_course(&mut stdin, &mut reader, &course_id, &term, Some(2));

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "courses.roster",
        json!({ "courseId": course_id }),
    );
    let students = roster.get("students").and_then(|v| v.as_array()).expect("students");
    assert_eq!(students.len(), 2, "roster: {}", roster);
    let names: Vec<&str> = students
        .iter()
        .filter_map(|s| s.get("studentName").and_then(|v| v.as_str()))
        .collect();
    assert!(names.iter().any(|n| n.starts_with("Alice")));
    assert!(names.iter().any(|n| n.starts_with("Bob")));
    assert!(!names.iter().any(|n| n.starts_with("Carol")));
}

#[test]
fn year_mismatch_keeps_student_off_the_roster() {
    let workspace = temp_dir("campusd-roster-yearlevel");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let term = seed_term(&mut stdin, &mut reader, "EE");
    let course_a = request_ok(
        &mut stdin,
        &mut reader,
        "courses.create",
        json!({ "code": "EE200", "title": "Circuits" }),
    );
    let course_a_id = str_field(&course_a, "courseId");

    let section = seed_section(&mut stdin, &mut reader, &term.program_id, "A", 2);
    let section_y4 = seed_section(&mut stdin, &mut reader, &term.program_id, "D4", 4);
    let dana = seed_student(&mut stdin, &mut reader, "Dana");
    let frank = seed_student(&mut stdin, &mut reader, "Frank");
    let _ = enroll(&mut stdin, &mut reader, &dana, &section, &term, 2);
    let _ = enroll(&mut stdin, &mut reader, &frank, &section_y4, &term, 4);

    // Assignment is scoped to year 2; Frank (year 4) stays off the roster.
    let _ = assign_course(&mut stdin, &mut reader, &course_a_id, &term, Some(2));
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "courses.roster",
        json!({ "courseId": course_a_id }),
    );
    let students = roster.get("students").and_then(|v| v.as_array()).expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("studentId").and_then(|v| v.as_str()),
        Some(dana.as_str())
    );
}

#[test]
fn double_major_appears_once_per_program() {
    let workspace = temp_dir("campusd-roster-double");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let term_cs = seed_term(&mut stdin, &mut reader, "CSX");
    let term_math = seed_term(&mut stdin, &mut reader, "MTH");

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "courses.create",
        json!({ "code": "STAT300", "title": "Statistics" }),
    );
    let course_id = str_field(&course, "courseId");

    let cs_section = seed_section(&mut stdin, &mut reader, &term_cs.program_id, "A", 3);
    let math_section = seed_section(&mut stdin, &mut reader, &term_math.program_id, "A", 3);

    let eve = seed_student(&mut stdin, &mut reader, "Eve");
    let _ = enroll(&mut stdin, &mut reader, &eve, &cs_section, &term_cs, 3);
    let _ = enroll(&mut stdin, &mut reader, &eve, &math_section, &term_math, 3);

    let _ = assign_course(&mut stdin, &mut reader, &course_id, &term_cs, Some(3));
    let _ = assign_course(&mut stdin, &mut reader, &course_id, &term_math, Some(3));

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "courses.roster",
        json!({ "courseId": course_id }),
    );
    let students = roster.get("students").and_then(|v| v.as_array()).expect("students");
    // Same student, two programs: two rows by design.
    assert_eq!(students.len(), 2, "roster: {}", roster);
    assert!(students
        .iter()
        .all(|s| s.get("studentId").and_then(|v| v.as_str()) == Some(eve.as_str())));
}

#[test]
fn unset_year_level_matches_every_year_and_sections_accumulate() {
    let workspace = temp_dir("campusd-roster-years");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let term = seed_term(&mut stdin, &mut reader, "BIO");
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "courses.create",
        json!({ "code": "BIO110", "title": "Biology" }),
    );
    let course_id = str_field(&course, "courseId");

    let section_y2 = seed_section(&mut stdin, &mut reader, &term.program_id, "A2", 2);
    let section_y3 = seed_section(&mut stdin, &mut reader, &term.program_id, "A3", 3);

    let y2_student = seed_student(&mut stdin, &mut reader, "Second");
    let y3_student = seed_student(&mut stdin, &mut reader, "Third");
    let _ = enroll(&mut stdin, &mut reader, &y2_student, &section_y2, &term, 2);
    let _ = enroll(&mut stdin, &mut reader, &y3_student, &section_y3, &term, 3);

    let _ = assign_course(&mut stdin, &mut reader, &course_id, &term, None);

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "courses.roster",
        json!({ "courseId": course_id }),
    );
    let students = roster.get("students").and_then(|v| v.as_array()).expect("students");
    assert_eq!(students.len(), 2, "roster: {}", roster);
}

#[test]
fn course_without_assignments_has_empty_roster() {
    let workspace = temp_dir("campusd-roster-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "courses.create",
        json!({ "code": "PHIL100", "title": "Logic" }),
    );
    let course_id = str_field(&course, "courseId");
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "courses.roster",
        json!({ "courseId": course_id }),
    );
    assert_eq!(roster.get("studentCount").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        roster.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}
