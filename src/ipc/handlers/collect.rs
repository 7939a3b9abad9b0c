use super::calendar;
use crate::dates::Calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{Course, Student};
use serde_json::json;

fn handle_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let collection = state.session.collect();
    let data = &collection.data;
    let counts = json!({
        "students": data.students.len(),
        "courses": data.course_count(),
        "assignments": data.assignment_count(),
    });
    if let Some(e) = &collection.error {
        // The partial tree is dropped; the previous cache stays.
        return err(
            &req.id,
            "collect_failed",
            e.to_string(),
            Some(json!({ "cause": e.code(), "partial": counts })),
        );
    }
    let as_of = data.as_of.to_rfc3339();
    state.cache = Some(collection.data);
    ok(&req.id, json!({ "asOf": as_of, "counts": counts }))
}

fn course_json(course: &Course, cal: &Calendar) -> serde_json::Value {
    let assignments: Vec<serde_json::Value> = course
        .sorted_assignments()
        .into_iter()
        .map(|a| {
            let mut v = serde_json::to_value(a).unwrap_or_else(|_| json!({}));
            v["flags"] = json!(a.classify(cal));
            v
        })
        .collect();
    json!({
        "id": course.id,
        "title": course.title,
        "incompleteCount": course.incomplete_count(),
        "dueCount": course.due_count(cal),
        "overdueCount": course.overdue_count(cal),
        "assignments": assignments,
    })
}

fn student_json(student: &Student, cal: &Calendar) -> serde_json::Value {
    let courses: Vec<serde_json::Value> = student
        .sorted_courses()
        .into_iter()
        .map(|c| course_json(c, cal))
        .collect();
    json!({
        "id": student.id,
        "displayName": student.display_name,
        "name": student.plain_name(),
        "incompleteCourses": student.incomplete_courses(),
        "dueCount": student.due_count(cal),
        "overdueCount": student.overdue_count(cal),
        "courses": courses,
    })
}

fn handle_data(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cal = match calendar(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(data) = state.cache.as_ref() else {
        return err(&req.id, "no_data", "nothing collected yet", None);
    };
    let students: Vec<serde_json::Value> =
        data.students.iter().map(|s| student_json(s, &cal)).collect();
    ok(
        &req.id,
        json!({
            "asOf": data.as_of.to_rfc3339(),
            "today": cal.today().to_string(),
            "students": students,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "collect.refresh" => Some(handle_refresh(state, req)),
        "collect.data" => Some(handle_data(state, req)),
        _ => None,
    }
}
