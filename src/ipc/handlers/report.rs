use super::calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Due work per student and course. Students and courses with nothing due
/// are left out.
fn handle_due(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cal = match calendar(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(data) = state.cache.as_ref() else {
        return err(&req.id, "no_data", "nothing collected yet", None);
    };

    let mut students = Vec::new();
    for student in &data.students {
        let mut courses = Vec::new();
        for course in student.sorted_courses() {
            let due: Vec<serde_json::Value> = course
                .sorted_assignments()
                .into_iter()
                .filter(|a| a.is_due(&cal))
                .map(|a| {
                    json!({
                        "id": a.id,
                        "unit": a.unit,
                        "title": a.title,
                        "type": a.kind,
                        "due": a.due,
                        "progress": a.progress,
                        "status": a.status,
                        "overdue": a.is_overdue(&cal),
                    })
                })
                .collect();
            if due.is_empty() {
                continue;
            }
            courses.push(json!({
                "id": course.id,
                "title": course.title,
                "assignments": due,
            }));
        }
        if courses.is_empty() {
            continue;
        }
        students.push(json!({
            "id": student.id,
            "name": student.plain_name(),
            "dueCount": student.due_count(&cal),
            "overdueCount": student.overdue_count(&cal),
            "courses": courses,
        }));
    }

    ok(
        &req.id,
        json!({
            "asOf": data.as_of.to_rfc3339(),
            "today": cal.today().to_string(),
            "overduePolicy": cal.overdue_policy().as_str(),
            "students": students,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.due" => Some(handle_due(state, req)),
        _ => None,
    }
}
