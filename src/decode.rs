//! Fail-closed decoding of portal payloads.
//!
//! Portal responses are parsed into an untyped `serde_json::Value` first and
//! every field is checked by hand. Nothing is coerced except the two
//! null-tolerant date columns of an assignment row.

use crate::error::{Error, Result, ValidationError};
use crate::model::{sort_by_due, Assignment, Course, Student};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Positional columns of an assignment row, in wire order.
pub const ROW_COLUMNS: [&str; 9] = [
    "id", "unit", "title", "type", "progress", "due", "completed", "score", "status",
];

/// Decoded assignments envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentPage {
    pub page: i64,
    pub total: i64,
    pub records: i64,
    pub assignments: Vec<Assignment>,
}

pub fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_number(v: &Value) -> Option<i64> {
    // The portal serialises integers through a float-typed JSON layer.
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

fn describe(v: &Value) -> String {
    format!("{} ({})", json_type(v), v)
}

fn number_field(obj: &Map<String, Value>, key: &str) -> std::result::Result<i64, ValidationError> {
    let v = obj.get(key).unwrap_or(&Value::Null);
    as_number(v).ok_or_else(|| ValidationError::new(key, describe(v), "number"))
}

fn string_field(obj: &Map<String, Value>, key: &str) -> std::result::Result<String, ValidationError> {
    let v = obj.get(key).unwrap_or(&Value::Null);
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::new(key, describe(v), "string"))
}

fn cell_number(cells: &[Value], idx: usize) -> std::result::Result<i64, ValidationError> {
    as_number(&cells[idx]).ok_or_else(|| cell_error(cells, idx, "number"))
}

fn cell_string(cells: &[Value], idx: usize) -> std::result::Result<String, ValidationError> {
    cells[idx]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| cell_error(cells, idx, "string"))
}

fn cell_optional_string(
    cells: &[Value],
    idx: usize,
) -> std::result::Result<String, ValidationError> {
    match &cells[idx] {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        _ => Err(cell_error(cells, idx, "string or null")),
    }
}

fn cell_error(cells: &[Value], idx: usize, expected: &str) -> ValidationError {
    ValidationError::new(
        format!("cell[{idx}] ({})", ROW_COLUMNS[idx]),
        describe(&cells[idx]),
        expected,
    )
    .at(idx)
}

/// Decode one `{"id": n, "cell": [..9 values..]}` row.
pub fn decode_row(raw: &Map<String, Value>) -> std::result::Result<Assignment, ValidationError> {
    let id = number_field(raw, "id")?;

    let cells = match raw.get("cell") {
        Some(Value::Array(items)) => items,
        other => {
            let v = other.unwrap_or(&Value::Null);
            return Err(ValidationError::new("cell", describe(v), "array"));
        }
    };
    if cells.len() != ROW_COLUMNS.len() {
        return Err(ValidationError::new(
            "cell",
            format!("{} values", cells.len()),
            "9 values",
        ));
    }

    // Row id is only sanity-checked; the outer id is authoritative.
    cell_number(cells, 0)?;

    Ok(Assignment {
        id,
        student_id: 0,
        course_id: 0,
        unit: cell_number(cells, 1)?,
        title: cell_string(cells, 2)?,
        kind: cell_string(cells, 3)?,
        progress: cell_number(cells, 4)?,
        due: cell_optional_string(cells, 5)?,
        completed: cell_optional_string(cells, 6)?,
        score: cell_number(cells, 7)?,
        status: cell_string(cells, 8)?,
        as_of: None,
    })
}

fn decode_page(v: Option<&Value>) -> Result<i64> {
    match v {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| Error::Marshal(format!("unexpected value for page: {n}"))),
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|e| {
            Error::Marshal(format!(
                "unexpected value for page: expected number got {s:?}: {e}"
            ))
        }),
        other => {
            let v = other.unwrap_or(&Value::Null);
            Err(Error::Marshal(format!(
                "unexpected type for page: got {}, expected number or numeric string",
                describe(v)
            )))
        }
    }
}

fn decode_count(obj: &Map<String, Value>, key: &str) -> Result<i64> {
    match obj.get(key) {
        None => Ok(0),
        Some(v) => as_number(v).ok_or_else(|| {
            Error::Marshal(format!(
                "unexpected type for {key}: got {}, expected number",
                describe(v)
            ))
        }),
    }
}

/// Decode the paginated assignments envelope.
///
/// Rows are keyed by id so a later duplicate replaces an earlier one, then
/// returned ascending by due date.
pub fn decode_envelope(v: &Value) -> Result<AssignmentPage> {
    let Some(obj) = v.as_object() else {
        return Err(Error::Marshal(format!(
            "unexpected type for envelope: got {}, expected object",
            json_type(v)
        )));
    };

    let page = decode_page(obj.get("page"))?;
    let total = decode_count(obj, "total")?;
    let records = decode_count(obj, "records")?;

    let assignments = match obj.get("rows") {
        Some(Value::Object(m)) if m.is_empty() => Vec::new(),
        Some(Value::Object(m)) => {
            return Err(Error::Marshal(format!(
                "unexpected type for rows: got object with {} keys, expected array or empty object",
                m.len()
            )));
        }
        Some(Value::Array(rows)) => {
            let mut by_id: BTreeMap<i64, Assignment> = BTreeMap::new();
            for row in rows {
                let Some(cell) = row.as_object() else {
                    return Err(Error::Marshal(format!(
                        "unexpected type for row: got {}, expected object",
                        json_type(row)
                    )));
                };
                let a = decode_row(cell)?;
                by_id.insert(a.id, a);
            }
            let mut list: Vec<Assignment> = by_id.into_values().collect();
            sort_by_due(&mut list);
            list
        }
        other => {
            let v = other.unwrap_or(&Value::Null);
            return Err(Error::Marshal(format!(
                "unexpected type for rows: got {}, expected array or empty object",
                json_type(v)
            )));
        }
    };

    Ok(AssignmentPage {
        page,
        total,
        records,
        assignments,
    })
}

fn list_items<'a>(v: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    v.as_array().ok_or_else(|| {
        Error::Marshal(format!(
            "unexpected type for {what}: got {}, expected array",
            json_type(v)
        ))
    })
}

fn item_object<'a>(item: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    item.as_object().ok_or_else(|| {
        Error::Marshal(format!(
            "unexpected type for {what}: got {}, expected object",
            json_type(item)
        ))
    })
}

/// `[{"id": n, "displayName": s}, ...]`, returned ascending by id.
pub fn decode_students(v: &Value) -> Result<Vec<Student>> {
    let mut out = Vec::new();
    for item in list_items(v, "students")? {
        let obj = item_object(item, "student")?;
        out.push(Student::new(
            number_field(obj, "id")?,
            string_field(obj, "displayName")?,
        ));
    }
    out.sort_by_key(|s| s.id);
    Ok(out)
}

/// `[{"id": n, "title": s}, ...]`, stamped with the owner and ascending by id.
pub fn decode_courses(v: &Value, student_id: i64) -> Result<Vec<Course>> {
    let mut out = Vec::new();
    for item in list_items(v, "courses")? {
        let obj = item_object(item, "course")?;
        out.push(Course::new(
            number_field(obj, "id")?,
            student_id,
            string_field(obj, "title")?,
        ));
    }
    out.sort_by_key(|c| c.id);
    Ok(out)
}
