pub mod collect;
pub mod core;
pub mod report;
pub mod store;

use crate::dates::{parse_date, Calendar, OverduePolicy};
use crate::ipc::error::err;
use crate::ipc::types::Request;

/// Calendar from optional `today` (a date) and `overduePolicy`
/// (`beforeToday` or `weekLate`) params.
pub(crate) fn calendar(req: &Request) -> Result<Calendar, serde_json::Value> {
    let mut cal = match req.params.get("today").and_then(|v| v.as_str()) {
        Some(s) => match parse_date(s) {
            Some(d) => Calendar::on(d),
            None => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("params.today is not a date: {s}"),
                    None,
                ))
            }
        },
        None => Calendar::local(),
    };
    match req.params.get("overduePolicy").and_then(|v| v.as_str()) {
        None | Some("beforeToday") => {}
        Some("weekLate") => cal = cal.with_overdue_policy(OverduePolicy::WeekLate),
        Some(other) => {
            return Err(err(
                &req.id,
                "bad_params",
                format!("unknown overduePolicy: {other}"),
                None,
            ))
        }
    }
    Ok(cal)
}
