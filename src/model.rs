use crate::dates::{is_after, is_before, is_within, parse_date, Calendar};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Progress value the portal reports for finished work.
pub const FINISHED: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    /// As delivered by the portal, HTML entities still escaped.
    pub display_name: String,
    #[serde(default)]
    pub courses: Vec<Course>,
}

impl Student {
    pub fn new(id: i64, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            courses: Vec::new(),
        }
    }

    /// Display name with HTML entities decoded.
    pub fn plain_name(&self) -> String {
        let frag = scraper::Html::parse_fragment(&self.display_name);
        frag.root_element().text().collect()
    }

    /// Copy without the course subtree.
    pub fn shallow(&self) -> Self {
        Self::new(self.id, self.display_name.clone())
    }

    pub fn sorted_courses(&self) -> Vec<&Course> {
        let mut courses: Vec<&Course> = self.courses.iter().collect();
        courses.sort_by(|a, b| a.title.cmp(&b.title));
        courses
    }

    pub fn incomplete_courses(&self) -> usize {
        self.courses
            .iter()
            .filter(|c| c.incomplete_count() > 0)
            .count()
    }

    pub fn due_count(&self, cal: &Calendar) -> usize {
        self.courses.iter().map(|c| c.due_count(cal)).sum()
    }

    pub fn overdue_count(&self, cal: &Calendar) -> usize {
        self.courses.iter().map(|c| c.overdue_count(cal)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    #[serde(default)]
    pub student_id: i64,
    pub title: String,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

impl Course {
    pub fn new(id: i64, student_id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            student_id,
            title: title.into(),
            assignments: Vec::new(),
        }
    }

    pub fn shallow(&self) -> Self {
        Self::new(self.id, self.student_id, self.title.clone())
    }

    /// Unit, then due date, then completed date, then title.
    pub fn sorted_assignments(&self) -> Vec<&Assignment> {
        let mut out: Vec<&Assignment> = self.assignments.iter().collect();
        out.sort_by(|a, b| {
            a.unit
                .cmp(&b.unit)
                .then_with(|| date_order(&a.due, &b.due))
                .then_with(|| date_order(&a.completed, &b.completed))
                .then_with(|| a.title.cmp(&b.title))
        });
        out
    }

    pub fn incomplete_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_incomplete()).count()
    }

    pub fn due_count(&self, cal: &Calendar) -> usize {
        self.assignments.iter().filter(|a| a.is_due(cal)).count()
    }

    pub fn overdue_count(&self, cal: &Calendar) -> usize {
        self.assignments.iter().filter(|a| a.is_overdue(cal)).count()
    }
}

fn date_order(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    parse_date(a).cmp(&parse_date(b))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: i64,
    #[serde(default)]
    pub student_id: i64,
    #[serde(default)]
    pub course_id: i64,
    pub unit: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub progress: i64,
    #[serde(default)]
    pub due: String,
    #[serde(default)]
    pub completed: String,
    pub score: i64,
    pub status: String,
    /// When this observation was captured; absent in older snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn due_date(&self) -> Option<NaiveDate> {
        parse_date(&self.due)
    }

    pub fn completed_date(&self) -> Option<NaiveDate> {
        parse_date(&self.completed)
    }

    pub fn is_incomplete(&self) -> bool {
        !matches!(self.status.as_str(), "Skipped" | "Completed" | "Graded")
    }

    pub fn is_current(&self, cal: &Calendar) -> bool {
        let (start, end) = (cal.this_week(), cal.next_week());
        is_within(self.due_date(), start, end) || is_within(self.completed_date(), start, end)
    }

    pub fn is_future(&self, cal: &Calendar) -> bool {
        is_after(self.due_date(), cal.tomorrow())
    }

    pub fn is_past(&self, cal: &Calendar) -> bool {
        is_before(self.due_date(), cal.today())
    }

    /// Incomplete, unfinished and due today or earlier. Overdue work is due too.
    pub fn is_due(&self, cal: &Calendar) -> bool {
        if !self.is_incomplete() {
            return false;
        }
        if self.progress == FINISHED {
            return false;
        }
        is_before(self.due_date(), cal.tomorrow())
    }

    pub fn is_overdue(&self, cal: &Calendar) -> bool {
        if !self.is_due(cal) {
            return false;
        }
        is_before(self.due_date(), cal.overdue_boundary())
    }

    pub fn classify(&self, cal: &Calendar) -> Classification {
        Classification {
            incomplete: self.is_incomplete(),
            current: self.is_current(cal),
            future: self.is_future(cal),
            past: self.is_past(cal),
            due: self.is_due(cal),
            overdue: self.is_overdue(cal),
        }
    }
}

impl std::fmt::Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unit: {}, {}, {:?}, Due: {}, Status: {}",
            self.unit, self.kind, self.title, self.due, self.status
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub incomplete: bool,
    pub current: bool,
    pub future: bool,
    pub past: bool,
    pub due: bool,
    pub overdue: bool,
}

/// One collected Student → Course → Assignment tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    pub as_of: DateTime<Utc>,
    pub students: Vec<Student>,
}

impl Data {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            students: Vec::new(),
        }
    }

    pub fn student(&self, id: i64) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn course_count(&self) -> usize {
        self.students.iter().map(|s| s.courses.len()).sum()
    }

    pub fn assignment_count(&self) -> usize {
        self.students
            .iter()
            .flat_map(|s| s.courses.iter())
            .map(|c| c.assignments.len())
            .sum()
    }
}

/// Ascending by due date; absent dates first. Stable.
pub fn sort_by_due(assignments: &mut [Assignment]) {
    assignments.sort_by_key(|a| a.due_date());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    // Wednesday.
    fn cal() -> Calendar {
        Calendar::on(ymd(2024, 5, 15))
    }

    fn assignment(due: &str, progress: i64, status: &str) -> Assignment {
        Assignment {
            id: 1,
            student_id: 10,
            course_id: 20,
            unit: 1,
            title: "Fractions".to_string(),
            kind: "Quiz".to_string(),
            progress,
            due: due.to_string(),
            completed: String::new(),
            score: 0,
            status: status.to_string(),
            as_of: None,
        }
    }

    #[test]
    fn finished_statuses_are_not_incomplete() {
        for status in ["Completed", "Graded", "Skipped"] {
            assert!(!assignment("2024-05-14", 0, status).is_incomplete());
        }
        assert!(assignment("2024-05-14", 0, "In Progress").is_incomplete());
        assert!(assignment("2024-05-14", 0, "").is_incomplete());
    }

    #[test]
    fn due_today_and_yesterday() {
        let today = assignment("2024-05-15", 40, "In Progress");
        assert!(today.is_due(&cal()));
        assert!(!today.is_overdue(&cal()));

        let yesterday = assignment("05/14/2024", 40, "In Progress");
        assert!(yesterday.is_due(&cal()));
        assert!(yesterday.is_overdue(&cal()));
    }

    #[test]
    fn full_progress_is_never_due() {
        let a = assignment("2024-05-14", 100, "In Progress");
        assert!(!a.is_due(&cal()));
        assert!(!a.is_overdue(&cal()));
    }

    #[test]
    fn completed_work_is_never_due() {
        let a = assignment("2024-05-01", 10, "Completed");
        assert!(!a.is_due(&cal()));
        assert!(!a.is_overdue(&cal()));
    }

    #[test]
    fn tomorrow_is_neither_due_nor_future() {
        let a = assignment("2024-05-16", 0, "Not Started");
        assert!(!a.is_due(&cal()));
        assert!(!a.is_future(&cal()));
        assert!(assignment("2024-05-17", 0, "Not Started").is_future(&cal()));
    }

    #[test]
    fn missing_due_date_is_past_and_overdue_eligible() {
        for due in ["", "soon"] {
            let a = assignment(due, 0, "Not Started");
            assert!(a.is_past(&cal()));
            assert!(!a.is_future(&cal()));
            assert!(!a.is_current(&cal()));
            assert!(a.is_due(&cal()));
            assert!(a.is_overdue(&cal()));
        }
    }

    #[test]
    fn week_late_policy_moves_overdue_boundary() {
        let late = cal().with_overdue_policy(crate::dates::OverduePolicy::WeekLate);
        let three_days = assignment("2024-05-12", 0, "Not Started");
        assert!(three_days.is_due(&late));
        assert!(!three_days.is_overdue(&late));
        let ten_days = assignment("2024-05-05", 0, "Not Started");
        assert!(ten_days.is_overdue(&late));
    }

    #[test]
    fn current_window_uses_due_or_completed() {
        assert!(assignment("2024-05-13", 0, "x").is_current(&cal()));
        assert!(assignment("2024-05-19", 0, "x").is_current(&cal()));
        assert!(!assignment("2024-05-20", 0, "x").is_current(&cal()));
        assert!(!assignment("2024-05-12", 0, "x").is_current(&cal()));

        let mut done = assignment("2024-04-01", 100, "Completed");
        done.completed = "05/14/2024".to_string();
        assert!(done.is_current(&cal()));
    }

    #[test]
    fn implication_chain_holds() {
        let dues = ["", "2024-05-01", "2024-05-14", "2024-05-15", "2024-05-16", "2024-06-01"];
        let statuses = ["Completed", "Graded", "Skipped", "In Progress", "Not Started"];
        let c = cal();
        for due in dues {
            for status in statuses {
                for progress in [0, 50, 100, 120, -5] {
                    let a = assignment(due, progress, status);
                    if a.is_overdue(&c) {
                        assert!(a.is_due(&c));
                    }
                    if a.is_due(&c) {
                        assert!(a.is_incomplete());
                    }
                }
            }
        }
    }

    #[test]
    fn sorted_assignments_by_unit_then_due() {
        let mut course = Course::new(20, 10, "Math");
        let mut a = assignment("2024-05-20", 0, "x");
        a.unit = 2;
        a.title = "B".into();
        let mut b = assignment("2024-05-10", 0, "x");
        b.unit = 2;
        b.title = "A".into();
        let mut c = assignment("2024-06-01", 0, "x");
        c.unit = 1;
        c.title = "C".into();
        course.assignments = vec![a, b, c];
        let titles: Vec<&str> = course
            .sorted_assignments()
            .iter()
            .map(|a| a.title.as_str())
            .collect();
        assert_eq!(titles, vec!["C", "A", "B"]);
    }

    #[test]
    fn plain_name_decodes_entities() {
        let s = Student::new(1, "O&#39;Brien &amp; Sons");
        assert_eq!(s.plain_name(), "O'Brien & Sons");
    }

    #[test]
    fn counts_roll_up_to_student() {
        let mut course = Course::new(20, 10, "Math");
        course.assignments = vec![
            assignment("2024-05-14", 0, "Not Started"),
            assignment("2024-05-15", 0, "Not Started"),
            assignment("2024-05-30", 0, "Not Started"),
            assignment("2024-05-01", 100, "Completed"),
        ];
        let mut student = Student::new(10, "Ann");
        student.courses.push(course);
        assert_eq!(student.due_count(&cal()), 2);
        assert_eq!(student.overdue_count(&cal()), 1);
        assert_eq!(student.incomplete_courses(), 1);
    }
}
