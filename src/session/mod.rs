//! Authenticated collection over the portal's browser endpoints.
//!
//! The walk is strictly sequential: students, then each student's courses,
//! then each course's assignments. The first failure anywhere is kept and
//! every later request short-circuits with it until `reset`.

mod client;
mod login;

pub use client::{HttpClient, WebClient, WebResponse};
pub use login::{find_login_action, find_login_error, PASSWORD_FIELD, USERNAME_FIELD};

use crate::config::{PortalConfig, PAGE_SIZE};
use crate::decode::{decode_courses, decode_envelope, decode_students};
use crate::error::{Error, Result};
use crate::model::{Assignment, Course, Data, Student};
use crate::store::Read;
use chrono::Utc;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

pub const STUDENTS_PATH: &str = "/owsoo/parent/populateStudents";
pub const COURSES_PATH: &str = "/owsoo/parent/populateCourses";
pub const ASSIGNMENTS_PATH: &str = "/owsoo/parent/listAssignmentsByCourse";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Fetching,
    Done,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Fetching => "fetching",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Result of one full walk: whatever was built, plus the sticky error if
/// the walk stopped early.
#[derive(Debug, Clone)]
pub struct Collection {
    pub data: Data,
    pub error: Option<Error>,
}

impl Collection {
    pub fn into_result(self) -> Result<Data> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.data),
        }
    }
}

enum Call<'a> {
    Get,
    PostForm(&'a [(&'a str, String)]),
}

impl Call<'_> {
    fn method(&self) -> &'static str {
        match self {
            Call::Get => "GET",
            Call::PostForm(_) => "POST",
        }
    }
}

type Connector<C> = Box<dyn Fn() -> Result<C>>;

pub struct Session<C: WebClient = HttpClient> {
    config: PortalConfig,
    connect: Connector<C>,
    client: Option<C>,
    state: SessionState,
    error: Option<Error>,
}

impl Session<HttpClient> {
    pub fn new(config: PortalConfig) -> Self {
        Self::with_connector(config, HttpClient::new)
    }
}

impl<C: WebClient> Session<C> {
    /// `connect` builds a fresh cookie-less client on every (re)authentication.
    pub fn with_connector(config: PortalConfig, connect: impl Fn() -> Result<C> + 'static) -> Self {
        Self {
            config,
            connect: Box::new(connect),
            client: None,
            state: SessionState::Unauthenticated,
            error: None,
        }
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// First error recorded since the last reset.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Drop the authenticated client and any sticky error.
    pub fn reset(&mut self) {
        self.client = None;
        self.error = None;
        self.state = SessionState::Unauthenticated;
    }

    pub fn reconfigure(&mut self, config: PortalConfig) {
        self.config = config;
        self.reset();
    }

    /// Walk the whole hierarchy once.
    pub fn collect(&mut self) -> Collection {
        let run = Uuid::new_v4();
        let span = info_span!("collect", %run);
        let _guard = span.enter();

        let mut data = Data::new(Utc::now());
        let error = self.walk(&mut data).err();
        match &error {
            None => {
                self.state = SessionState::Done;
                info!(
                    students = data.students.len(),
                    courses = data.course_count(),
                    assignments = data.assignment_count(),
                    "collection finished"
                );
            }
            Some(e) => warn!(error = %e, "collection stopped"),
        }
        Collection { data, error }
    }

    fn walk(&mut self, data: &mut Data) -> Result<()> {
        for mut student in self.students()? {
            let courses = match self.courses(&student) {
                Ok(v) => v,
                Err(e) => {
                    data.students.push(student);
                    return Err(e);
                }
            };
            for mut course in courses {
                let fetched = self.assignments(&student, &course);
                let failed = fetched.as_ref().err().cloned();
                course.assignments = fetched.unwrap_or_default();
                student.courses.push(course);
                if let Some(e) = failed {
                    data.students.push(student);
                    return Err(e);
                }
            }
            data.students.push(student);
        }
        Ok(())
    }

    fn fetch_students(&mut self) -> Result<Vec<Student>> {
        let url = format!("{}{}?_={}", self.config.base(), STUDENTS_PATH, ts());
        let body = self.request_json(&url, Call::Get)?;
        self.guard(decode_students(&body))
    }

    fn fetch_courses(&mut self, student: &Student) -> Result<Vec<Course>> {
        let url = format!(
            "{}{}?student_id={}&_={}",
            self.config.base(),
            COURSES_PATH,
            student.id,
            ts()
        );
        let body = self.request_json(&url, Call::Get)?;
        self.guard(decode_courses(&body, student.id))
    }

    fn fetch_assignments(&mut self, student: &Student, course: &Course) -> Result<Vec<Assignment>> {
        let url = format!("{}{}", self.config.base(), ASSIGNMENTS_PATH);
        let form = [
            ("student_id", student.id.to_string()),
            ("enrollment_id", course.id.to_string()),
            ("nd", ts().to_string()),
            ("rows", PAGE_SIZE.to_string()),
            ("page", "1".to_string()),
        ];
        let body = self.request_json(&url, Call::PostForm(&form))?;
        let page = self.guard(decode_envelope(&body))?;

        let as_of = Utc::now();
        let mut out = page.assignments;
        for a in &mut out {
            a.student_id = student.id;
            a.course_id = course.id;
            a.as_of = Some(as_of);
        }
        Ok(out)
    }

    /// Record the first failure and hand back whichever error is sticky.
    fn fail(&mut self, e: Error) -> Error {
        self.state = SessionState::Failed;
        self.error.get_or_insert(e).clone()
    }

    fn guard<T>(&mut self, r: Result<T>) -> Result<T> {
        r.map_err(|e| self.fail(e))
    }

    fn authenticated_client(&mut self) -> Result<C> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let r = self.login();
        let client = self.guard(r)?;
        self.client = Some(client.clone());
        self.state = SessionState::Authenticated;
        Ok(client)
    }

    fn login(&mut self) -> Result<C> {
        if !self.config.is_configured() {
            return Err(Error::Transport("portal base url is not configured".into()));
        }
        self.state = SessionState::Authenticating;
        let client = (self.connect)()?;

        let root = self.config.base().to_string();
        let page = self.send(&client, &root, Call::Get)?;
        check_status(&page, &root)?;
        let html = page.text();
        check_login_error(&html)?;

        let Some(action) = find_login_action(&html, &page.url)? else {
            debug!(url = %root, "no login form, session already authenticated");
            return Ok(client);
        };

        let form = [
            (USERNAME_FIELD, self.config.username.clone()),
            (PASSWORD_FIELD, self.config.password.clone()),
        ];
        let resp = self.send(&client, &action, Call::PostForm(&form))?;
        check_status(&resp, &action)?;
        check_login_error(&resp.text())?;
        info!(user = %self.config.username, "logged in");
        Ok(client)
    }

    fn request_json(&mut self, url: &str, call: Call<'_>) -> Result<Value> {
        let client = self.authenticated_client()?;
        self.state = SessionState::Fetching;
        let r = self.send(&client, url, call).and_then(|resp| {
            check_status(&resp, url)?;
            check_json(&resp, url)?;
            serde_json::from_slice::<Value>(&resp.body)
                .map_err(|e| Error::Marshal(format!("{url}: {e}")))
        });
        let body = self.guard(r)?;
        self.state = SessionState::Authenticated;
        Ok(body)
    }

    fn send(&self, client: &C, url: &str, call: Call<'_>) -> Result<WebResponse> {
        let method = call.method();
        debug!(method, url, "request");
        let started = Instant::now();
        let resp = match call {
            Call::Get => client.get(url),
            Call::PostForm(form) => client.post_form(url, form),
        }?;
        debug!(
            method,
            url,
            status = resp.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "response"
        );
        if self.should_log_body(&resp) {
            debug!(url, body = %resp.text(), "response body");
        }
        Ok(resp)
    }

    fn should_log_body(&self, resp: &WebResponse) -> bool {
        if resp.status >= 400 {
            return true;
        }
        match resp.media_type().as_deref() {
            None => true,
            Some("application/json") => self.config.log_bodies,
            Some(_) => false,
        }
    }
}

impl<C: WebClient> Read for Session<C> {
    fn students(&mut self) -> Result<Vec<Student>> {
        self.fetch_students()
    }

    fn courses(&mut self, student: &Student) -> Result<Vec<Course>> {
        self.fetch_courses(student)
    }

    fn assignments(&mut self, student: &Student, course: &Course) -> Result<Vec<Assignment>> {
        self.fetch_assignments(student, course)
    }
}

fn check_status(resp: &WebResponse, url: &str) -> Result<()> {
    if resp.is_success() {
        return Ok(());
    }
    Err(Error::Transport(format!(
        "unexpected status {} for {url}",
        resp.status
    )))
}

fn check_json(resp: &WebResponse, url: &str) -> Result<()> {
    match resp.media_type().as_deref() {
        Some("application/json") => Ok(()),
        Some(other) => Err(Error::Transport(format!(
            "unexpected content type {other:?} for {url}"
        ))),
        None => Err(Error::Transport(format!(
            "unparseable content type {:?} for {url}",
            resp.content_type.as_deref().unwrap_or("")
        ))),
    }
}

fn check_login_error(html: &str) -> Result<()> {
    match find_login_error(html)? {
        Some(text) => Err(Error::Authentication(format!("error logging in: {text}"))),
        None => Ok(()),
    }
}

fn ts() -> i64 {
    Utc::now().timestamp()
}
