//! The interactive text menu driven over a [`GradebookClient`].
//!
//! Input and output are injected so a session can be scripted: the binary
//! passes locked stdin/stdout, tests pass byte buffers.

use std::io::{BufRead, Write};

use log::{debug, info};

use crate::auth::Permission;
use crate::client::GradebookClient;
use crate::protocol::Response;
use crate::store::{Statistics, StudentRecord, StudentUpdate};
use crate::Result;

/// Failed logins allowed in one session before it gives up.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;

/// Which menu the session is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    /// Waiting for a successful login.
    LoggedOut,
    /// Full menu for administrators.
    AdminMenu,
    /// Read-only menu for ordinary users.
    UserMenu,
}

/// Why [`ClientSession::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The operator chose to log out.
    LoggedOut,
    /// Too many failed logins.
    LockedOut,
    /// The input stream ended.
    InputClosed,
}

enum Step {
    Continue,
    Finish(SessionOutcome),
}

/// Reads one answer, finishing the session when input runs out.
macro_rules! ask {
    ($session:expr, $prompt:expr) => {
        match $session.prompt($prompt)? {
            Some(line) => line,
            None => return Ok(Step::Finish(SessionOutcome::InputClosed)),
        }
    };
}

/// One operator session over one connection.
pub struct ClientSession<R: BufRead, W: Write> {
    client: GradebookClient,
    input: R,
    output: W,
    state: MenuState,
    username: Option<String>,
    failed_logins: u32,
}

impl<R: BufRead, W: Write> ClientSession<R, W> {
    /// Creates a logged-out session.
    pub fn new(client: GradebookClient, input: R, output: W) -> Self {
        ClientSession {
            client,
            input,
            output,
            state: MenuState::LoggedOut,
            username: None,
            failed_logins: 0,
        }
    }

    /// The current menu.
    pub fn state(&self) -> MenuState {
        self.state
    }

    /// Failed logins so far.
    pub fn failed_logins(&self) -> u32 {
        self.failed_logins
    }

    /// Drives the menus until logout, lockout or end of input.
    ///
    /// Business failures are shown to the operator and the menu carries
    /// on. A transport failure ends the session with an error.
    pub fn run(&mut self) -> Result<SessionOutcome> {
        loop {
            let step = match self.state {
                MenuState::LoggedOut => self.login_screen()?,
                MenuState::AdminMenu => self.admin_menu()?,
                MenuState::UserMenu => self.user_menu()?,
            };
            if let Step::Finish(outcome) = step {
                debug!("Session finished: {:?}", outcome);
                return Ok(outcome);
            }
        }
    }

    fn login_screen(&mut self) -> Result<Step> {
        if self.failed_logins >= MAX_LOGIN_ATTEMPTS {
            writeln!(self.output, "Too many failed login attempts.")?;
            return Ok(Step::Finish(SessionOutcome::LockedOut));
        }

        writeln!(self.output, "=== Login ===")?;
        let username = ask!(self, "Username: ");
        let password = ask!(self, "Password: ");

        let response = self.client.login(&username, &password)?;
        let next = match (response.is_success(), response.permission) {
            (true, Some(Permission::Admin)) => Some(MenuState::AdminMenu),
            (true, Some(Permission::User)) => Some(MenuState::UserMenu),
            _ => None,
        };

        match next {
            Some(state) => {
                info!("Logged in as {}", username);
                writeln!(self.output, "{}", response.message_or_default())?;
                self.failed_logins = 0;
                self.username = Some(username);
                self.state = state;
            }
            None => {
                self.failed_logins += 1;
                self.client.set_credentials(None);
                let reason = if response.is_success() {
                    "Permission denied"
                } else {
                    response.message_or_default()
                };
                writeln!(
                    self.output,
                    "Login failed: {} ({}/{})",
                    reason, self.failed_logins, MAX_LOGIN_ATTEMPTS
                )?;
            }
        }
        Ok(Step::Continue)
    }

    fn admin_menu(&mut self) -> Result<Step> {
        writeln!(self.output)?;
        writeln!(self.output, "=== Admin Menu ===")?;
        for item in [
            "1. Add student",
            "2. Delete student",
            "3. Update student",
            "4. View student",
            "5. List students",
            "6. Statistics",
            "7. Change password",
            "0. Logout",
        ] {
            writeln!(self.output, "{item}")?;
        }
        let choice = ask!(self, "Select an option: ");
        match choice.as_str() {
            "1" => self.add_student(),
            "2" => self.delete_student(),
            "3" => self.update_student(),
            "4" => {
                let student_id = ask!(self, "Student ID: ");
                self.view_student(&student_id)
            }
            "5" => self.list_students(),
            "6" => self.show_statistics(),
            "7" => self.change_password(),
            "0" => self.logout(),
            _ => self.invalid_option(),
        }
    }

    fn user_menu(&mut self) -> Result<Step> {
        writeln!(self.output)?;
        writeln!(self.output, "=== User Menu ===")?;
        for item in [
            "1. View my record",
            "2. List students",
            "3. Statistics",
            "4. Change password",
            "0. Logout",
        ] {
            writeln!(self.output, "{item}")?;
        }
        let choice = ask!(self, "Select an option: ");
        match choice.as_str() {
            "1" => {
                let own = self.username.clone().unwrap_or_default();
                self.view_student(&own)
            }
            "2" => self.list_students(),
            "3" => self.show_statistics(),
            "4" => self.change_password(),
            "0" => self.logout(),
            _ => self.invalid_option(),
        }
    }

    fn invalid_option(&mut self) -> Result<Step> {
        writeln!(self.output, "Invalid option")?;
        Ok(Step::Continue)
    }

    fn logout(&mut self) -> Result<Step> {
        self.client.set_credentials(None);
        self.username = None;
        self.state = MenuState::LoggedOut;
        writeln!(self.output, "Logged out.")?;
        Ok(Step::Finish(SessionOutcome::LoggedOut))
    }

    fn add_student(&mut self) -> Result<Step> {
        let student_id = ask!(self, "Student ID: ");
        let name = ask!(self, "Name: ");
        let gender = ask!(self, "Gender: ");
        let mut scores = [0.0; 3];
        for (i, score) in scores.iter_mut().enumerate() {
            let text = ask!(self, &format!("Score {}: ", i + 1));
            match parse_score(&text) {
                Some(value) => *score = value,
                None => return self.invalid_score(),
            }
        }

        let record = StudentRecord {
            student_id,
            name,
            gender,
            score1: scores[0],
            score2: scores[1],
            score3: scores[2],
        };
        let response = self.client.add_student(&record)?;
        self.report(&response)
    }

    fn delete_student(&mut self) -> Result<Step> {
        let student_id = ask!(self, "Student ID: ");
        let response = self.client.delete_student(&student_id)?;
        self.report(&response)
    }

    fn update_student(&mut self) -> Result<Step> {
        let student_id = ask!(self, "Student ID: ");
        let response = self.client.get_student(&student_id)?;
        let current: StudentRecord = match response.data {
            Some(ref data) if response.is_success() => serde_json::from_value(data.clone())?,
            _ => return self.report(&response),
        };
        writeln!(
            self.output,
            "Current: {} ({}) {} / {} / {}",
            current.name, current.gender, current.score1, current.score2, current.score3
        )?;
        writeln!(self.output, "Leave a field blank to keep it.")?;

        let mut update = StudentUpdate::new(student_id);
        update.name = non_blank(ask!(self, &format!("Name [{}]: ", current.name)));
        update.gender = non_blank(ask!(self, &format!("Gender [{}]: ", current.gender)));
        for (i, (slot, old)) in [
            (&mut update.score1, current.score1),
            (&mut update.score2, current.score2),
            (&mut update.score3, current.score3),
        ]
        .into_iter()
        .enumerate()
        {
            let text = ask!(self, &format!("Score {} [{}]: ", i + 1, old));
            if text.is_empty() {
                continue;
            }
            match parse_score(&text) {
                Some(value) => *slot = Some(value),
                None => return self.invalid_score(),
            }
        }

        if update.is_empty() {
            writeln!(self.output, "Nothing to update.")?;
            return Ok(Step::Continue);
        }
        let response = self.client.update_student(&update)?;
        self.report(&response)
    }

    fn view_student(&mut self, student_id: &str) -> Result<Step> {
        let response = self.client.get_student(student_id)?;
        let record: StudentRecord = match response.data {
            Some(ref data) if response.is_success() => serde_json::from_value(data.clone())?,
            _ => return self.report(&response),
        };
        writeln!(self.output, "Student ID: {}", record.student_id)?;
        writeln!(self.output, "Name:       {}", record.name)?;
        writeln!(self.output, "Gender:     {}", record.gender)?;
        writeln!(self.output, "Score 1:    {:.1}", record.score1)?;
        writeln!(self.output, "Score 2:    {:.1}", record.score2)?;
        writeln!(self.output, "Score 3:    {:.1}", record.score3)?;
        writeln!(self.output, "Total:      {:.1}", record.total())?;
        Ok(Step::Continue)
    }

    fn list_students(&mut self) -> Result<Step> {
        let response = self.client.list_students()?;
        let records: Vec<StudentRecord> = match response.data {
            Some(ref data) if response.is_success() => serde_json::from_value(data.clone())?,
            _ => return self.report(&response),
        };
        if records.is_empty() {
            writeln!(self.output, "No students.")?;
            return Ok(Step::Continue);
        }
        writeln!(
            self.output,
            "{:<12} {:<16} {:<8} {:>8} {:>8} {:>8} {:>8}",
            "ID", "Name", "Gender", "Score1", "Score2", "Score3", "Total"
        )?;
        for record in &records {
            writeln!(
                self.output,
                "{:<12} {:<16} {:<8} {:>8.1} {:>8.1} {:>8.1} {:>8.1}",
                record.student_id,
                record.name,
                record.gender,
                record.score1,
                record.score2,
                record.score3,
                record.total()
            )?;
        }
        Ok(Step::Continue)
    }

    fn show_statistics(&mut self) -> Result<Step> {
        let response = self.client.get_statistics()?;
        let stats: Statistics = match response.data {
            Some(ref data) if response.is_success() => serde_json::from_value(data.clone())?,
            _ => return self.report(&response),
        };
        writeln!(self.output, "{:<10} {:>8} {:>8}", "Subject", "Average", "Max")?;
        for (subject, s) in [
            ("Subject 1", stats.subject1),
            ("Subject 2", stats.subject2),
            ("Subject 3", stats.subject3),
        ] {
            writeln!(self.output, "{:<10} {:>8.1} {:>8.1}", subject, s.average, s.max)?;
        }
        Ok(Step::Continue)
    }

    fn change_password(&mut self) -> Result<Step> {
        let username = self.username.clone().unwrap_or_default();
        let old_password = ask!(self, "Current password: ");
        let new_password = ask!(self, "New password: ");
        let confirm = ask!(self, "Confirm new password: ");
        if new_password != confirm {
            writeln!(self.output, "Passwords do not match!")?;
            return Ok(Step::Continue);
        }
        let response = self
            .client
            .change_password(&username, &old_password, &new_password)?;
        self.report(&response)
    }

    fn invalid_score(&mut self) -> Result<Step> {
        writeln!(self.output, "Invalid score")?;
        Ok(Step::Continue)
    }

    fn report(&mut self, response: &Response) -> Result<Step> {
        if response.is_success() {
            writeln!(self.output, "{}", response.message.as_deref().unwrap_or("OK"))?;
        } else {
            writeln!(self.output, "Error: {}", response.message_or_default())?;
        }
        Ok(Step::Continue)
    }

    /// Prints `prompt` and reads one trimmed line. `None` at end of input.
    fn prompt(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_owned()))
    }
}

fn parse_score(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn non_blank(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_must_be_finite_numbers() {
        assert_eq!(parse_score("91.5"), Some(91.5));
        assert_eq!(parse_score(" 70 "), Some(70.0));
        assert_eq!(parse_score("abc"), None);
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("NaN"), None);
        assert_eq!(parse_score("inf"), None);
    }

    #[test]
    fn blank_means_keep() {
        assert_eq!(non_blank(String::new()), None);
        assert_eq!(non_blank("Ann".to_owned()), Some("Ann".to_owned()));
    }
}
