//! Operator prompts
//!
//! Plain stdin/stdout questions. The core only needs the values; the
//! [`Prompter`] trait keeps steps independent of how they are collected.

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Mutex;

use crate::context::Secret;
use crate::error::{InstallError, Result};

/// Attempts before a validation error escapes to the step
pub const MAX_ATTEMPTS: usize = 5;

pub trait Prompter: Send + Sync {
    /// Free-form answer, `default` used for an empty reply
    fn ask(&self, question: &str, default: Option<&str>) -> Result<String>;

    /// Answer that is never echoed
    fn ask_secret(&self, question: &str) -> Result<Secret>;

    /// Informational line
    fn show(&self, message: &str);

    /// Pick one of `options` by number (1-based) or by its first word.
    fn choose(&self, question: &str, options: &[String]) -> Result<usize> {
        if options.is_empty() {
            return Err(InstallError::validation(format!("{}: nothing to choose from", question)));
        }
        for (i, option) in options.iter().enumerate() {
            self.show(&format!("  {}) {}", i + 1, option));
        }
        let answer = self.ask(question, None)?;
        parse_choice(&answer, options)
    }
}

/// Resolve a menu answer to an index into `options`.
pub fn parse_choice(answer: &str, options: &[String]) -> Result<usize> {
    let answer = answer.trim();
    if let Ok(n) = answer.parse::<usize>() {
        if (1..=options.len()).contains(&n) {
            return Ok(n - 1);
        }
        return Err(InstallError::validation(format!(
            "choose a number between 1 and {}",
            options.len()
        )));
    }
    options
        .iter()
        .position(|o| o.split_whitespace().next() == Some(answer))
        .ok_or_else(|| InstallError::validation(format!("'{}' is not one of the options", answer)))
}

/// Re-run `attempt` while it fails with a validation error.
///
/// Each rejection is shown to the operator. Other errors, and the last
/// validation error after [`MAX_ATTEMPTS`], are returned unchanged.
pub fn ask_valid<T>(prompter: &dyn Prompter, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
    let mut tries = 0;
    loop {
        match attempt() {
            Err(InstallError::Validation(msg)) if tries + 1 < MAX_ATTEMPTS => {
                tries += 1;
                prompter.show(&format!("Invalid input: {}", msg));
            }
            other => return other,
        }
    }
}

// ============================================================================
// Validators
// ============================================================================

/// Hostname: 3-32 characters, starts with a letter, letters, digits or '-'.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    let hostname = hostname.trim();
    if hostname.len() < 3 || hostname.len() > 32 {
        return Err(InstallError::validation("hostname must be 3-32 characters long"));
    }
    if !hostname.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(InstallError::validation("hostname must start with a letter"));
    }
    if hostname.ends_with('-') {
        return Err(InstallError::validation("hostname cannot end with '-'"));
    }
    if !hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(InstallError::validation(
            "hostname may only contain letters, digits and '-'",
        ));
    }
    Ok(())
}

/// Username: 3-32 characters, starts with a lowercase letter, then
/// lowercase letters, digits, '_' or '-'.
pub fn validate_username(username: &str) -> Result<()> {
    let username = username.trim();
    if username.len() < 3 || username.len() > 32 {
        return Err(InstallError::validation("username must be 3-32 characters long"));
    }
    if !username.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(InstallError::validation("username must start with a lowercase letter"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(InstallError::validation(
            "username may only contain lowercase letters, digits, '_' and '-'",
        ));
    }
    if username == "root" {
        return Err(InstallError::validation("username cannot be 'root'"));
    }
    Ok(())
}

/// Password: non-empty, no line breaks (they would split the chpasswd input).
pub fn validate_password(secret: &Secret) -> Result<()> {
    if secret.is_empty() {
        return Err(InstallError::validation("password cannot be empty"));
    }
    if secret.expose().contains(['\n', '\r']) {
        return Err(InstallError::validation("password cannot contain line breaks"));
    }
    Ok(())
}

// ============================================================================
// Console
// ============================================================================

#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    pub fn new() -> Self {
        Self
    }

    fn read_line(&self) -> Result<String> {
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(InstallError::Cancelled);
        }
        Ok(line.trim_end_matches(['\n', '\r']).to_string())
    }

    fn read_hidden(&self) -> Result<String> {
        enable_raw_mode()?;
        let result = read_hidden_keys();
        // Always leave raw mode, even if reading failed
        let _ = disable_raw_mode();
        println!();
        result
    }
}

fn read_hidden_keys() -> Result<String> {
    let mut value = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(value),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(InstallError::Cancelled);
            }
            KeyCode::Char(c) => value.push(c),
            KeyCode::Backspace => {
                value.pop();
            }
            _ => {}
        }
    }
}

impl Prompter for ConsolePrompter {
    fn ask(&self, question: &str, default: Option<&str>) -> Result<String> {
        match default {
            Some(d) => print!("{} [{}]: ", question, d),
            None => print!("{}: ", question),
        }
        io::stdout().flush()?;
        let answer = self.read_line()?;
        match (answer.trim(), default) {
            ("", Some(d)) => Ok(d.to_string()),
            (a, _) => Ok(a.to_string()),
        }
    }

    fn ask_secret(&self, question: &str) -> Result<Secret> {
        print!("{}: ", question);
        io::stdout().flush()?;
        let value = if io::stdin().is_terminal() {
            self.read_hidden()?
        } else {
            self.read_line()?
        };
        Ok(Secret::new(value))
    }

    fn show(&self, message: &str) {
        println!("{}", message);
    }
}

// ============================================================================
// Scripted (tests, unattended runs)
// ============================================================================

/// Answers questions from a fixed queue.
///
/// Runs out → [`InstallError::Cancelled`], the same as EOF on a console.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    shown: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            shown: Mutex::new(Vec::new()),
        }
    }

    /// Queue more answers (e.g. before an in-process restart)
    pub fn push(&self, answer: impl Into<String>) {
        self.lock_answers().push_back(answer.into());
    }

    pub fn remaining(&self) -> usize {
        self.lock_answers().len()
    }

    /// Every informational line shown so far
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn lock_answers(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.answers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next(&self, question: &str) -> Result<String> {
        match self.lock_answers().pop_front() {
            Some(answer) => Ok(answer),
            None => {
                tracing::warn!("No scripted answer left for '{}'", question);
                Err(InstallError::Cancelled)
            }
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, question: &str, default: Option<&str>) -> Result<String> {
        let answer = self.next(question)?;
        match (answer.trim(), default) {
            ("", Some(d)) => Ok(d.to_string()),
            (a, _) => Ok(a.to_string()),
        }
    }

    fn ask_secret(&self, question: &str) -> Result<Secret> {
        self.next(question).map(Secret::new)
    }

    fn show(&self, message: &str) {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        vec![
            "/dev/sda 500.0G Samsung SSD".to_string(),
            "/dev/vda 20.0G".to_string(),
        ]
    }

    #[test]
    fn test_parse_choice_by_number_and_path() {
        assert_eq!(parse_choice("2", &options()).unwrap(), 1);
        assert_eq!(parse_choice(" /dev/sda ", &options()).unwrap(), 0);
        assert!(parse_choice("3", &options()).is_err());
        assert!(parse_choice("0", &options()).is_err());
        assert!(parse_choice("/dev/sdb", &options()).is_err());
    }

    #[test]
    fn test_hostname_rules() {
        assert!(validate_hostname("mainix").is_ok());
        assert!(validate_hostname("mainix-pc2").is_ok());
        assert!(validate_hostname("ab").is_err());
        assert!(validate_hostname("1host").is_err());
        assert!(validate_hostname("host-").is_err());
        assert!(validate_hostname("my host").is_err());
        assert!(validate_hostname(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("user").is_ok());
        assert!(validate_username("dev_ops-1").is_ok());
        assert!(validate_username("User").is_err());
        assert!(validate_username("root").is_err());
        assert!(validate_username("us").is_err());
        assert!(validate_username("us:er").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password(&Secret::new("pw")).is_ok());
        assert!(validate_password(&Secret::new("")).is_err());
        assert!(validate_password(&Secret::new("a\nroot:x")).is_err());
    }

    #[test]
    fn test_scripted_prompter_default_and_exhaustion() {
        let prompter = ScriptedPrompter::new(["", "value"]);
        assert_eq!(prompter.ask("Hostname", Some("mainix")).unwrap(), "mainix");
        assert_eq!(prompter.ask("Username", None).unwrap(), "value");
        assert!(matches!(
            prompter.ask("Anything", None),
            Err(InstallError::Cancelled)
        ));
    }

    #[test]
    fn test_ask_valid_reprompts_on_validation_error() {
        let prompter = ScriptedPrompter::new(["1bad", "good-host"]);
        let hostname = ask_valid(&prompter, || {
            let answer = prompter.ask("Hostname", None)?;
            validate_hostname(&answer)?;
            Ok(answer)
        })
        .unwrap();
        assert_eq!(hostname, "good-host");
        assert_eq!(prompter.shown().len(), 1);
        assert!(prompter.shown()[0].starts_with("Invalid input"));
    }

    #[test]
    fn test_ask_valid_gives_up_after_max_attempts() {
        let answers: Vec<String> = (0..MAX_ATTEMPTS).map(|_| "x".to_string()).collect();
        let prompter = ScriptedPrompter::new(answers);
        let result = ask_valid(&prompter, || {
            let answer = prompter.ask("Hostname", None)?;
            validate_hostname(&answer)?;
            Ok(answer)
        });
        assert!(matches!(result, Err(InstallError::Validation(_))));
        assert_eq!(prompter.remaining(), 0);
    }

    #[test]
    fn test_choose_shows_numbered_options() {
        let prompter = ScriptedPrompter::new(["2"]);
        assert_eq!(prompter.choose("Disk", &options()).unwrap(), 1);
        assert_eq!(prompter.shown()[0], "  1) /dev/sda 500.0G Samsung SSD");
    }
}
