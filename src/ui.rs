// UI layer: everything that talks to the terminal. Prompts use `dialoguer`,
// the validation wait shows an `indicatif` spinner, and warnings get a
// `crossterm` colored prefix. Nothing below `cli` calls into this module
// except through the `LoginPrompter` and `Sleeper` traits.

use std::io;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use dialoguer::{Confirm, Editor, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};

use crate::auth::{Credentials, LoginMode, LoginPrompter};
use crate::upload::{MessageLevel, Sleeper, ValidationJob};

/// Asks for credentials on the terminal.
pub struct DialoguerPrompter;

impl LoginPrompter for DialoguerPrompter {
    fn prompt(&self, mode: &LoginMode) -> crate::Result<Credentials> {
        Ok(match mode {
            LoginMode::Password => {
                // `Password` hides what is typed.
                let username: String = Input::new().with_prompt("Username").interact_text()?;
                let password: String = Password::new().with_prompt("Password").interact()?;
                Credentials::Password {
                    username: username.trim().to_string(),
                    password,
                }
            }
            LoginMode::UnblockCode => {
                let code: String = Input::new().with_prompt("Unblock code").interact_text()?;
                Credentials::UnblockCode(code.trim().to_string())
            }
            LoginMode::AuthorizationCode { url } => {
                eprintln!("Sign in with your browser at:\n\n    {url}\n");
                let answer: String = Input::new()
                    .with_prompt("Paste the code or the URL you were sent to")
                    .interact_text()?;
                Credentials::AuthorizationCode(answer.trim().to_string())
            }
        })
    }
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Shows a spinner while the validator works.
#[derive(Default)]
pub struct SpinnerSleeper {
    spinner: Option<ProgressBar>,
}

impl Sleeper for SpinnerSleeper {
    fn sleep(&mut self, duration: Duration, job: &ValidationJob) {
        let message = format!("Waiting for validation of {} ({})...", job.addon_id, job.platform);
        self.spinner
            .get_or_insert_with(|| spinner(message.clone()))
            .set_message(message);
        thread::sleep(duration);
    }
}

impl Drop for SpinnerSleeper {
    fn drop(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

pub fn warn(message: impl AsRef<str>) {
    eprintln!("{} {}", "Warning:".yellow().bold(), message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    eprintln!("{} {}", "Error:".red().bold(), message.as_ref());
}

/// Yes/no question, defaulting to no.
pub fn confirm(question: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(question)
        .default(false)
        .interact()
        .context("reading confirmation")
}

/// Compose a message in `$EDITOR`, starting from `template`. An editor
/// closed without saving gives back the template.
pub fn edit_message(template: &str) -> Result<String> {
    let edited = Editor::new()
        .extension(".txt")
        .edit(template)
        .context("running the editor")?;
    Ok(edited.unwrap_or_else(|| template.to_string()))
}

/// Add-on ids piped in on stdin, one per line.
pub fn read_stdin_lines() -> Result<Vec<String>> {
    io::stdin()
        .lines()
        .map(|line| line.map(|l| l.trim().to_string()))
        .filter(|line| !matches!(line, Ok(l) if l.is_empty()))
        .collect::<io::Result<Vec<_>>>()
        .context("reading add-ons from stdin")
}

/// Print the validator's messages at `level` and above.
pub fn print_validation_messages(job: &ValidationJob, level: MessageLevel) {
    for message in job.messages_at(level) {
        let mut kind = message.kind.clone();
        if let Some(first) = kind.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        println!("{}: {}", kind, message.message);
        let description = message.description.unescaped();
        if !description.trim().is_empty() {
            println!("\t{}\n", description.trim());
        }
    }
}
