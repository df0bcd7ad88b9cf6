//! Text shown by the interactive travel planner.

use crate::scheduler::CancelToken;

pub const WELCOME_BANNER: &str = "Welcome to the Travel Planning Assistant!\n\
Describe the trip you have in mind and the crew will put together a report.\n\
Type 'exit', 'quit', or 'bye' to end the session.";

pub const PROMPT: &str = "Enter your trip details: ";

pub const PLANNING_NOTICE: &str = "\nPlanning your trip... This may take a moment.";

pub const GOODBYE: &str = "Goodbye! Have a great day!!";

pub const REPORT_HEADER: &str = "\n-------------Final Holiday Details----------\n";

pub const REPORT_FOOTER: &str = "\n--------------------------------------------\n";

pub const RETRY_HINT: &str = "Please try again.";

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "bye"];

/// Whether `input` asks to leave the planner (case-insensitive, surrounding whitespace ignored).
///
/// ```
/// use tripcrew::console::is_exit_command;
///
/// assert!(is_exit_command("  Quit\n"));
/// assert!(!is_exit_command("a quiet beach"));
/// ```
pub fn is_exit_command(input: &str) -> bool {
    let trimmed = input.trim();
    EXIT_WORDS.iter().any(|word| trimmed.eq_ignore_ascii_case(word))
}

/// The report framed for printing.
pub fn format_report(report: &str) -> String {
    format!("{}\n{}\n{}", REPORT_HEADER, report, REPORT_FOOTER)
}

/// Handle a Ctrl-C: cancel the session in flight, if any. Returns `true` when the planner is
/// idle at the prompt and should exit instead.
pub fn interrupt(active: Option<&CancelToken>) -> bool {
    match active {
        Some(cancel) => {
            cancel.cancel();
            false
        }
        None => true,
    }
}
