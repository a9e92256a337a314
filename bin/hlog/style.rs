//! Terminal styling for hlog output
//!
//! Status messages go to stderr; stdout carries nothing but log text.

const RESET: &str = "\x1b[0m";

/// The few looks hlog uses
#[derive(Debug, Clone, Copy)]
pub enum Tone {
    Bold,
    Dim,
    Live,
    Archived,
    Ok,
    Warn,
    Fail,
    Title,
}

impl Tone {
    fn code(self) -> &'static str {
        match self {
            Tone::Bold => "\x1b[1m",
            Tone::Dim => "\x1b[2m",
            Tone::Live | Tone::Ok => "\x1b[32m",
            Tone::Archived => "\x1b[90m",
            Tone::Warn => "\x1b[33m",
            Tone::Fail => "\x1b[31m",
            Tone::Title => "\x1b[1;36m",
        }
    }

    pub fn paint(self, text: &str) -> String {
        format!("{}{}{}", self.code(), text, RESET)
    }
}

fn status(tone: Tone, icon: &str, msg: &str) {
    eprintln!("{} {}", tone.paint(icon), msg);
}

pub fn print_success(msg: &str) {
    status(Tone::Ok, "✓", msg);
}

pub fn print_warning(msg: &str) {
    status(Tone::Warn, "⚠", &Tone::Warn.paint(msg));
}

pub fn print_error(msg: &str) {
    status(Tone::Fail, "✗", &Tone::Fail.paint(msg));
}

/// Section title padded with a rule to a fixed width
pub fn print_header(title: &str) {
    let rule = "─".repeat(50usize.saturating_sub(title.len()));
    println!("\n{}\n", Tone::Title.paint(&format!("{} {}", title, rule)));
}

/// One `key: value` line of a listing
pub fn print_entry(key: &str, value: &str, tone: Tone) {
    println!("  {} {}", Tone::Archived.paint(&format!("{}:", key)), tone.paint(value));
}
