use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};
use std::fmt::Display;
use std::io::IsTerminal;

/// When summaries are colored.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

fn title_style() -> Style {
    Color::Purple.bold()
}

fn label_style() -> Style {
    Color::LightBlue.bold()
}

fn ok_style() -> Style {
    Color::LightGreen.bold()
}

fn note_style() -> Style {
    Style::new().fg(Color::LightCyan)
}

/// Console output for the summaries printed after `load` and `serve`.
pub struct Ui {
    paint: bool,
    quiet: bool,
}

impl Ui {
    pub fn new(color: ColorMode, quiet: bool) -> Self {
        let paint = !quiet
            && match color {
                ColorMode::Always => true,
                ColorMode::Never => false,
                ColorMode::Auto => std::io::stdout().is_terminal(),
            };

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        Self { paint, quiet }
    }

    /// Prints `title` followed by right-aligned `label: value` rows.
    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        for line in self.render_section(title, rows) {
            println!("{line}");
        }
    }

    pub fn info(&self, message: &str) {
        println!("{}", self.marked("-", note_style(), message));
    }

    pub fn success(&self, message: &str) {
        println!("{}", self.marked("ok", ok_style(), message));
    }

    /// Bar over `total` steps; hidden in quiet mode or when stdout is not a
    /// terminal.
    pub fn progress(&self, total: u64, label: &str) -> ProgressBar {
        if self.quiet || !std::io::stdout().is_terminal() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template("{msg:>12} {bar:32} {pos}/{len} ({per_sec})")
        {
            pb.set_style(style);
        }
        pb.set_message(label.to_string());
        pb
    }

    fn render_section<'a, I, V>(&self, title: &str, rows: I) -> Vec<String>
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(&str, String)> = rows
            .into_iter()
            .map(|(label, value)| (label, value.to_string()))
            .collect();
        if rows.is_empty() {
            return Vec::new();
        }
        let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        let mut lines = Vec::with_capacity(rows.len() + 1);
        lines.push(self.paint(title_style(), title));
        for (label, value) in rows {
            let label = format!("{label:>width$}:");
            lines.push(format!("  {} {value}", self.paint(label_style(), &label)));
        }
        lines
    }

    fn marked(&self, mark: &str, style: Style, message: &str) -> String {
        if self.quiet {
            return message.to_string();
        }
        format!("{} {message}", self.paint(style, &format!("[{mark}]")))
    }

    fn paint(&self, style: Style, text: &str) -> String {
        if self.paint {
            style.paint(text).to_string()
        } else {
            text.to_string()
        }
    }
}
