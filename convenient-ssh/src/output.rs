//! Serialized session output
//!
//! Every line produced during a session run flows through one channel into
//! a single writer task, so a full line is always written atomically:
//! lines from different hosts may interleave, but never mid-line.

use colored::Colorize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
enum Event {
    Stdout {
        host: String,
        text: String,
    },
    Stderr {
        host: String,
        attempt: u32,
        text: String,
    },
    /// Informational line, suppressed by --quiet
    Notice(String),
    /// Always printed
    Summary(String),
    /// Always printed
    Error { host: Option<String>, text: String },
}

/// Handle for emitting session output. Cheap to clone; one clone per
/// worker. The writer task ends once every clone is dropped.
#[derive(Clone)]
pub struct OutputLog {
    tx: mpsc::UnboundedSender<Event>,
    quiet: bool,
}

impl OutputLog {
    /// Start the writer task. The returned handle completes after every
    /// sender clone is dropped and the queue has drained.
    pub fn start(quiet: bool) -> (OutputLog, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                write_event(event);
            }
        });
        (OutputLog { tx, quiet }, handle)
    }

    /// A stdout line from a host.
    pub fn stdout_line(&self, host: &str, text: &str) {
        if self.quiet {
            return;
        }
        let _ = self.tx.send(Event::Stdout {
            host: host.to_string(),
            text: text.to_string(),
        });
    }

    /// A stderr line from a host; `attempt` marks retries past the first.
    pub fn stderr_line(&self, host: &str, attempt: u32, text: &str) {
        let _ = self.tx.send(Event::Stderr {
            host: host.to_string(),
            attempt,
            text: text.to_string(),
        });
    }

    /// Informational line (run banner); suppressed by --quiet.
    pub fn notice(&self, text: impl Into<String>) {
        if self.quiet {
            return;
        }
        let _ = self.tx.send(Event::Notice(text.into()));
    }

    /// Final run summary; always printed.
    pub fn summary(&self, text: impl Into<String>) {
        let _ = self.tx.send(Event::Summary(text.into()));
    }

    /// Error line, optionally tagged with a host; always printed.
    pub fn error(&self, host: Option<&str>, text: &str) {
        let _ = self.tx.send(Event::Error {
            host: host.map(str::to_string),
            text: text.to_string(),
        });
    }
}

fn write_event(event: Event) {
    match event {
        Event::Stdout { host, text } => {
            println!("{} {}", format!("{host}:").green(), text);
        }
        Event::Stderr {
            host,
            attempt,
            text,
        } => {
            let prefix = if attempt > 1 {
                format!("{host} (attempt {attempt}):")
            } else {
                format!("{host}:")
            };
            println!("{} {}", prefix.red(), text);
        }
        Event::Notice(text) | Event::Summary(text) => {
            println!("{}", text.green());
        }
        Event::Error { host, text } => match host {
            Some(host) => println!("{} {}", host.yellow(), text),
            None => println!("{}", text.red()),
        },
    }
}
