/// User-facing notifications, kept apart from tracing logs.
///
/// The supervisor and result builder report every transition through a
/// [`Notifier`] handed to them, so tests can record calls instead of printing.
use crate::classifier::ProgressEvent;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Severity-leveled presentation sink. Implementations must not block or panic.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
    fn success(&self, message: &str);

    /// A recognized progress line worth showing live.
    fn progress(&self, _event: &ProgressEvent) {}

    /// A raw subprocess line, echoed as-is.
    fn echo(&self, _line: &str) {}

    /// Working-indicator heartbeat. Carries no meaning beyond liveness.
    fn tick(&self) {}
}

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Prints notifications to the terminal.
pub struct ConsoleNotifier {
    spinner: bool,
    spinner_idx: AtomicUsize,
}

impl ConsoleNotifier {
    /// `spinner` enables the in-place working indicator; leave it off when
    /// stdout is not a terminal.
    pub fn new(spinner: bool) -> Self {
        Self {
            spinner,
            spinner_idx: AtomicUsize::new(0),
        }
    }

    fn clear_spinner(&self) {
        if self.spinner {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(b"\r\x1b[K");
            let _ = out.flush();
        }
    }
}

/// Write `line` plus a newline if it lacks one. Write errors (closed pipe,
/// full disk) are dropped so a notification can never abort a run.
pub fn write_line(mut out: impl Write, line: &str) {
    let _ = out.write_all(line.as_bytes());
    if !line.ends_with('\n') {
        let _ = out.write_all(b"\n");
    }
    let _ = out.flush();
}

impl Notifier for ConsoleNotifier {
    fn info(&self, message: &str) {
        self.clear_spinner();
        write_line(std::io::stdout().lock(), &format!("[*] {message}"));
    }

    fn warning(&self, message: &str) {
        self.clear_spinner();
        write_line(std::io::stdout().lock(), &format!("[WARNING] {message}"));
    }

    fn error(&self, message: &str) {
        self.clear_spinner();
        write_line(std::io::stderr().lock(), &format!("[ERROR] {message}"));
    }

    fn success(&self, message: &str) {
        self.clear_spinner();
        write_line(std::io::stdout().lock(), &format!("[+] {message}"));
    }

    fn progress(&self, event: &ProgressEvent) {
        self.clear_spinner();
        write_line(std::io::stdout().lock(), &event.display_line());
    }

    fn echo(&self, line: &str) {
        self.clear_spinner();
        write_line(std::io::stdout().lock(), line);
    }

    fn tick(&self) {
        if !self.spinner {
            return;
        }
        let idx = self.spinner_idx.fetch_add(1, Ordering::Relaxed) % SPINNER.len();
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\rRunning {}", SPINNER[idx]);
        let _ = out.flush();
    }
}

#[cfg(test)]
pub use recording::{Notice, RecordingNotifier};

#[cfg(test)]
mod recording {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Notice {
        Info(String),
        Warning(String),
        Error(String),
        Success(String),
        Progress(String),
        Echo(String),
    }

    /// Test double that records every call.
    #[derive(Default)]
    pub struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
        ticks: AtomicUsize,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn notices(&self) -> Vec<Notice> {
            self.notices.lock().unwrap().clone()
        }

        pub fn ticks(&self) -> usize {
            self.ticks.load(Ordering::Relaxed)
        }

        pub fn has_warning(&self, needle: &str) -> bool {
            self.notices()
                .iter()
                .any(|n| matches!(n, Notice::Warning(m) if m.contains(needle)))
        }

        pub fn has_error(&self, needle: &str) -> bool {
            self.notices()
                .iter()
                .any(|n| matches!(n, Notice::Error(m) if m.contains(needle)))
        }

        pub fn has_success(&self, needle: &str) -> bool {
            self.notices()
                .iter()
                .any(|n| matches!(n, Notice::Success(m) if m.contains(needle)))
        }

        pub fn echoed(&self) -> Vec<String> {
            self.notices()
                .into_iter()
                .filter_map(|n| match n {
                    Notice::Echo(line) => Some(line),
                    _ => None,
                })
                .collect()
        }

        fn push(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    impl Notifier for RecordingNotifier {
        fn info(&self, message: &str) {
            self.push(Notice::Info(message.to_string()));
        }

        fn warning(&self, message: &str) {
            self.push(Notice::Warning(message.to_string()));
        }

        fn error(&self, message: &str) {
            self.push(Notice::Error(message.to_string()));
        }

        fn success(&self, message: &str) {
            self.push(Notice::Success(message.to_string()));
        }

        fn progress(&self, event: &ProgressEvent) {
            self.push(Notice::Progress(event.display_line()));
        }

        fn echo(&self, line: &str) {
            self.push(Notice::Echo(line.to_string()));
        }

        fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::parse_progress;

    #[test]
    fn test_recording_notifier_keeps_order() {
        let n = RecordingNotifier::new();
        n.info("one");
        n.warning("two");
        n.error("three");
        n.success("four");
        assert_eq!(
            n.notices(),
            vec![
                Notice::Info("one".into()),
                Notice::Warning("two".into()),
                Notice::Error("three".into()),
                Notice::Success("four".into()),
            ]
        );
        assert!(n.has_warning("tw"));
        assert!(!n.has_warning("one"));
    }

    #[test]
    fn test_recording_notifier_progress_uses_display_line() {
        let n = RecordingNotifier::new();
        let event = parse_progress(&format!("[INFO] {}", "y".repeat(80))).unwrap();
        n.progress(&event);
        match &n.notices()[0] {
            Notice::Progress(line) => assert!(line.ends_with("...")),
            other => panic!("unexpected notice {other:?}"),
        }
    }

    /// Fails every write, like a closed pipe.
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn test_write_line_terminates_once() {
        let mut buf = Vec::new();
        write_line(&mut buf, "[*] starting");
        write_line(&mut buf, "raw line\n");
        assert_eq!(String::from_utf8(buf).unwrap(), "[*] starting\nraw line\n");
    }

    #[test]
    fn test_write_line_ignores_write_errors() {
        // Must return normally instead of panicking like println! would
        write_line(BrokenPipe, "[WARNING] nobody is listening");
        write_line(BrokenPipe, "");
    }

    #[test]
    fn test_console_notifier_without_spinner_ignores_tick() {
        // Must not panic or write a spinner frame
        let n = ConsoleNotifier::new(false);
        n.tick();
        assert_eq!(n.spinner_idx.load(Ordering::Relaxed), 0);
    }
}
