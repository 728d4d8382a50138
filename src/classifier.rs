/// Line classification for sqlmap output: progress markers and loop detection.
use std::time::{Duration, Instant};

/// Progress markers in priority order. sqlmap prints them after a
/// `[hh:mm:ss]` timestamp, so they are matched anywhere in the line.
const MARKERS: [MarkerKind; 5] = [
    MarkerKind::Info,
    MarkerKind::Warning,
    MarkerKind::Star,
    MarkerKind::Plus,
    MarkerKind::Bang,
];

/// Longest message shown in a live status line, including the ellipsis.
pub const DISPLAY_CAP: usize = 60;

/// Messages this short are not worth a live status line.
const MIN_DISPLAY_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Info,
    Warning,
    Star,
    Plus,
    Bang,
}

impl MarkerKind {
    pub fn marker(self) -> &'static str {
        match self {
            MarkerKind::Info => "[INFO]",
            MarkerKind::Warning => "[WARNING]",
            MarkerKind::Star => "[*]",
            MarkerKind::Plus => "[+]",
            MarkerKind::Bang => "[!]",
        }
    }
}

/// A recognized progress line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub kind: MarkerKind,
    /// Text after the marker, trimmed. Never truncated.
    pub message: String,
}

impl ProgressEvent {
    /// Whether the message is long enough to show as a live status line.
    pub fn is_displayable(&self) -> bool {
        self.message.chars().count() > MIN_DISPLAY_LEN
    }

    /// `<marker> <message>` with the message capped at [`DISPLAY_CAP`] chars.
    pub fn display_line(&self) -> String {
        format!("{} {}", self.kind.marker(), truncate_display(&self.message))
    }
}

/// Cap `text` at [`DISPLAY_CAP`] chars, replacing the tail with `...`.
pub fn truncate_display(text: &str) -> String {
    if text.chars().count() > DISPLAY_CAP {
        let head: String = text.chars().take(DISPLAY_CAP - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Recognize a progress marker in a raw line.
///
/// Returns `None` for lines without a marker and for marker lines with no
/// message text after the marker.
pub fn parse_progress(line: &str) -> Option<ProgressEvent> {
    let kind = MARKERS
        .into_iter()
        .find(|kind| line.contains(kind.marker()))?;
    let (_, rest) = line.split_once(kind.marker())?;
    let message = rest.trim();
    if message.is_empty() {
        return None;
    }
    Some(ProgressEvent {
        kind,
        message: message.to_string(),
    })
}

/// Tracks the last distinct progress message to catch a process that keeps
/// printing the same status without making progress.
#[derive(Debug)]
pub struct LoopDetector {
    threshold: u32,
    stall_timeout: Duration,
    last_message: String,
    first_seen: Instant,
    repeats: u32,
}

impl LoopDetector {
    pub fn new(threshold: u32, stall_timeout: Duration, now: Instant) -> Self {
        Self {
            threshold,
            stall_timeout,
            last_message: String::new(),
            first_seen: now,
            repeats: 0,
        }
    }

    /// Record a progress message seen at `now`.
    ///
    /// Returns `true` once the same message has repeated more than
    /// `threshold` times and has been current for longer than the stall
    /// timeout.
    pub fn observe(&mut self, message: &str, now: Instant) -> bool {
        if message == self.last_message {
            self.repeats += 1;
            self.repeats > self.threshold
                && now.saturating_duration_since(self.first_seen) > self.stall_timeout
        } else {
            self.repeats = 0;
            self.last_message = message.to_string();
            self.first_seen = now;
            false
        }
    }

    #[cfg(test)]
    pub fn repeats(&self) -> u32 {
        self.repeats
    }
}

/// What the classifier concluded about one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub progress: Option<ProgressEvent>,
    pub looping: bool,
}

/// Per-run classifier: marker recognition plus loop detection.
#[derive(Debug)]
pub struct OutputClassifier {
    detector: LoopDetector,
}

impl OutputClassifier {
    pub fn new(threshold: u32, stall_timeout: Duration, now: Instant) -> Self {
        Self {
            detector: LoopDetector::new(threshold, stall_timeout, now),
        }
    }

    pub fn classify(&mut self, line: &str, now: Instant) -> Classification {
        let progress = parse_progress(line);
        let looping = match &progress {
            Some(event) => self.detector.observe(&event.message, now),
            None => false,
        };
        Classification { progress, looping }
    }
}
