//! Capture of the engine's two output channels.
//!
//! Every line the engine prints is appended to a per-channel log and relayed
//! to the parent as a `stdout`/`stderr` event, unless it is known noise from
//! running a native program inside a sandbox.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::protocol::{Outbound, Outbox};

/// Callback receiving one line of engine output, without its newline.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Which output channel a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
}

/// A single noise pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoiseRule {
    /// Line starts with the text.
    Prefix(String),
    /// Line contains the text anywhere.
    Contains(String),
}

impl NoiseRule {
    fn matches(&self, line: &str) -> bool {
        match self {
            NoiseRule::Prefix(p) => line.starts_with(p.as_str()),
            NoiseRule::Contains(s) => line.contains(s.as_str()),
        }
    }
}

/// Allow-list of benign diagnostics that never reach the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseFilter {
    rules: Vec<NoiseRule>,
}

impl NoiseFilter {
    pub fn new(rules: Vec<NoiseRule>) -> Self {
        Self { rules }
    }

    /// A filter that drops nothing.
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn is_noise(&self, line: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(line))
    }
}

impl Default for NoiseFilter {
    /// The sandbox has no `/proc`, and a single-shot run always trips the
    /// keep-alive notice.
    fn default() -> Self {
        Self::new(vec![
            NoiseRule::Prefix("fopen(\"/proc/meminfo\"".to_string()),
            NoiseRule::Contains("keepRuntimeAlive() is set".to_string()),
        ])
    }
}

/// Accumulated logs at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Default)]
struct Logs {
    output: CapturedOutput,
    sealed: bool,
}

/// Shared sink for both engine output channels.
///
/// Cheap to clone; all clones append to the same logs.
#[derive(Clone)]
pub struct OutputCapture {
    logs: Arc<Mutex<Logs>>,
    filter: Arc<NoiseFilter>,
    outbox: Outbox,
}

impl OutputCapture {
    pub fn new(filter: NoiseFilter, outbox: Outbox) -> Self {
        Self {
            logs: Arc::new(Mutex::new(Logs::default())),
            filter: Arc::new(filter),
            outbox,
        }
    }

    /// Record one line and relay it to the parent.
    ///
    /// Noise and anything arriving after [`seal`](Self::seal) is dropped.
    pub fn push(&self, channel: Channel, line: &str) {
        if self.filter.is_noise(line) {
            return;
        }

        // The event goes out under the lock so event order matches log order.
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        if logs.sealed {
            return;
        }
        let (buffer, event) = match channel {
            Channel::Stdout => (
                &mut logs.output.stdout,
                Outbound::Stdout {
                    line: line.to_string(),
                },
            ),
            Channel::Stderr => (
                &mut logs.output.stderr,
                Outbound::Stderr {
                    line: line.to_string(),
                },
            ),
        };
        buffer.push_str(line);
        buffer.push('\n');
        self.outbox.send(event);
    }

    /// A callback bound to one channel, for the module configuration.
    pub fn sink(&self, channel: Channel) -> OutputSink {
        let capture = self.clone();
        Arc::new(move |line: &str| capture.push(channel, line))
    }

    /// Current logs.
    pub fn snapshot(&self) -> CapturedOutput {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output
            .clone()
    }

    /// Freeze the logs for the final report and return them.
    pub fn seal(&self) -> CapturedOutput {
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        logs.sealed = true;
        logs.output.clone()
    }

    pub fn is_sealed(&self) -> bool {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sealed
    }
}

impl fmt::Debug for OutputCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputCapture")
            .field("filter", &self.filter)
            .field("sealed", &self.is_sealed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn default_filter_drops_sandbox_noise() {
        let filter = NoiseFilter::default();
        assert!(filter.is_noise("fopen(\"/proc/meminfo\", \"r\") failed"));
        assert!(filter.is_noise(
            "program exited (with status: 0), but keepRuntimeAlive() is set (counter=0)"
        ));
        assert!(!filter.is_noise("Circuit: * rc filter"));
        assert!(!filter.is_noise("  fopen(\"/proc/meminfo\""));
    }

    #[test]
    fn lines_are_buffered_and_relayed() {
        let (outbox, mut rx) = Outbox::channel();
        let capture = OutputCapture::new(NoiseFilter::default(), outbox);

        capture.push(Channel::Stdout, "Circuit: rc");
        capture.push(Channel::Stderr, "Warning: no dc path");
        capture.push(Channel::Stdout, "Done.");

        let logs = capture.snapshot();
        assert_eq!(logs.stdout, "Circuit: rc\nDone.\n");
        assert_eq!(logs.stderr, "Warning: no dc path\n");

        assert_eq!(
            drain(&mut rx),
            vec![
                Outbound::Stdout {
                    line: "Circuit: rc".to_string()
                },
                Outbound::Stderr {
                    line: "Warning: no dc path".to_string()
                },
                Outbound::Stdout {
                    line: "Done.".to_string()
                },
            ]
        );
    }

    #[test]
    fn noise_is_neither_logged_nor_relayed() {
        let (outbox, mut rx) = Outbox::channel();
        let capture = OutputCapture::new(NoiseFilter::default(), outbox);

        capture.push(Channel::Stderr, "fopen(\"/proc/meminfo\") failed");
        capture.push(Channel::Stdout, "keepRuntimeAlive() is set");

        assert_eq!(capture.snapshot(), CapturedOutput::default());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn sealed_logs_never_change() {
        let (outbox, mut rx) = Outbox::channel();
        let capture = OutputCapture::new(NoiseFilter::none(), outbox);
        let sink = capture.sink(Channel::Stdout);

        sink("before");
        let sealed = capture.seal();
        sink("after");

        assert_eq!(sealed.stdout, "before\n");
        assert_eq!(capture.snapshot(), sealed);
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(capture.is_sealed());
    }
}
