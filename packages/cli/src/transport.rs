//! JSON-lines framing between the process's stdio and a worker.
//!
//! One inbound message per input line, one outbound message per output line.

use ngspice_worker::Outbound;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Forward every parseable line from `reader` into `inbox`.
///
/// Lines that are not JSON are logged and skipped. Stops at end of input
/// or once the worker stops listening.
pub async fn read_inbox<R>(reader: R, inbox: UnboundedSender<JsonValue>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<JsonValue>(line) {
            Ok(value) => {
                if inbox.send(value).is_err() {
                    debug!("worker no longer reading input");
                    break;
                }
            }
            Err(err) => warn!(%err, "skipping malformed input line"),
        }
    }
    Ok(())
}

/// Write every message from `events` to `writer`, flushing after each.
///
/// Returns once all senders are gone.
pub async fn write_outbox<W>(mut writer: W, mut events: UnboundedReceiver<Outbound>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = events.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        if message.is_terminal() {
            debug!("terminal message written");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngspice_worker::Outbox;
    use serde_json::json;

    #[tokio::test]
    async fn reads_json_lines_and_skips_garbage() {
        let input: &[u8] = b"{\"type\":\"run\",\"netlist\":\"v1 1 0 1\"}\n\nnot json\n{\"type\":\"ping\"}\n";
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        read_inbox(input, tx).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(json!({"type": "run", "netlist": "v1 1 0 1"}))
        );
        assert_eq!(rx.recv().await, Some(json!({"type": "ping"})));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn stops_when_worker_hangs_up() {
        let input: &[u8] = b"{\"type\":\"run\"}\n{\"type\":\"run\"}\n";
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);

        read_inbox(input, tx).await.unwrap();
    }

    #[tokio::test]
    async fn writes_one_message_per_line() {
        let (outbox, events) = Outbox::channel();
        outbox.send(Outbound::Stdout {
            line: "Circuit: rc".to_string(),
        });
        outbox.send(Outbound::error("Netlist is empty."));
        drop(outbox);

        let mut out = Vec::new();
        write_outbox(&mut out, events).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<JsonValue> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                json!({"type": "stdout", "line": "Circuit: rc"}),
                json!({"type": "error", "message": "Netlist is empty."}),
            ]
        );
    }
}
