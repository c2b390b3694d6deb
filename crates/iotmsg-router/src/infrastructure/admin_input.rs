//! Admin command input: reads command lines from an async reader (stdin in
//! the binary) and hands them to the engine thread.
//!
//! Blank lines and lines starting with `#` are skipped so that a command
//! script can be piped in with comments.

use std::sync::mpsc::Sender;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

/// Forwards every non-empty, non-comment line from `reader` to `tx`.
///
/// Returns the number of lines forwarded once the reader reaches EOF or the
/// receiving side has gone away.
///
/// # Errors
///
/// Returns the underlying I/O error if reading fails.
pub async fn forward_admin_lines<R>(reader: R, tx: Sender<String>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if tx.send(line.to_string()).is_err() {
            debug!("admin receiver closed; stopping input");
            break;
        }
        forwarded += 1;
    }

    info!("admin input finished after {forwarded} command(s)");
    Ok(forwarded)
}
