//! Table rendering and the shared output sink.
//!
//! All concurrent units write through one [`TableSink`]. The sink owns its
//! lock and only accepts whole groups, so rows of one target can never be
//! split by rows of another.

use std::io::{self, Write};
use std::time::Duration;

use comfy_table::{ContentArrangement, Table, presets};
use tokio::sync::Mutex;

use crate::coordinator::LookupResult;
use crate::prober::ProbeResult;
use crate::target::Target;

/// Space between columns, as with a tab writer.
const COLUMN_GAP: u16 = 4;

/// One output line, as a list of cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(Vec<String>);

impl Row {
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Row(cells.into_iter().map(Into::into).collect())
    }

    pub fn cells(&self) -> &[String] {
        &self.0
    }
}

fn phase(label: &str, d: Duration) -> String {
    format!("{label}:{d:?}")
}

fn peer(result: &ProbeResult) -> String {
    result.peer_ip.map(|ip| ip.to_string()).unwrap_or_default()
}

/// Render one probe result.
///
/// Plain: target, duration, peer IP, names. TLS: target, connect, handshake,
/// total, peer IP, version, ALPN, cipher, names. Errors keep the leading
/// columns of whichever phase was reached and put the message after them.
pub fn probe_row(result: &ProbeResult) -> Row {
    let target = result.address.target.to_string();
    let t = &result.timings;

    let Some(handshake) = t.handshake else {
        return match &result.error {
            Some(e) => Row::new([target, phase("tcp", t.connect), e.to_string()]),
            None => Row::new([target, phase("tcp", t.connect), peer(result), result.names.join(", ")]),
        };
    };

    let mut cells = vec![
        target,
        phase("tcp", t.connect),
        phase("tls", handshake),
        phase("total", t.total),
        peer(result),
    ];
    match (&result.error, &result.tls) {
        (Some(e), _) => cells.push(e.to_string()),
        (None, Some(meta)) => {
            cells.push(meta.version.clone());
            cells.push(meta.alpn.clone());
            cells.push(meta.cipher.clone());
            cells.push(result.names.join(", "));
        }
        (None, None) => cells.push(result.names.join(", ")),
    }
    Row::new(cells)
}

/// Render a lookup group: the name and duration only on the first row, one
/// row per resolved IP.
pub fn lookup_rows(result: &LookupResult) -> Vec<Row> {
    result
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let names = match &entry.names {
                None => String::new(),
                Some(Ok(names)) => names.join(" "),
                Some(Err(e)) => e.to_string(),
            };
            if i == 0 {
                Row::new([result.name.clone(), format!("{:?}", result.elapsed), entry.ip.to_string(), names])
            } else {
                Row::new([String::new(), String::new(), entry.ip.to_string(), names])
            }
        })
        .collect()
}

pub fn fetch_row(target: &Target, elapsed: Duration) -> Row {
    Row::new([target.to_string(), format!("{elapsed:?}")])
}

struct SinkState {
    table: Table,
    pending: usize,
    out: Box<dyn Write + Send>,
    diag: Box<dyn Write + Send>,
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Disabled);
    table
}

/// Output table plus diagnostic stream behind one lock.
///
/// Groups are buffered and aligned together; [`TableSink::flush`] renders
/// everything buffered so far.
pub struct TableSink {
    state: Mutex<SinkState>,
}

impl TableSink {
    pub fn new<O, D>(out: O, diag: D) -> Self
    where
        O: Write + Send + 'static,
        D: Write + Send + 'static,
    {
        Self {
            state: Mutex::new(SinkState {
                table: new_table(),
                pending: 0,
                out: Box::new(out),
                diag: Box::new(diag),
            }),
        }
    }

    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Append all rows of one group followed by a blank separator, in one
    /// critical section.
    pub async fn write_group(&self, rows: Vec<Row>) {
        let mut state = self.state.lock().await;
        for row in rows {
            state.table.add_row(row.0);
        }
        state.table.add_row(vec![String::new()]);
        state.pending += 1;
    }

    /// Write one line to the diagnostic stream.
    pub async fn report(&self, line: &str) -> io::Result<()> {
        let mut state = self.state.lock().await;
        writeln!(state.diag, "{line}")?;
        state.diag.flush()
    }

    /// Render and write every buffered group.
    pub async fn flush(&self) -> io::Result<()> {
        let mut state = self.state.lock().await;
        if state.pending == 0 {
            return Ok(());
        }

        let mut table = std::mem::replace(&mut state.table, new_table());
        state.pending = 0;
        for column in table.column_iter_mut() {
            column.set_padding((0, COLUMN_GAP));
        }
        for line in table.lines() {
            writeln!(state.out, "{}", line.trim_end())?;
        }
        state.out.flush()
    }
}
