use crate::archiver::FlowArchiver;
use crate::flow::Flow;
use std::future::Future;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

/// Reads newline-delimited JSON flows, skipping lines that do not decode
///
/// Lines are handled as raw bytes so that invalid UTF-8 only costs the line
/// it appears on.
pub struct FlowReader<R> {
    reader: R,
    buf: Vec<u8>,
    line_number: u64,
    skipped: u64,
}

impl<R: AsyncBufRead + Unpin> FlowReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_number: 0,
            skipped: 0,
        }
    }

    /// Next decodable flow, or `None` at end of input
    ///
    /// Only I/O failures of the underlying reader are returned as errors.
    pub async fn next_flow(&mut self) -> io::Result<Option<Flow>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            let line = self.buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_slice::<Flow>(line) {
                Ok(flow) => return Ok(Some(flow)),
                Err(e) => {
                    self.skipped += 1;
                    metrics::counter!("flow_archiver_malformed_lines_total").increment(1);
                    warn!(line = self.line_number, error = %e, "Skipping malformed flow record");
                }
            }
        }
    }

    /// Number of lines dropped because they did not decode
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// Totals for one ingest run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub flows: u64,
    pub skipped: u64,
    pub batches: u64,
}

/// Feed flows from `reader` into the archiver in batches of `batch_size`
///
/// Stops at end of input, when `shutdown` resolves, or on a read error. The
/// pending batch is archived in every case before returning.
pub async fn run_ingest<R, S>(
    archiver: &FlowArchiver,
    reader: R,
    batch_size: usize,
    shutdown: S,
) -> io::Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let batch_size = batch_size.max(1);
    let mut reader = FlowReader::new(reader);
    let mut batch: Vec<Flow> = Vec::with_capacity(batch_size);
    let mut summary = IngestSummary::default();

    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            next = reader.next_flow() => match next {
                Ok(Some(flow)) => {
                    summary.flows += 1;
                    batch.push(flow);
                    if batch.len() >= batch_size {
                        flush(archiver, &mut batch, &mut summary).await;
                    }
                }
                Ok(None) => {
                    info!("Flow input closed");
                    break Ok(());
                }
                Err(e) => break Err(e),
            },
            _ = &mut shutdown => {
                info!("Shutdown requested, flushing pending flows");
                break Ok(());
            }
        }
    };

    flush(archiver, &mut batch, &mut summary).await;
    summary.skipped = reader.skipped();

    outcome.map(|()| summary)
}

async fn flush(archiver: &FlowArchiver, batch: &mut Vec<Flow>, summary: &mut IngestSummary) {
    if batch.is_empty() {
        return;
    }

    debug!(flows = batch.len(), "Flushing flow batch");
    for result in archiver.archive(batch).await {
        if let Err(e) = result {
            error!(error = %e, "Failed to archive flow group");
        }
    }

    summary.batches += 1;
    batch.clear();
}
