use std::sync::Arc;

use uuid::Uuid;

use crate::history::ResultStore;
use crate::registry::{ExecutionEntry, ExecutionRegistry};
use crate::types::{ExecutionRecord, ExecutionSnapshot, ExecutionSummary, OutputChunk, OutputStream};

/// Read-only view over live executions and retained results.
#[derive(Debug, Clone)]
pub struct Reporter {
    registry: Arc<ExecutionRegistry>,
    results: Arc<ResultStore>,
}

impl Reporter {
    pub fn new(registry: Arc<ExecutionRegistry>, results: Arc<ResultStore>) -> Self {
        Self { registry, results }
    }

    /// Live executions, oldest first.
    pub fn list(&self) -> Vec<ExecutionSummary> {
        self.registry.summaries()
    }

    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    pub fn retained_count(&self) -> usize {
        self.results.len()
    }

    pub fn snapshot(&self, id: &Uuid) -> Option<ExecutionSnapshot> {
        if let Some(entry) = self.registry.lookup(id) {
            return Some(live_snapshot(&entry));
        }
        self.results.get(id).map(|record| record.snapshot())
    }

    /// Output of one stream from absolute byte `offset`.
    pub fn output_since(&self, id: &Uuid, stream: OutputStream, offset: u64) -> Option<OutputChunk> {
        if let Some(entry) = self.registry.lookup(id) {
            let read = entry.handle().output().read_since(stream, offset);
            return Some(OutputChunk {
                stream,
                offset: read.offset,
                data: read.data,
                next_offset: read.next_offset,
                truncated: read.truncated,
                finished: read.closed && !entry.handle().is_alive(),
            });
        }
        self.results
            .get(id)
            .map(|record| retained_chunk(&record, stream, offset))
    }
}

fn live_snapshot(entry: &ExecutionEntry) -> ExecutionSnapshot {
    let handle = entry.handle();
    let output = handle.output().snapshot();
    let exit = handle.exit_state();
    ExecutionSnapshot {
        id: entry.id,
        status: entry.status(),
        command: entry.command.clone(),
        working_dir: entry.working_dir.clone(),
        created_at: entry.created_at,
        finished_at: exit.as_ref().map(|e| e.finished_at),
        pid: handle.pid(),
        exit_code: exit.as_ref().and_then(|e| e.code),
        signal: exit.as_ref().and_then(|e| e.signal),
        stdout: output.stdout,
        stderr: output.stderr,
        truncated: output.truncated,
    }
}

/// Slice a retained stream. Offsets are the same raw byte offsets the live
/// buffer handed out.
fn retained_chunk(record: &ExecutionRecord, stream: OutputStream, offset: u64) -> OutputChunk {
    let read = record.window(stream).read_since(offset, true);
    OutputChunk {
        stream,
        offset: read.offset,
        data: read.data,
        next_offset: read.next_offset,
        truncated: read.truncated,
        finished: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::StreamWindow;
    use crate::types::ExecutionStatus;
    use chrono::Utc;
    use std::time::Duration;

    fn record(stdout: &[u8], dropped: u64) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4(),
            status: ExecutionStatus::Completed,
            command: "build".into(),
            working_dir: "/srv/p".into(),
            created_at: Utc::now(),
            finished_at: Utc::now(),
            exit_code: Some(0),
            signal: None,
            stdout: StreamWindow {
                data: stdout.to_vec(),
                dropped,
            },
            stderr: StreamWindow::default(),
        }
    }

    #[test]
    fn retained_chunk_from_offset() {
        let r = record(b"hello\nworld\n", 0);
        let chunk = retained_chunk(&r, OutputStream::Stdout, 6);
        assert_eq!(chunk.data, "world\n");
        assert_eq!(chunk.next_offset, 12);
        assert!(chunk.finished);
        assert!(!chunk.truncated);

        let chunk = retained_chunk(&r, OutputStream::Stdout, 40);
        assert_eq!(chunk.data, "");
        assert_eq!(chunk.next_offset, 12);
    }

    #[test]
    fn retained_chunk_before_window() {
        // 100 bytes were produced, only the last 4 kept.
        let r = record(b"tail", 96);
        let chunk = retained_chunk(&r, OutputStream::Stdout, 0);
        assert!(chunk.truncated);
        assert_eq!(chunk.offset, 96);
        assert_eq!(chunk.data, "tail");
    }

    #[test]
    fn retained_offsets_count_raw_bytes() {
        let r = record(b"\xffabc", 0);
        let chunk = retained_chunk(&r, OutputStream::Stdout, 4);
        assert_eq!(chunk.data, "");
        assert_eq!((chunk.offset, chunk.next_offset), (4, 4));

        let chunk = retained_chunk(&r, OutputStream::Stdout, 0);
        assert_eq!(chunk.data, "\u{fffd}abc");
        assert_eq!(chunk.next_offset, 4);
        assert_eq!(r.snapshot().stdout, "\u{fffd}abc");
    }

    #[test]
    fn unknown_id_is_none() {
        let reporter = Reporter::new(
            Arc::new(ExecutionRegistry::new()),
            Arc::new(ResultStore::new(8, Duration::from_secs(60))),
        );
        let id = Uuid::new_v4();
        assert!(reporter.snapshot(&id).is_none());
        assert!(reporter.output_since(&id, OutputStream::Stdout, 0).is_none());
        assert!(reporter.list().is_empty());
    }

    #[test]
    fn retained_record_is_visible() {
        let results = Arc::new(ResultStore::new(8, Duration::from_secs(60)));
        let r = record(b"done\n", 0);
        let id = r.id;
        results.insert(r);
        let reporter = Reporter::new(Arc::new(ExecutionRegistry::new()), results);

        let snap = reporter.snapshot(&id).unwrap();
        assert_eq!(snap.status, ExecutionStatus::Completed);
        assert_eq!(snap.stdout, "done\n");
        assert!(reporter.list().is_empty());
        assert_eq!(reporter.retained_count(), 1);
    }
}
