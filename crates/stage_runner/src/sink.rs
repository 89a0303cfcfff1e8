//! Terminal sink: where every finished record ends up

use contracts::RecordView;
use tokio::sync::mpsc;
use tracing::warn;

/// Sending half, shared by all pools and the poll scheduler
///
/// Only the caller whose transition made a record terminal sends it, so
/// each record arrives exactly once.
#[derive(Debug, Clone)]
pub struct TerminalSink {
    tx: mpsc::UnboundedSender<RecordView>,
}

/// Receiving half, owned by the controller
#[derive(Debug)]
pub struct TerminalReceiver {
    rx: mpsc::UnboundedReceiver<RecordView>,
}

pub fn terminal_sink() -> (TerminalSink, TerminalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TerminalSink { tx }, TerminalReceiver { rx })
}

impl TerminalSink {
    pub fn send(&self, record: RecordView) {
        observability::record_task_finished(&record);
        if let Err(e) = self.tx.send(record) {
            warn!(task_id = %e.0.id, "terminal sink closed, completion dropped");
        }
    }
}

impl TerminalReceiver {
    pub async fn recv(&mut self) -> Option<RecordView> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RecordView> {
        self.rx.try_recv().ok()
    }
}
