use binkp_network::{ConnectionEvent, Direction, Events};
use std::sync::atomic::{AtomicU64, Ordering};

/// logs the end of every connection and keeps the statistics reported
/// at every heart beat
#[derive(Default)]
pub struct Report {
    succeeded: AtomicU64,
    failed: AtomicU64,
    files_sent: AtomicU64,
    files_received: AtomicU64,
}

/// a snapshot of the [`Report`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub succeeded: u64,
    pub failed: u64,
    pub files_sent: u64,
    pub files_received: u64,
}

impl Report {
    pub fn statistics(&self) -> Statistics {
        Statistics {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            files_sent: self.files_sent.load(Ordering::Relaxed),
            files_received: self.files_received.load(Ordering::Relaxed),
        }
    }
}

impl Events for Report {
    fn connection_end(&self, event: &ConnectionEvent) {
        if event.is_success() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.files_sent
            .fetch_add(event.totals.files_sent, Ordering::Relaxed);
        self.files_received
            .fetch_add(event.totals.files_received, Ordering::Relaxed);

        let address = event
            .address
            .map_or_else(|| "unknown".to_owned(), |address| address.to_string());
        let direction = match event.direction {
            Direction::Outbound => "called",
            Direction::Inbound => "answered",
        };

        tracing::info!(
            %address,
            remote = %event.remote,
            secure = event.secure,
            outcome = %event.outcome,
            files_sent = event.totals.files_sent,
            files_received = event.totals.files_received,
            bytes_sent = event.totals.bytes_sent,
            bytes_received = event.totals.bytes_received,
            "connection {}",
            direction,
        );
    }
}
