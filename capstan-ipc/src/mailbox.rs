//! Blocking send/recv over a rank-addressed transport, with traffic counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::IpcError;
use crate::protocol::{Envelope, Message, Rank};
use crate::transport::RankTransport;

/// How long `recv` sleeps when the transport has nothing queued. The sole
/// throttle in the receive path, trading worst-case latency against idle
/// CPU. Tune here, not per call.
pub const NO_MESSAGE_POLL: Duration = Duration::from_millis(50);

/// Bytes the transport adds around a payload: the discriminator word plus
/// the length word. Counted into the traffic totals on both sides.
pub const FRAME_ENVELOPE_LEN: usize = 8;

/// Monotonic traffic totals for one process.
///
/// Advisory only: relaxed atomics, never decreasing. Share the `Arc` to
/// read totals without holding a mailbox handle.
#[derive(Debug, Default)]
pub struct MailboxMetrics {
    bytes_sent: AtomicU64,
    bytes_recvd: AtomicU64,
}

impl MailboxMetrics {
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_recvd(&self) -> u64 {
        self.bytes_recvd.load(Ordering::Relaxed)
    }

    fn add_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    fn add_recvd(&self, n: u64) {
        self.bytes_recvd.fetch_add(n, Ordering::Relaxed);
    }
}

/// Sends and receives [`Message`]s over a [`RankTransport`].
pub struct Mailbox<T: RankTransport> {
    transport: T,
    metrics: Arc<MailboxMetrics>,
}

impl<T: RankTransport> Mailbox<T> {
    pub fn new(transport: T) -> Self {
        Self::with_metrics(transport, Arc::default())
    }

    /// Use a caller-owned metrics object, shareable across mailboxes.
    pub fn with_metrics(transport: T, metrics: Arc<MailboxMetrics>) -> Self {
        Self { transport, metrics }
    }

    pub fn metrics(&self) -> Arc<MailboxMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Encode `message` and hand the frame to the transport addressed to
    /// `rank`. On success the framed length is added to the sent total.
    pub fn send(&self, message: &Message, rank: Rank) -> Result<(), IpcError> {
        let frame = message.encode();
        self.transport
            .send(rank, message.message_type() as u32, &frame)?;
        self.metrics
            .add_sent((frame.len() + FRAME_ENVELOPE_LEN) as u64);
        trace!(rank, len = frame.len(), "sent {:?}", message.message_type());
        Ok(())
    }

    /// Block until a message arrives, polling the transport and sleeping
    /// [`NO_MESSAGE_POLL`] between empty probes. The decoded message
    /// carries the sending peer's rank as its source.
    pub fn recv(&self) -> Result<Envelope, IpcError> {
        loop {
            if let Some(delivery) = self.transport.try_recv()? {
                let envelope = Message::decode(delivery.type_tag, &delivery.frame, delivery.source)?;
                self.metrics
                    .add_recvd((delivery.frame.len() + FRAME_ENVELOPE_LEN) as u64);
                debug!(
                    source = envelope.source,
                    "received {:?}",
                    envelope.message.message_type()
                );
                return Ok(envelope);
            }
            thread::sleep(NO_MESSAGE_POLL);
        }
    }

    /// Non-blocking probe, passed through to the transport.
    pub fn message_waiting(&self) -> Result<bool, IpcError> {
        self.transport.message_waiting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackHub;

    #[test]
    fn counters_match_framed_lengths() {
        let hub = LoopbackHub::new(2);
        let master = Mailbox::new(hub.endpoint(0));
        let worker = Mailbox::new(hub.endpoint(1));

        let messages = [
            Message::Hostrank { hostrank: 4 },
            Message::Shutdown,
            Message::Result {
                name: "t".to_string(),
                exitcode: 0,
                runtime: 0.25,
            },
        ];

        let mut expected = 0u64;
        for msg in &messages {
            master.send(msg, 1).unwrap();
            expected += (msg.encode().len() + FRAME_ENVELOPE_LEN) as u64;
        }
        assert_eq!(master.metrics().bytes_sent(), expected);
        assert_eq!(master.metrics().bytes_recvd(), 0);

        for msg in &messages {
            let envelope = worker.recv().unwrap();
            assert_eq!(envelope.source, 0);
            assert_eq!(&envelope.message, msg);
        }
        assert_eq!(worker.metrics().bytes_recvd(), expected);
        assert_eq!(worker.metrics().bytes_sent(), 0);
    }

    #[test]
    fn counters_never_decrease_across_interleavings() {
        let hub = LoopbackHub::new(2);
        let a = Mailbox::new(hub.endpoint(0));
        let b = Mailbox::new(hub.endpoint(1));

        let mut last_sent = 0;
        let mut last_recvd = 0;
        for i in 0..10 {
            a.send(&Message::Hostrank { hostrank: i }, 1).unwrap();
            assert!(a.metrics().bytes_sent() >= last_sent);
            last_sent = a.metrics().bytes_sent();

            b.recv().unwrap();
            assert!(b.metrics().bytes_recvd() >= last_recvd);
            last_recvd = b.metrics().bytes_recvd();
        }
    }

    #[test]
    fn message_waiting_passes_through() {
        let hub = LoopbackHub::new(2);
        let a = Mailbox::new(hub.endpoint(0));
        let b = Mailbox::new(hub.endpoint(1));

        assert!(!b.message_waiting().unwrap());
        a.send(&Message::Shutdown, 1).unwrap();
        assert!(b.message_waiting().unwrap());
        b.recv().unwrap();
        assert!(!b.message_waiting().unwrap());
    }

    #[test]
    fn recv_blocks_until_a_frame_arrives() {
        let hub = LoopbackHub::new(2);
        let sender = Mailbox::new(hub.endpoint(0));
        let receiver = Mailbox::new(hub.endpoint(1));

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(120));
            sender.send(&Message::Hostrank { hostrank: 9 }, 1).unwrap();
        });

        let start = std::time::Instant::now();
        let envelope = receiver.recv().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(envelope.message, Message::Hostrank { hostrank: 9 });
        handle.join().unwrap();
    }

    #[test]
    fn shared_metrics_aggregate_across_mailboxes() {
        let hub = LoopbackHub::new(2);
        let metrics = Arc::new(MailboxMetrics::default());
        let a = Mailbox::with_metrics(hub.endpoint(0), Arc::clone(&metrics));
        let b = Mailbox::with_metrics(hub.endpoint(1), Arc::clone(&metrics));

        a.send(&Message::Shutdown, 1).unwrap();
        b.recv().unwrap();

        assert_eq!(metrics.bytes_sent(), FRAME_ENVELOPE_LEN as u64);
        assert_eq!(metrics.bytes_recvd(), FRAME_ENVELOPE_LEN as u64);
    }
}
