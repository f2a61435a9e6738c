use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use tokio_util::sync::CancellationToken;

/// Process-wide counter for connection ids.
static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    Handshaking = 0,
    Running = 1,
    Closing = 2,
    Closed = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Handshaking,
            1 => Phase::Running,
            2 => Phase::Closing,
            _ => Phase::Closed,
        }
    }
}

/// Shared view of one connection, held by the registry and by the task
/// serving it.
///
/// Stopping comes in two strengths. [`request_stop`](Self::request_stop) only
/// moves the connection to `Closing`; the serving task notices at the top of
/// its loop, after any in-flight response is written.
/// [`force_close`](Self::force_close) also interrupts a pending read or write
/// and waits until the task has released the session and the transport.
/// Either way the release itself runs exactly once.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: u32,
    phase: AtomicU8,
    released: AtomicBool,
    interrupt: CancellationToken,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            phase: AtomicU8::new(Phase::Handshaking as u8),
            released: AtomicBool::new(false),
            interrupt: CancellationToken::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Handshaking -> Running. Fails if a stop was requested meanwhile.
    pub(crate) fn mark_running(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Handshaking as u8,
                Phase::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Asks the serving task to stop after its current cycle.
    pub fn request_stop(&self) {
        let _ = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                (p < Phase::Closing as u8).then_some(Phase::Closing as u8)
            });
    }

    /// Stops the connection from outside its task and waits until the
    /// session and the transport have been released.
    pub async fn force_close(&self) {
        self.request_stop();
        self.interrupt.cancel();
        self.closed.cancelled().await;
    }

    /// Waits until the connection has been released.
    pub async fn wait_closed(&self) {
        self.closed.cancelled().await;
    }

    pub(crate) fn interrupt(&self) -> &CancellationToken {
        &self.interrupt
    }

    /// Claims the release. Only the first caller gets `true`.
    pub(crate) fn begin_release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn finish_release(&self) {
        self.phase.store(Phase::Closed as u8, Ordering::Release);
        self.closed.cancel();
    }
}
