//! Thin façade over in-process or inter-process (MPI) message passing.
//!
//! Unlike a one-shot isend/irecv interface, the exchange protocol reuses the
//! same (peer, tag) pair every iteration, so the façade hands out *persistent
//! channels*: open once at setup, then `start` / `test` / `wait` per cycle.
//! Dropping a channel frees it. At most one operation is outstanding per
//! channel at any time; `clear` waits out in-flight sends before the next
//! cycle starts.
//!
//! Payloads are `f64` slices. A zero-length payload is the *null message*:
//! the sender's sparsely-allocated variable holds no data for this cycle and
//! the receiver zero-fills or skips.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::BvalsError;

/// What a receive completed with.
#[derive(Clone, Debug, PartialEq)]
pub enum RecvPayload {
    /// A regular data message.
    Data(Vec<f64>),
    /// A zero-length message: the sender has nothing allocated.
    Null,
}

impl RecvPayload {
    fn from_bytes(bytes: &Bytes) -> Self {
        if bytes.is_empty() {
            RecvPayload::Null
        } else {
            RecvPayload::Data(bytemuck::cast_slice::<u8, f64>(bytes).to_vec())
        }
    }
}

/// Persistent sending endpoint for one (peer, tag) pair.
pub trait SendChannel: Send {
    /// Begins transferring `data`. An empty slice sends the null message.
    ///
    /// # Errors
    /// Implementations may reject a `start` while a previous transfer is
    /// still in flight.
    fn start(&mut self, data: &[f64]) -> Result<(), BvalsError>;

    /// Returns true once the in-flight transfer (if any) has completed.
    fn test(&mut self) -> bool;

    /// Blocks until the in-flight transfer (if any) has completed.
    fn wait(&mut self);
}

/// Persistent receiving endpoint for one (peer, tag) pair.
pub trait RecvChannel: Send {
    /// Arms the channel for the next incoming message.
    fn start(&mut self);

    /// Returns true if a message is available to `take`.
    fn test(&mut self) -> bool;

    /// Removes and returns the arrived message, if any.
    fn take(&mut self) -> Option<RecvPayload>;

    /// Blocks until a message arrives and returns it.
    fn wait(&mut self) -> RecvPayload;
}

/// Factory for persistent channels plus rank identity.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    /// Opens a persistent send channel to `peer` under `tag`.
    fn send_channel(&self, peer: usize, tag: u64, capacity: usize) -> Box<dyn SendChannel>;

    /// Opens a persistent receive channel from `peer` under `tag`.
    /// `capacity` is the worst-case element count a message may carry.
    fn recv_channel(&self, peer: usize, tag: u64, capacity: usize) -> Box<dyn RecvChannel>;
}

/// Deterministic channel tag: receiver-side local block id, receiver-side
/// boundary slot, and a per-variable physics channel id. Both ends derive
/// the same tag with no handshake.
#[inline]
pub fn comm_tag(recv_lid: u64, recv_bufid: usize, phys: u64) -> u64 {
    (recv_lid << 11) | ((recv_bufid as u64) << 5) | phys
}

// --- NoComm: single-rank runs with no cross-rank neighbors ---

/// No-op communicator for pure serial runs. Channels handed out by `NoComm`
/// complete immediately and never carry data; the exchange layer only opens
/// channels for cross-rank neighbors, of which a serial run has none.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

struct NoSend;
struct NoRecv;

impl SendChannel for NoSend {
    fn start(&mut self, _data: &[f64]) -> Result<(), BvalsError> {
        Ok(())
    }
    fn test(&mut self) -> bool {
        true
    }
    fn wait(&mut self) {}
}

impl RecvChannel for NoRecv {
    fn start(&mut self) {}
    fn test(&mut self) -> bool {
        false
    }
    fn take(&mut self) -> Option<RecvPayload> {
        None
    }
    fn wait(&mut self) -> RecvPayload {
        RecvPayload::Null
    }
}

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn world_size(&self) -> usize {
        1
    }
    fn send_channel(&self, _peer: usize, _tag: u64, _capacity: usize) -> Box<dyn SendChannel> {
        Box::new(NoSend)
    }
    fn recv_channel(&self, _peer: usize, _tag: u64, _capacity: usize) -> Box<dyn RecvChannel> {
        Box::new(NoRecv)
    }
}

// --- MailboxComm: intra-process ranks sharing a global mailbox ---

type Key = (usize, usize, u64); // (src, dst, tag)

static MAILBOX: Lazy<DashMap<Key, Bytes>> = Lazy::new(DashMap::new);

/// In-process communicator: every "rank" lives in the same address space and
/// messages pass through a global mailbox keyed by (src, dst, tag). A send
/// completes as soon as the mailbox owns a copy of the payload.
///
/// Tests sharing the mailbox must run serially and call [`MailboxComm::clear_all`]
/// between scenarios.
#[derive(Clone, Debug)]
pub struct MailboxComm {
    rank: usize,
    world_size: usize,
}

impl MailboxComm {
    pub fn new(rank: usize, world_size: usize) -> Self {
        Self { rank, world_size }
    }

    /// Drops every undelivered message. Test isolation only.
    pub fn clear_all() {
        MAILBOX.clear();
    }
}

struct MailboxSend {
    key: Key,
}

impl SendChannel for MailboxSend {
    fn start(&mut self, data: &[f64]) -> Result<(), BvalsError> {
        let bytes = Bytes::from(bytemuck::cast_slice::<f64, u8>(data).to_vec());
        MAILBOX.insert(self.key, bytes);
        Ok(())
    }
    fn test(&mut self) -> bool {
        true
    }
    fn wait(&mut self) {}
}

struct MailboxRecv {
    key: Key,
}

impl RecvChannel for MailboxRecv {
    fn start(&mut self) {}

    fn test(&mut self) -> bool {
        MAILBOX.contains_key(&self.key)
    }

    fn take(&mut self) -> Option<RecvPayload> {
        MAILBOX
            .remove(&self.key)
            .map(|(_, bytes)| RecvPayload::from_bytes(&bytes))
    }

    fn wait(&mut self) -> RecvPayload {
        loop {
            if let Some(payload) = self.take() {
                return payload;
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for MailboxComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn world_size(&self) -> usize {
        self.world_size
    }
    fn send_channel(&self, peer: usize, tag: u64, _capacity: usize) -> Box<dyn SendChannel> {
        Box::new(MailboxSend {
            key: (self.rank, peer, tag),
        })
    }
    fn recv_channel(&self, peer: usize, tag: u64, _capacity: usize) -> Box<dyn RecvChannel> {
        Box::new(MailboxRecv {
            key: (peer, self.rank, tag),
        })
    }
}

// --- MPI backend (feature = "mpi-support") ---

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI-backed communicator over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        _universe: mpi::environment::Universe,
        rank: usize,
        world_size: usize,
    }

    impl MpiComm {
        /// Initializes the MPI environment.
        ///
        /// # Panics
        /// Panics if MPI was already initialized by other means.
        pub fn new() -> Self {
            let universe = mpi::initialize().expect("MPI already initialized");
            let world = universe.world();
            Self {
                rank: world.rank() as usize,
                world_size: world.size() as usize,
                _universe: universe,
            }
        }
    }

    struct MpiSend {
        peer: i32,
        tag: i32,
    }

    impl SendChannel for MpiSend {
        fn start(&mut self, data: &[f64]) -> Result<(), BvalsError> {
            let world = SimpleCommunicator::world();
            world
                .process_at_rank(self.peer)
                .send_with_tag(data, self.tag);
            Ok(())
        }
        fn test(&mut self) -> bool {
            true
        }
        fn wait(&mut self) {}
    }

    struct MpiRecv {
        peer: i32,
        tag: i32,
        pending: Option<RecvPayload>,
    }

    impl MpiRecv {
        fn poll(&mut self, blocking: bool) {
            if self.pending.is_some() {
                return;
            }
            let world = SimpleCommunicator::world();
            let process = world.process_at_rank(self.peer);
            if !blocking {
                let probed = process.immediate_matched_probe_with_tag(self.tag);
                let Some((msg, _status)) = probed else {
                    return;
                };
                let (data, _status) = msg.matched_receive_vec::<f64>();
                self.pending = Some(if data.is_empty() {
                    RecvPayload::Null
                } else {
                    RecvPayload::Data(data)
                });
            } else {
                let (data, _status) = process.receive_vec_with_tag::<f64>(self.tag);
                self.pending = Some(if data.is_empty() {
                    RecvPayload::Null
                } else {
                    RecvPayload::Data(data)
                });
            }
        }
    }

    impl RecvChannel for MpiRecv {
        fn start(&mut self) {
            self.pending = None;
        }
        fn test(&mut self) -> bool {
            self.poll(false);
            self.pending.is_some()
        }
        fn take(&mut self) -> Option<RecvPayload> {
            self.poll(false);
            self.pending.take()
        }
        fn wait(&mut self) -> RecvPayload {
            self.poll(true);
            self.pending.take().unwrap_or(RecvPayload::Null)
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }
        fn world_size(&self) -> usize {
            self.world_size
        }
        fn send_channel(&self, peer: usize, tag: u64, _capacity: usize) -> Box<dyn SendChannel> {
            Box::new(MpiSend {
                peer: peer as i32,
                tag: (tag & 0x7fff_ffff) as i32,
            })
        }
        fn recv_channel(&self, peer: usize, tag: u64, _capacity: usize) -> Box<dyn RecvChannel> {
            Box::new(MpiRecv {
                peer: peer as i32,
                tag: (tag & 0x7fff_ffff) as i32,
                pending: None,
            })
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn mailbox_roundtrip_two_ranks() {
        MailboxComm::clear_all();
        let comm0 = MailboxComm::new(0, 2);
        let comm1 = MailboxComm::new(1, 2);

        let mut tx = comm0.send_channel(1, 7, 4);
        let mut rx = comm1.recv_channel(0, 7, 4);

        rx.start();
        assert!(!rx.test(), "nothing sent yet");
        tx.start(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        tx.wait();

        assert!(rx.test());
        match rx.take().unwrap() {
            RecvPayload::Data(data) => assert_eq!(data, vec![1.0, 2.0, 3.0, 4.0]),
            RecvPayload::Null => panic!("expected data"),
        }
        assert!(!rx.test(), "message consumed");
    }

    #[test]
    #[serial]
    fn empty_payload_is_null_message() {
        MailboxComm::clear_all();
        let comm0 = MailboxComm::new(0, 2);
        let comm1 = MailboxComm::new(1, 2);

        let mut tx = comm0.send_channel(1, 3, 8);
        let mut rx = comm1.recv_channel(0, 3, 8);
        tx.start(&[]).unwrap();
        assert_eq!(rx.wait(), RecvPayload::Null);
    }

    #[test]
    #[serial]
    fn tags_keep_channels_apart() {
        MailboxComm::clear_all();
        let comm0 = MailboxComm::new(0, 2);
        let comm1 = MailboxComm::new(1, 2);

        let mut tx_a = comm0.send_channel(1, comm_tag(0, 0, 0), 1);
        let mut tx_b = comm0.send_channel(1, comm_tag(0, 1, 0), 1);
        let mut rx_b = comm1.recv_channel(0, comm_tag(0, 1, 0), 1);

        tx_a.start(&[1.0]).unwrap();
        tx_b.start(&[2.0]).unwrap();
        match rx_b.take().unwrap() {
            RecvPayload::Data(data) => assert_eq!(data, vec![2.0]),
            RecvPayload::Null => panic!("expected data"),
        }
    }

    #[test]
    fn comm_tag_packs_fields() {
        assert_eq!(comm_tag(0, 0, 0), 0);
        assert_eq!(comm_tag(1, 0, 0), 1 << 11);
        assert_eq!(comm_tag(0, 1, 0), 1 << 5);
        assert_eq!(comm_tag(0, 0, 3), 3);
        assert_eq!(comm_tag(2, 5, 1), (2 << 11) | (5 << 5) | 1);
    }

    #[test]
    fn no_comm_is_inert() {
        let comm = NoComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.world_size(), 1);
        let mut tx = comm.send_channel(0, 0, 4);
        tx.start(&[1.0]).unwrap();
        assert!(tx.test());
        let mut rx = comm.recv_channel(0, 0, 4);
        assert!(rx.take().is_none());
    }
}
