// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The shared memory abstraction and the per-core memory client.
//!
//! [`SharedMemory`] is the single resource shared across components. It is
//! a passive object: `send` resolves the access against the backing store
//! immediately and queues the reply with a due cycle of `now +
//! delay_ticks`. A client only observes replies once the simulation clock
//! has reached their due cycle, so response timing is independent of task
//! interleaving within a cycle.
//!
//! Untimed bulk writes are only permitted before the run starts (the
//! weight-loader init window); the memory seals itself when its task is
//! first polled.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use async_trait::async_trait;
use snn_engine::engine::Engine;
use snn_engine::sim_error;
use snn_engine::traits::Runnable;
use snn_engine::types::{SimError, SimResult};
use snn_model_builder::EntityDisplay;
use snn_track::entity::Entity;
use snn_track::{info, warn};

use crate::weight_cache::MergeRange;

/// Identifies one outstanding request.
pub type RequestId = u64;

/// A request to the memory subsystem.
#[derive(Clone, Debug)]
pub enum MemoryCommand {
    /// Read `size` bytes starting at `addr`.
    Read {
        /// Start address.
        addr: u64,
        /// Bytes to read.
        size: usize,
    },
    /// Write `bytes` at `addr`; a posted write produces no ack.
    Write {
        /// Start address.
        addr: u64,
        /// The data to write.
        bytes: Vec<u8>,
        /// Posted writes complete without a [`MemoryReply::WriteAck`].
        posted: bool,
    },
}

/// A reply delivered asynchronously to the requesting client.
#[derive(Clone, Debug)]
pub enum MemoryReply {
    /// The data for a read.
    ReadResp {
        /// The id of the originating request.
        id: RequestId,
        /// The bytes read.
        bytes: Vec<u8>,
    },
    /// Acknowledge for a non-posted write.
    WriteAck {
        /// The id of the originating request.
        id: RequestId,
    },
}

impl MemoryReply {
    /// The id of the originating request.
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            MemoryReply::ReadResp { id, .. } | MemoryReply::WriteAck { id } => *id,
        }
    }
}

/// Memory configuration.
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// First byte address served by this memory.
    pub base_address: u64,
    /// Bytes of backing store.
    pub capacity_bytes: usize,
    /// Cycles between a request and its reply becoming visible.
    pub delay_ticks: u64,
}

#[derive(Default)]
struct MemoryMetrics {
    bytes_read: u64,
    bytes_written: u64,
    requests: u64,
}

struct ClientQueue {
    replies: RefCell<VecDeque<(u64, MemoryReply)>>,
}

/// The shared backing memory.
#[derive(EntityDisplay)]
pub struct SharedMemory {
    /// The entity of this memory in the simulation hierarchy.
    pub entity: Rc<Entity>,
    config: MemoryConfig,
    data: RefCell<Vec<u8>>,
    sealed: Cell<bool>,
    next_request_id: Cell<RequestId>,
    clients: RefCell<Vec<Rc<ClientQueue>>>,
    metrics: RefCell<MemoryMetrics>,
}

impl SharedMemory {
    /// Create and register the memory.
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        config: MemoryConfig,
    ) -> Result<Rc<Self>, SimError> {
        if config.capacity_bytes == 0 {
            return sim_error!("memory needs a non-zero capacity");
        }
        let entity = Rc::new(Entity::new(parent, name));
        let data = vec![0u8; config.capacity_bytes];
        let rc_self = Rc::new(Self {
            entity,
            config,
            data: RefCell::new(data),
            sealed: Cell::new(false),
            next_request_id: Cell::new(1),
            clients: RefCell::new(Vec::new()),
            metrics: RefCell::new(MemoryMetrics::default()),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    /// Create a port through which one client issues requests and drains
    /// replies.
    pub fn connect(self: &Rc<Self>) -> MemoryPort {
        let queue = Rc::new(ClientQueue {
            replies: RefCell::new(VecDeque::new()),
        });
        self.clients.borrow_mut().push(queue.clone());
        MemoryPort {
            memory: self.clone(),
            queue,
        }
    }

    /// Bulk write without timing, permitted during init only.
    pub fn write_untimed(&self, addr: u64, bytes: &[u8]) -> SimResult {
        if self.sealed.get() {
            return sim_error!("{}: untimed write after init", self.entity);
        }
        let offset = self.check_range(addr, bytes.len())?;
        self.data.borrow_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.metrics.borrow_mut().bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Read without timing, used by verification tooling and tests.
    pub fn peek(&self, addr: u64, size: usize) -> Result<Vec<u8>, SimError> {
        let offset = self.check_range(addr, size)?;
        Ok(self.data.borrow()[offset..offset + size].to_vec())
    }

    /// Total bytes served to readers.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.metrics.borrow().bytes_read
    }

    /// Total bytes written, including untimed init writes.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.metrics.borrow().bytes_written
    }

    fn check_range(&self, addr: u64, size: usize) -> Result<usize, SimError> {
        let end = addr + size as u64;
        let config = &self.config;
        if addr < config.base_address
            || end > config.base_address + config.capacity_bytes as u64
        {
            return sim_error!(
                "{}: access [{addr:#x}, {end:#x}) outside memory range",
                self.entity
            );
        }
        Ok((addr - config.base_address) as usize)
    }

    fn handle(
        &self,
        command: MemoryCommand,
        now: u64,
        queue: &Rc<ClientQueue>,
    ) -> Result<RequestId, SimError> {
        let id = self.next_request_id.get();
        self.next_request_id.set(id + 1);
        self.metrics.borrow_mut().requests += 1;

        let due = now + self.config.delay_ticks;
        match command {
            MemoryCommand::Read { addr, size } => {
                let offset = self.check_range(addr, size)?;
                let bytes = self.data.borrow()[offset..offset + size].to_vec();
                self.metrics.borrow_mut().bytes_read += size as u64;
                queue
                    .replies
                    .borrow_mut()
                    .push_back((due, MemoryReply::ReadResp { id, bytes }));
            }
            MemoryCommand::Write {
                addr,
                bytes,
                posted,
            } => {
                if !self.sealed.get() {
                    return sim_error!("{}: timed write during init", self.entity);
                }
                let offset = self.check_range(addr, bytes.len())?;
                self.data.borrow_mut()[offset..offset + bytes.len()].copy_from_slice(&bytes);
                self.metrics.borrow_mut().bytes_written += bytes.len() as u64;
                if !posted {
                    queue
                        .replies
                        .borrow_mut()
                        .push_back((due, MemoryReply::WriteAck { id }));
                }
            }
        }
        Ok(id)
    }
}

#[async_trait(?Send)]
impl Runnable for SharedMemory {
    async fn run(&self) -> SimResult {
        // The init window closes once the run phase starts.
        self.sealed.set(true);
        Ok(())
    }

    fn finish(&self) {
        let metrics = self.metrics.borrow();
        info!(self.entity ; "requests={} bytes_read={} bytes_written={}",
            metrics.requests, metrics.bytes_read, metrics.bytes_written);
    }
}

/// One client's connection to the [`SharedMemory`].
#[derive(Clone)]
pub struct MemoryPort {
    memory: Rc<SharedMemory>,
    queue: Rc<ClientQueue>,
}

impl MemoryPort {
    /// Issue a request; the reply becomes visible `delay_ticks` later.
    pub fn send(&self, command: MemoryCommand, now: u64) -> Result<RequestId, SimError> {
        self.memory.handle(command, now, &self.queue)
    }

    /// Take all replies whose due cycle has been reached.
    pub fn drain_ready(&self, now: u64) -> Vec<MemoryReply> {
        let mut replies = self.queue.replies.borrow_mut();
        let mut ready = Vec::new();
        while replies.front().is_some_and(|(due, _)| *due <= now) {
            ready.push(replies.pop_front().unwrap().1);
        }
        ready
    }

    /// Replies queued but not yet drained.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.replies.borrow().len()
    }
}

/// What a weight fetch was issued for.
#[derive(Clone, Debug)]
pub enum FetchOrigin {
    /// Populate the weight cache.
    CacheFill,
    /// A verification sample to compare against the expected weight.
    Verify {
        /// The sampled post index.
        post: u32,
    },
}

/// One outstanding weight fetch.
#[derive(Clone, Debug)]
pub struct PendingFetch {
    /// The merged range the fetch covers.
    pub range: MergeRange,
    /// Why the fetch was issued.
    pub origin: FetchOrigin,
}

/// Issues weight reads and correlates the replies by request id.
///
/// Keeps the pending-request table bounded: entries are removed as soon as
/// their reply arrives, at most `max_outstanding` fetches are in flight,
/// and one merged range never has two concurrent fetches.
pub struct MemoryClient {
    entity: Rc<Entity>,
    port: MemoryPort,
    pending: HashMap<RequestId, PendingFetch>,
    in_flight_ranges: HashMap<u64, RequestId>,
    max_outstanding: usize,
    requests_issued: u64,
    unknown_replies: u64,
}

impl MemoryClient {
    /// Create a client over a memory port.
    #[must_use]
    pub fn new(entity: Rc<Entity>, port: MemoryPort, max_outstanding: usize) -> Self {
        Self {
            entity,
            port,
            pending: HashMap::new(),
            in_flight_ranges: HashMap::new(),
            max_outstanding,
            requests_issued: 0,
            unknown_replies: 0,
        }
    }

    /// Issue a merged read of `range` at `addr`.
    ///
    /// Returns `Ok(false)` without issuing when the range is already in
    /// flight (the miss coalesces onto it) or the outstanding limit is
    /// reached.
    pub fn fetch(
        &mut self,
        addr: u64,
        range: MergeRange,
        origin: FetchOrigin,
        now: u64,
    ) -> Result<bool, SimError> {
        if matches!(origin, FetchOrigin::CacheFill) {
            if self.in_flight_ranges.contains_key(&range.key()) {
                return Ok(false);
            }
            if self.pending.len() >= self.max_outstanding {
                return Ok(false);
            }
        }

        let id = self.port.send(
            MemoryCommand::Read {
                addr,
                size: (range.count * 4) as usize,
            },
            now,
        )?;
        if matches!(origin, FetchOrigin::CacheFill) {
            self.in_flight_ranges.insert(range.key(), id);
        }
        self.pending.insert(id, PendingFetch { range, origin });
        self.requests_issued += 1;
        Ok(true)
    }

    /// Collect the fetches whose replies are due, as `(fetch, f32 values)`.
    ///
    /// A reply with an unknown request id is logged and ignored.
    pub fn drain(&mut self, now: u64) -> Vec<(PendingFetch, Vec<f32>)> {
        let mut filled = Vec::new();
        for reply in self.port.drain_ready(now) {
            let id = reply.id();
            let Some(fetch) = self.pending.remove(&id) else {
                warn!(self.entity ; "reply for unknown request id {id}");
                self.unknown_replies += 1;
                continue;
            };
            if matches!(fetch.origin, FetchOrigin::CacheFill) {
                self.in_flight_ranges.remove(&fetch.range.key());
            }
            match reply {
                MemoryReply::ReadResp { bytes, .. } => {
                    let values = bytes
                        .chunks_exact(4)
                        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
                        .collect();
                    filled.push((fetch, values));
                }
                MemoryReply::WriteAck { .. } => {}
            }
        }
        filled
    }

    /// Fetches still waiting for a reply.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Total reads issued.
    #[must_use]
    pub fn requests_issued(&self) -> u64 {
        self.requests_issued
    }
}
