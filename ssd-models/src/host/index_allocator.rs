// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Index allocation with back-pressure.
//!
//! Outgoing requests are stamped with the smallest free tag in
//! `[0, max_index)`; responses arriving on `release_rx` reclaim their tag
//! and wake any emission waiting for capacity.
//!
//! # Ports
//!
//!  - Two [input ports](ssd_engine::port::InPort): `rx`, `release_rx`
//!  - One [output port](ssd_engine::port::OutPort): `tx`

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use ssd_components::{connect_tx, port_rx, take_option};
use ssd_engine::engine::Engine;
use ssd_engine::events::repeated::Repeated;
use ssd_engine::executor::Spawner;
use ssd_engine::port::{InPort, OutPort, PortStateResult};
use ssd_engine::traits::{Event, Runnable};
use ssd_engine::types::{SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::tag::Tagged;
use ssd_track::{enter, exit, trace};

use crate::error::{ErrorKind, ErrorLog};
use crate::model_error;
use crate::packet::Packet;

/// The function used to stamp an allocated tag onto a packet.
pub type IndexSetter = Box<dyn Fn(&mut Packet, u32)>;

/// Counters exposed after a run.
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexAllocatorStats {
    pub total_allocated: usize,
    pub total_released: usize,
    pub release_errors: usize,
}

#[derive(EntityDisplay)]
pub struct IndexAllocator {
    pub entity: Arc<Entity>,
    spawner: Spawner,
    max_index: u32,

    rx: RefCell<Option<InPort<Packet>>>,
    tx: RefCell<Option<OutPort<Packet>>>,
    release_rx: RefCell<Option<InPort<Packet>>>,

    allocated: Rc<RefCell<BTreeSet<u32>>>,
    released: Repeated<()>,
    index_setter: IndexSetter,

    /// Optional host hooks: outstanding counter and completion event fed on
    /// every release.
    outstanding: RefCell<Option<Rc<Cell<usize>>>>,
    completion: RefCell<Option<Repeated<()>>>,

    error_log: ErrorLog,
    stats: Rc<RefCell<IndexAllocatorStats>>,
}

impl IndexAllocator {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        max_index: u32,
        error_log: ErrorLog,
    ) -> Result<Rc<Self>, SimError> {
        let index_setter: IndexSetter = Box::new(|packet, index| {
            packet.set_attribute("index", index as f64);
        });
        Self::new_and_register_with_setter(engine, parent, name, max_index, error_log, index_setter)
    }

    pub fn new_and_register_with_setter(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        max_index: u32,
        error_log: ErrorLog,
        index_setter: IndexSetter,
    ) -> Result<Rc<Self>, SimError> {
        if max_index == 0 {
            return ssd_engine::sim_error!(format!("{name}: max_index must be non-zero"));
        }
        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let tx = OutPort::new(&entity, "tx");
        let release_rx = InPort::new(&entity, "release_rx");
        let rc_self = Rc::new(Self {
            entity,
            spawner: engine.spawner(),
            max_index,
            rx: RefCell::new(Some(rx)),
            tx: RefCell::new(Some(tx)),
            release_rx: RefCell::new(Some(release_rx)),
            allocated: Rc::new(RefCell::new(BTreeSet::new())),
            released: Repeated::default(),
            index_setter,
            outstanding: RefCell::new(None),
            completion: RefCell::new(None),
            error_log,
            stats: Rc::new(RefCell::new(IndexAllocatorStats::default())),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.tx, connect ; port_state)
    }

    pub fn port_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.rx, state)
    }

    pub fn port_release_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.release_rx, state)
    }

    /// Attach the host-side completion hooks fed on every release.
    pub fn set_completion_hooks(&self, outstanding: Rc<Cell<usize>>, completion: Repeated<()>) {
        *self.outstanding.borrow_mut() = Some(outstanding);
        *self.completion.borrow_mut() = Some(completion);
    }

    #[must_use]
    pub fn num_allocated(&self) -> usize {
        self.allocated.borrow().len()
    }

    #[must_use]
    pub fn stats(&self) -> IndexAllocatorStats {
        *self.stats.borrow()
    }

    /// The smallest tag not currently allocated.
    fn smallest_free(&self) -> Option<u32> {
        let allocated = self.allocated.borrow();
        (0..self.max_index).find(|index| !allocated.contains(index))
    }
}

#[async_trait(?Send)]
impl Runnable for IndexAllocator {
    async fn run(&self) -> SimResult {
        // Release worker: reclaim tags as responses arrive
        {
            let entity = self.entity.clone();
            let release_rx = take_option!(self.release_rx);
            let allocated = self.allocated.clone();
            let released = self.released.clone();
            let stats = self.stats.clone();
            let outstanding = self.outstanding.borrow().clone();
            let completion = self.completion.borrow().clone();
            let error_log = self.error_log.clone();
            self.spawner.spawn(async move {
                loop {
                    let packet = release_rx.get()?.await;
                    enter!(entity ; packet.tag());

                    let index = packet.attribute("index") as i64;
                    if index < 0 || !allocated.borrow_mut().remove(&(index as u32)) {
                        stats.borrow_mut().release_errors += 1;
                        model_error!(entity, error_log, ErrorKind::ResourceExhausted ;
                            "release of unallocated index {index}");
                    } else {
                        stats.borrow_mut().total_released += 1;
                        trace!(entity ; "released index {index}");
                    }

                    if let Some(outstanding) = &outstanding {
                        outstanding.set(outstanding.get().saturating_sub(1));
                    }
                    if let Some(completion) = &completion {
                        completion.notify()?;
                    }
                    released.notify()?;
                }
            });
        }

        let rx = take_option!(self.rx);
        let tx = take_option!(self.tx);

        loop {
            let mut packet = rx.get()?.await;
            enter!(self.entity ; packet.tag());

            // Block until a tag is free
            while self.allocated.borrow().len() >= self.max_index as usize {
                self.released.listen().await;
            }

            let index = match self.smallest_free() {
                Some(index) => index,
                None => {
                    // Unreachable while the capacity wait above holds
                    model_error!(self.entity, self.error_log, ErrorKind::ResourceExhausted ;
                        "no free index despite available capacity, falling back to 0");
                    0
                }
            };
            self.allocated.borrow_mut().insert(index);
            (self.index_setter)(&mut packet, index);
            self.stats.borrow_mut().total_allocated += 1;
            trace!(self.entity ; "allocated index {index} to {}", packet);

            exit!(self.entity ; packet.tag());
            tx.put(packet)?.await;
        }
    }
}
