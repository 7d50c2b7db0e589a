// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A data store
//!
//! The [Store] is a component that can hold a number of items defined by its
//! capacity. It is the bounded FIFO channel of the simulator: the sender is
//! blocked exactly when `capacity` items are buffered and the receiver is
//! blocked while the store is empty. Values leave in the order they arrived.
//!
//! # Ports
//!
//! This component has two ports:
//!  - One [input port](ssd_engine::port::InPort): `rx`
//!  - One [output port](ssd_engine::port::OutPort): `tx`

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use ssd_engine::engine::Engine;
use ssd_engine::events::repeated::Repeated;
use ssd_engine::executor::Spawner;
use ssd_engine::port::{InPort, OutPort, PortStateResult};
use ssd_engine::traits::{Event, Runnable, SimObject};
use ssd_engine::types::{SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::{enter, exit};

use crate::{connect_tx, port_rx, take_option};

/// The [`State`] of a [`Store`].
struct State<T>
where
    T: SimObject,
{
    entity: Arc<Entity>,
    capacity: usize,
    data: RefCell<VecDeque<T>>,
    level_change: Repeated<usize>,
}

impl<T> State<T>
where
    T: SimObject,
{
    fn new(entity: &Arc<Entity>, capacity: usize) -> Self {
        Self {
            entity: entity.clone(),
            capacity,
            data: RefCell::new(VecDeque::with_capacity(capacity)),
            level_change: Repeated::new(usize::default()),
        }
    }

    /// Place an object into the store state.
    ///
    /// There must be room before this is called.
    fn push_value(&self, value: T) {
        enter!(self.entity ; value.tag());
        assert!(self.data.borrow().len() < self.capacity);

        self.data.borrow_mut().push_back(value);
        self.level_change
            .notify_result(self.data.borrow().len())
            .unwrap();
    }

    /// Remove an object from the store state.
    ///
    /// There must be an object available to remove before this is called.
    fn pop_value(&self) -> T {
        let value = self.data.borrow_mut().pop_front().unwrap();
        self.level_change
            .notify_result(self.data.borrow().len())
            .unwrap();
        exit!(self.entity ; value.tag());
        value
    }
}

/// A component that can buffer a configurable number of objects.
///
/// Objects must support the [SimObject] trait.
#[derive(EntityDisplay)]
pub struct Store<T>
where
    T: SimObject,
{
    pub entity: Arc<Entity>,
    spawner: Spawner,
    state: Rc<State<T>>,

    tx: RefCell<Option<OutPort<T>>>,
    rx: RefCell<Option<InPort<T>>>,
}

impl<T> Store<T>
where
    T: SimObject,
{
    /// Basic store constructor.
    ///
    /// A zero-capacity store cannot make progress and is rejected.
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        capacity: usize,
    ) -> Result<Rc<Self>, SimError> {
        if capacity == 0 {
            return ssd_engine::sim_error!(format!("{name}: unsupported Store with 0 capacity"));
        }
        let entity = Arc::new(Entity::new(parent, name));
        let state = Rc::new(State::new(&entity, capacity));
        let tx = OutPort::new(&entity, "tx");
        let rx = InPort::new(&entity, "rx");
        let rc_self = Rc::new(Self {
            entity,
            spawner: engine.spawner(),
            state,
            tx: RefCell::new(Some(tx)),
            rx: RefCell::new(Some(rx)),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_tx(&self, port_state: PortStateResult<T>) -> SimResult {
        connect_tx!(self.tx, connect ; port_state)
    }

    pub fn port_rx(&self) -> PortStateResult<T> {
        port_rx!(self.rx, state)
    }

    #[must_use]
    pub fn fill_level(&self) -> usize {
        self.state.data.borrow().len()
    }

    #[must_use]
    pub fn get_level_change_event(&self) -> Repeated<usize> {
        self.state.level_change.clone()
    }
}

#[async_trait(?Send)]
impl<T> Runnable for Store<T>
where
    T: SimObject,
{
    async fn run(&self) -> SimResult {
        let rx = take_option!(self.rx);
        let state = self.state.clone();
        self.spawner.spawn(async move { run_rx(rx, state).await });

        let tx = take_option!(self.tx);
        let state = self.state.clone();
        self.spawner.spawn(async move { run_tx(tx, state).await });
        Ok(())
    }
}

async fn run_rx<T>(rx: InPort<T>, state: Rc<State<T>>) -> SimResult
where
    T: SimObject,
{
    let level_change = state.level_change.clone();
    loop {
        let level = state.data.borrow().len();
        if level < state.capacity {
            let value = rx.get()?.await;
            state.push_value(value);
        } else {
            level_change.listen().await;
        }
    }
}

async fn run_tx<T>(tx: OutPort<T>, state: Rc<State<T>>) -> SimResult
where
    T: SimObject,
{
    let level_change = state.level_change.clone();
    loop {
        let level = state.data.borrow().len();
        if level > 0 {
            // Wait for something to actually want the store value
            tx.try_put()?.await;
            let value = state.pop_value();
            tx.put(value)?.await;
        } else {
            level_change.listen().await;
        }
    }
}
