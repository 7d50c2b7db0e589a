// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Perform arbitration between a number of interfaces.
//!
//! # Ports
//!
//! This component has `N`-input ports and one output:
//!  - N [input ports](ssd_engine::port::InPort): `rx[i]` for `i in [0, N-1]`
//!  - One [output port](ssd_engine::port::OutPort): `tx`

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use ssd_engine::engine::Engine;
use ssd_engine::events::once::Once;
use ssd_engine::executor::Spawner;
use ssd_engine::port::{InPort, OutPort, PortStateResult};
use ssd_engine::traits::{Event, Runnable, SimObject};
use ssd_engine::types::{SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::{enter, exit, trace};

use crate::{connect_tx, take_option};

#[derive(Default)]
struct ArbiterSharedState<T> {
    active: RefCell<Vec<Option<T>>>,
    arbiter_event: RefCell<Option<Once<()>>>,
    waiting_put: Vec<RefCell<Option<Once<()>>>>,
}

impl<T> ArbiterSharedState<T> {
    fn new(capacity: usize) -> Self {
        Self {
            active: RefCell::new((0..capacity).map(|_| None).collect()),
            arbiter_event: RefCell::new(None),
            waiting_put: (0..capacity).map(|_| RefCell::new(None)).collect(),
        }
    }
}

pub trait Arbitrate<T>
where
    T: SimObject,
{
    fn arbitrate(&mut self, entity: &Arc<Entity>, inputs: &mut [Option<T>]) -> Option<(usize, T)>;
}

pub struct RoundRobinPolicy {
    candidate: usize,
}

impl RoundRobinPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self { candidate: 0 }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arbitrate<T> for RoundRobinPolicy
where
    T: SimObject,
{
    fn arbitrate(&mut self, _entity: &Arc<Entity>, inputs: &mut [Option<T>]) -> Option<(usize, T)> {
        let num_inputs = inputs.len();
        for i in 0..num_inputs {
            let index = (i + self.candidate) % num_inputs;
            if let Some(value) = inputs[index].take() {
                self.candidate = (index + 1) % num_inputs;
                return Some((index, value));
            }
        }
        None
    }
}

#[derive(EntityDisplay)]
pub struct Arbiter<T>
where
    T: SimObject,
{
    pub entity: Arc<Entity>,
    rx: RefCell<Vec<Option<InPort<T>>>>,
    tx: RefCell<Option<OutPort<T>>>,
    policy: RefCell<Option<Box<dyn Arbitrate<T>>>>,
    shared_state: Rc<ArbiterSharedState<T>>,
    spawner: Spawner,
}

impl<T> Arbiter<T>
where
    T: SimObject,
{
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        num_rx: usize,
        policy: Box<dyn Arbitrate<T>>,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Arc::new(Entity::new(parent, name));
        let shared_state = Rc::new(ArbiterSharedState::new(num_rx));
        let rx = (0..num_rx)
            .map(|i| Some(InPort::new(&entity, format!("rx{i}").as_str())))
            .collect();
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Rc::new(Self {
            entity,
            rx: RefCell::new(rx),
            tx: RefCell::new(Some(tx)),
            policy: RefCell::new(Some(policy)),
            shared_state,
            spawner: engine.spawner(),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_tx(&self, port_state: PortStateResult<T>) -> SimResult {
        connect_tx!(self.tx, connect ; port_state)
    }

    pub fn port_rx_i(&self, i: usize) -> PortStateResult<T> {
        self.rx.borrow()[i].as_ref().unwrap().state()
    }
}

#[async_trait(?Send)]
impl<T> Runnable for Arbiter<T>
where
    T: SimObject,
{
    async fn run(&self) -> SimResult {
        // Start running the handlers for each input
        for (i, mut rx) in self.rx.borrow_mut().drain(..).enumerate() {
            let entity = self.entity.clone();
            let rx = rx.take().unwrap();
            let shared_state = self.shared_state.clone();
            self.spawner
                .spawn(async move { run_input(entity, rx, i, shared_state).await });
        }

        let tx = take_option!(self.tx);
        let mut policy = take_option!(self.policy);

        loop {
            let wait_event;
            loop {
                let value;
                let wake_event;
                {
                    // Need to hold the guard for the entire arbitration until
                    // the wake_event has been taken
                    let mut active = self.shared_state.active.borrow_mut();
                    let t = policy.arbitrate(&self.entity, &mut active);
                    match t {
                        Some((i, t)) => {
                            trace!(self.entity ; "grant {}: {}", i, t);
                            wake_event = self.shared_state.waiting_put[i].borrow_mut().take();
                            value = t;
                        }
                        None => {
                            wait_event = Once::default();
                            *self.shared_state.arbiter_event.borrow_mut() =
                                Some(wait_event.clone());
                            break;
                        }
                    }
                }

                if let Some(event) = wake_event {
                    event.notify()?;
                }
                exit!(self.entity ; value.tag());
                tx.put(value)?.await;
            }
            wait_event.listen().await;
        }
    }
}

async fn run_input<T: SimObject>(
    entity: Arc<Entity>,
    rx: InPort<T>,
    input_idx: usize,
    shared_state: Rc<ArbiterSharedState<T>>,
) -> SimResult {
    loop {
        let value = rx.get()?.await;
        enter!(entity ; value.tag());

        // Check if this input needs to wait for the previous value to be
        // handled
        let wait_event = match shared_state.active.borrow()[input_idx].as_ref() {
            Some(_) => {
                let once = Once::default();
                *shared_state.waiting_put[input_idx].borrow_mut() = Some(once.clone());
                Some(once)
            }
            None => None,
        };
        if let Some(once) = wait_event {
            once.listen().await;
        }

        // Set the value for this input
        shared_state.active.borrow_mut()[input_idx] = Some(value);

        // Wake up the arbiter if it has paused on an event
        if let Some(once) = shared_state.arbiter_event.borrow_mut().take() {
            once.notify().unwrap();
        }
    }
}
