// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A component that adds `delay_ticks` between receiving anything and sending
//! it on to its output.
//!
//! The [Delay] implicitly asserts back-pressure on its input when the output
//! is blocked: once `delay_ticks` values are in flight the input side stops
//! accepting new ones until the output side has drained.
//!
//! # Ports
//!
//! This component has the following ports:
//!  - One [input port](ssd_engine::port::InPort): `rx`
//!  - One [output port](ssd_engine::port::OutPort): `tx`

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use ssd_engine::engine::Engine;
use ssd_engine::events::repeated::Repeated;
use ssd_engine::executor::Spawner;
use ssd_engine::port::{InPort, OutPort, PortStateResult};
use ssd_engine::sim_error;
use ssd_engine::time::clock::{Clock, ClockTick};
use ssd_engine::traits::{Event, Runnable, SimObject};
use ssd_engine::types::{SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::{enter, exit};

use crate::{connect_tx, port_rx, take_option};

#[derive(EntityDisplay)]
pub struct Delay<T>
where
    T: SimObject,
{
    pub entity: Arc<Entity>,
    spawner: Spawner,
    clock: Clock,
    delay_ticks: RefCell<usize>,

    rx: RefCell<Option<InPort<T>>>,
    pending: Rc<RefCell<VecDeque<(T, ClockTick)>>>,
    pending_changed: Repeated<()>,
    output_changed: Repeated<()>,
    tx: RefCell<Option<OutPort<T>>>,
}

impl<T> Delay<T>
where
    T: SimObject,
{
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        delay_ticks: usize,
    ) -> Result<Rc<Self>, SimError> {
        let spawner = engine.spawner();
        let entity = Arc::new(Entity::new(parent, name));
        let tx = OutPort::new(&entity, "tx");
        let rx = InPort::new(&entity, "rx");
        let rc_self = Rc::new(Self {
            entity,
            spawner,
            clock: clock.clone(),
            delay_ticks: RefCell::new(delay_ticks),
            rx: RefCell::new(Some(rx)),
            pending: Rc::new(RefCell::new(VecDeque::new())),
            pending_changed: Repeated::default(),
            output_changed: Repeated::default(),
            tx: RefCell::new(Some(tx)),
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

    pub fn set_delay(&self, delay_ticks: usize) -> SimResult {
        if self.rx.borrow().is_none() {
            return sim_error!(format!(
                "{}: can't change the delay after the simulation has started",
                self.entity
            ));
        }
        *self.delay_ticks.borrow_mut() = delay_ticks;
        Ok(())
    }
}

#[async_trait(?Send)]
impl<T> Runnable for Delay<T>
where
    T: SimObject,
{
    async fn run(&self) -> SimResult {
        // Spawn the other end of the delay
        let tx = take_option!(self.tx);

        let entity = self.entity.clone();
        let clock = self.clock.clone();
        let pending = self.pending.clone();
        let pending_changed = self.pending_changed.clone();
        let output_changed = self.output_changed.clone();
        self.spawner.spawn(async move {
            run_tx(
                entity,
                tx,
                &clock,
                pending,
                pending_changed,
                output_changed,
            )
            .await
        });

        let rx = take_option!(self.rx);
        let delay_ticks = *self.delay_ticks.borrow();
        loop {
            let value = rx.get()?.await;
            enter!(self.entity ; value.tag());

            let mut tick = self.clock.tick_now();
            tick.set_tick(tick.tick() + delay_ticks as u64);

            self.pending.borrow_mut().push_back((value, tick));
            self.pending_changed.notify()?;

            if delay_ticks > 0 {
                // Enforce back-pressure by waiting until there is room in the
                // pending queue
                while self.pending.borrow().len() >= delay_ticks {
                    self.output_changed.listen().await;
                }
            }
        }
    }
}

async fn run_tx<T>(
    entity: Arc<Entity>,
    tx: OutPort<T>,
    clock: &Clock,
    pending: Rc<RefCell<VecDeque<(T, ClockTick)>>>,
    pending_changed: Repeated<()>,
    output_changed: Repeated<()>,
) -> SimResult
where
    T: SimObject,
{
    loop {
        let next = pending.borrow_mut().pop_front();

        match next {
            Some((value, tick)) => {
                let tick_now = clock.tick_now();
                match tick.cmp(&tick_now) {
                    Ordering::Greater => {
                        clock.wait_ticks(tick.tick() - tick_now.tick()).await;
                    }
                    Ordering::Less | Ordering::Equal => {
                        // Output has stalled past the delivery time - send
                        // immediately
                    }
                }

                exit!(entity ; value.tag());
                tx.put(value)?.await;
                output_changed.notify()?;
            }
            None => {
                pending_changed.listen().await;
            }
        }
    }
}
