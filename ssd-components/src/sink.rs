// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Sink component.
//!
//! # Ports
//!
//! This component has one port:
//!  - One [input port](ssd_engine::port::InPort): `rx`

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use ssd_engine::engine::Engine;
use ssd_engine::port::{InPort, PortStateResult};
use ssd_engine::traits::{Runnable, SimObject};
use ssd_engine::types::{SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::enter;

use crate::{port_rx, take_option};

#[derive(EntityDisplay)]
pub struct Sink<T>
where
    T: SimObject,
{
    pub entity: Arc<Entity>,
    sunk_count: RefCell<usize>,
    last_value: RefCell<Option<T>>,
    rx: RefCell<Option<InPort<T>>>,
}

impl<T> Sink<T>
where
    T: SimObject,
{
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let rc_self = Rc::new(Self {
            entity,
            sunk_count: RefCell::new(0),
            last_value: RefCell::new(None),
            rx: RefCell::new(Some(rx)),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn port_rx(&self) -> PortStateResult<T> {
        port_rx!(self.rx, state)
    }

    #[must_use]
    pub fn num_sunk(&self) -> usize {
        *self.sunk_count.borrow()
    }

    /// The last value that was consumed, if any.
    #[must_use]
    pub fn last_value(&self) -> Option<T> {
        self.last_value.borrow().clone()
    }
}

#[async_trait(?Send)]
impl<T> Runnable for Sink<T>
where
    T: SimObject,
{
    async fn run(&self) -> SimResult {
        let rx = take_option!(self.rx);
        loop {
            let value = rx.get()?.await;
            enter!(self.entity ; value.tag());
            *self.sunk_count.borrow_mut() += 1;
            *self.last_value.borrow_mut() = Some(value);
        }
    }
}
