// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! Sink components.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use snn_engine::engine::Engine;
use snn_engine::port::{InPort, PortStateResult};
use snn_engine::traits::{Runnable, SimObject};
use snn_engine::types::SimResult;
use snn_model_builder::EntityDisplay;
use snn_track::enter;
use snn_track::entity::Entity;
use snn_track::id::Unique;

use crate::{port_rx, take_option};

#[derive(EntityDisplay)]
pub struct Sink<T>
where
    T: SimObject,
{
    pub entity: Rc<Entity>,
    sunk_count: RefCell<usize>,
    rx: RefCell<Option<InPort<T>>>,
}

impl<T> Sink<T>
where
    T: SimObject,
{
    #[must_use]
    pub fn new_and_register(engine: &Engine, parent: &Rc<Entity>, name: &str) -> Rc<Self> {
        let entity = Rc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let rc_self = Rc::new(Self {
            entity,
            sunk_count: RefCell::new(0),
            rx: RefCell::new(Some(rx)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    pub fn port_rx(&self) -> PortStateResult<T> {
        port_rx!(self.rx, state)
    }

    #[must_use]
    pub fn num_sunk(&self) -> usize {
        *self.sunk_count.borrow()
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
            enter!(self.entity ; value.id());
            *self.sunk_count.borrow_mut() += 1;
        }
    }
}
