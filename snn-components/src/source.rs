// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! A data source.
//!
//! The data source produces data as defined by the
//! [DataGenerator](crate::types::DataGenerator) that is provided.
//!
//! # Ports
//!
//! This component has one port:
//!  - One [output port](snn_engine::port::OutPort): `tx`

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use snn_engine::engine::Engine;
use snn_engine::port::{OutPort, PortStateResult};
use snn_engine::traits::{Runnable, SimObject};
use snn_engine::types::SimResult;
use snn_model_builder::EntityDisplay;
use snn_track::entity::Entity;
use snn_track::exit;
use snn_track::id::Unique;

use crate::types::DataGenerator;
use crate::{connect_tx, take_option};

#[macro_export]
/// Build a `Some(Box<Iterator>)` that repeats a value.
macro_rules! option_box_repeat {
    ($value:expr ; $repeat:expr) => {
        Some(Box::new(std::iter::repeat($value).take($repeat)))
    };
}

#[derive(EntityDisplay)]
pub struct Source<T>
where
    T: SimObject,
{
    pub entity: Rc<Entity>,
    data_generator: RefCell<Option<DataGenerator<T>>>,
    tx: RefCell<Option<OutPort<T>>>,
}

impl<T> Source<T>
where
    T: SimObject,
{
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        data_generator: Option<DataGenerator<T>>,
    ) -> Rc<Self> {
        let entity = Rc::new(Entity::new(parent, name));
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Rc::new(Self {
            entity,
            data_generator: RefCell::new(data_generator),
            tx: RefCell::new(Some(tx)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    pub fn set_generator(&self, data_generator: Option<DataGenerator<T>>) {
        *self.data_generator.borrow_mut() = data_generator;
    }

    pub fn connect_port_tx(&self, port_state: PortStateResult<T>) -> SimResult {
        connect_tx!(self.tx, connect ; port_state)
    }
}

#[async_trait(?Send)]
impl<T> Runnable for Source<T>
where
    T: SimObject,
{
    async fn run(&self) -> SimResult {
        let mut data_generator = match self.data_generator.borrow_mut().take() {
            Some(data_generator) => data_generator,
            None => return Ok(()),
        };

        let tx = take_option!(self.tx);
        while let Some(value) = data_generator.next() {
            exit!(self.entity ; value.id());
            tx.put(value)?.await;
        }
        Ok(())
    }
}
