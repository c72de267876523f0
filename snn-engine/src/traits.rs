// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! A set of common traits used across the engine.

use core::mem::size_of;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use snn_track::id::Unique;

use crate::types::SimResult;

/// The `TotalBytes` trait is used to determine how many bytes an object
/// represents
///
/// This trait is used to determine how much time an object will take to be
/// sent.
pub trait TotalBytes {
    /// The number of bytes this object occupies on a link.
    fn total_bytes(&self) -> usize;
}

/// The `Routable` trait provides an interface to an object to enable it to
/// be routed
pub trait Routable {
    /// The destination used to select an egress for this object.
    fn destination(&self) -> u64;
}

/// A super-trait that objects that are passed around the simulation have to
/// implement
///
///  - Clone:       It would be nice to use `Copy` instead, but given that
///    things like `Vec` are not `Copy` we have to use `Clone` instead to
///    allow the application to keep copies of objects sent around.
///  - Debug/Display: In order to print objects in logs.
///  - Routable:    Allows routing.
///  - TotalBytes:  Allows rate limiting.
///  - Unique:      Allows for simple logging.
///  - 'static:     Due to the way that futures are implemented, the
///    lifetimes need to be `'static`. This means that objects may have to be
///    placed in `Box` to make that so.
pub trait SimObject: Clone + Debug + Display + Routable + TotalBytes + Unique + 'static {}

// Implementations for basic types that can be sent around the simulation
// for testing

impl TotalBytes for i32 {
    fn total_bytes(&self) -> usize {
        size_of::<i32>()
    }
}

impl Routable for i32 {
    fn destination(&self) -> u64 {
        *self as u64
    }
}

impl SimObject for i32 {}

impl TotalBytes for usize {
    fn total_bytes(&self) -> usize {
        size_of::<usize>()
    }
}

impl Routable for usize {
    fn destination(&self) -> u64 {
        *self as u64
    }
}

impl SimObject for usize {}

/// The `Event` trait defines an object that can be used as an Event
///
/// This is a trait that defines the `listen` function that returns a future
/// so that it can be used in `async` code.
pub trait Event<T> {
    /// Return a future that completes when the event fires.
    #[must_use = "Futures do nothing unless you `.await` or otherwise use them"]
    fn listen(&self) -> BoxFuture<'static, T>;

    /// Allow cloning of boxed events.
    fn clone_dyn(&self) -> Box<dyn Event<T>>;
}

/// Provide Clone implementation for boxed Event
impl<T> Clone for Box<dyn Event<T>> {
    fn clone(self: &Box<dyn Event<T>>) -> Box<dyn Event<T>> {
        self.clone_dyn()
    }
}

/// A component that can be registered with the
/// [`Engine`](crate::engine::Engine).
///
/// The engine drives registered components through three phases:
///
///  1. [`setup`](Runnable::setup) in registration order before any task is
///     spawned. Returning an error aborts the whole run; this is where
///     fatal configuration problems are reported.
///  2. [`run`](Runnable::run), spawned onto the executor in registration
///     order. Composite components whose activity lives in sub-components
///     can rely on the default empty implementation.
///  3. [`finish`](Runnable::finish), called exactly once per component in
///     registration order after the executor stops. Statistics are emitted
///     here.
#[async_trait(?Send)]
pub trait Runnable {
    /// Validate configuration and derived state before the run starts.
    fn setup(&self) -> SimResult {
        Ok(())
    }

    /// The component's main task.
    async fn run(&self) -> SimResult {
        Ok(())
    }

    /// Called exactly once after the simulation has stopped.
    fn finish(&self) {}
}

/// The boxed future type returned by [`Event::listen`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;
