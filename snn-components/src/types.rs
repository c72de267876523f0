// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! Shared types.
//!
//! This file defines a number of common types used to connect blocks.

/// The `DataGenerator` is what a [source](crate::source) uses
/// to generate data values to send.
pub type DataGenerator<T> = Box<dyn Iterator<Item = T> + 'static>;
