// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! Events that tasks can listen on.

pub mod once;
pub mod repeated;
