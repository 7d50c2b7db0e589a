// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Shared component types.

/// The type of the generator that a [Source](crate::source::Source) pulls
/// values from.
pub type DataGenerator<T> = Box<dyn Iterator<Item = T>>;
