// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Models of an SSD storage stack.
//!
//! A host generates memory-like requests which travel over a PCIe link into
//! an SSD: controller front end, L1 cache, DRAM controller with bank-level
//! timing and NAND flash behind a multi-channel flash controller. Every
//! module is an event-driven component on the
//! [engine](ssd_engine::engine::Engine); the inter-module topology is owned
//! by the [host](crate::host) and [ssd](crate::ssd) compositions.
//!
//! The storage stack runs on a 1THz clock so one tick is a picosecond and
//! sub-nanosecond DRAM timings stay exact; the PCIe link paces itself on a
//! 1GHz clock.

pub mod cache;
pub mod dram;
pub mod error;
pub mod flash;
pub mod host;
pub mod packet;
pub mod pcie;
pub mod profiler;
pub mod ssd;
pub mod test_helpers;
pub mod traffic_gen;

/// Ticks of the picosecond clock per nanosecond.
pub const TICKS_PER_NS: u64 = 1000;

/// The frequency of the storage-stack clock in GHz (one tick per
/// picosecond).
pub const PS_CLOCK_GHZ: f64 = 1000.0;

/// Convert a nanosecond quantity to picosecond ticks, rounding to nearest.
#[must_use]
pub fn ns_to_ticks(ns: f64) -> u64 {
    (ns * TICKS_PER_NS as f64).round() as u64
}
