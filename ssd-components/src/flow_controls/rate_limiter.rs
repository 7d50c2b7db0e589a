// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Provide effective bandwidth limit for a component.
//!
//! A [RateLimiter] is a component that is given a
//! [clock](ssd_engine::time::clock::Clock) and a rate in `bits per tick`. It
//! uses this rate limit to enforce a delay determined by the object that is
//! being rate limited.
//!
//! The [RateLimiter] therefore requires objects to implement the
//! [TotalBytes] trait so that the number of bits of the object can be
//! determined.

use std::marker::PhantomData;

use ssd_engine::time::clock::Clock;
use ssd_engine::traits::TotalBytes;

#[derive(Clone)]
pub struct RateLimiter<T>
where
    T: TotalBytes,
{
    /// Clock rate limiter is attached to.
    clock: Clock,

    /// Bits per tick that can pass through this interface.
    bits_per_tick: usize,

    phantom: PhantomData<T>,
}

impl<T> RateLimiter<T>
where
    T: TotalBytes,
{
    pub fn new(clock: Clock, bits_per_tick: usize) -> Self {
        Self {
            clock,
            bits_per_tick,
            phantom: PhantomData,
        }
    }

    pub async fn delay(&self, value: &T) {
        let delay_ticks = self.ticks(value);
        self.clock.wait_ticks(delay_ticks as u64).await;
    }

    pub async fn delay_ticks(&self, ticks: usize) {
        self.clock.wait_ticks(ticks as u64).await;
    }

    pub fn ticks(&self, value: &T) -> usize {
        let payload_bytes = value.total_bytes();
        let payload_bits = payload_bytes * 8;
        self.ticks_from_bits(payload_bits)
    }

    pub fn ticks_from_bits(&self, bits: usize) -> usize {
        bits.div_ceil(self.bits_per_tick)
    }
}
