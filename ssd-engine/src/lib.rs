// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The event-driven simulation kernel of the SSD simulator.
//!
//! This library provides the [engine](crate::engine) which executes
//! event-driven asynchronous simulation components. A component is an object
//! that owns [ports](crate::port) and implements
//! [`Runnable`](crate::traits::Runnable); its `run()` future is spawned on
//! the single-threaded [executor](crate::executor) and suspends on port
//! transfers, [event](crate::events) notifications or
//! [clock](crate::time::clock) delays.
//!
//! Simulated time is kept per [`Clock`](crate::time::clock::Clock); the
//! executor advances to the earliest pending wake once no task can make
//! progress at the current time. Given identical task registration order,
//! two runs produce identical event ordering.

pub mod engine;
pub mod events;
pub mod executor;
pub mod port;
pub mod test_helpers;
pub mod time;
pub mod traits;
pub mod types;

#[macro_export]
/// Spawn all registered component run() functions and then run the
/// simulation.
macro_rules! run_simulation {
    ($engine:ident) => {
        $engine.run().unwrap();
    };
    ($engine:ident, $expect:expr) => {
        match $engine.run() {
            Ok(()) => panic!("Expected an error!"),
            Err(e) => assert_eq!(format!("{e}").as_str(), $expect),
        }
    };
}

#[macro_export]
/// Spawn a sub-component that is stored in an `RefCell<Option<>>`
///
/// This removes the sub-component from the Option and then spawns the `run()`
/// function.
macro_rules! spawn_subcomponent {
    ($($spawner:ident).+ ; $($block:ident).+) => {
        let sub_block = $($block).+.borrow_mut().take().unwrap();
        $($spawner).+.spawn(async move { sub_block.run().await } );
    };
}
