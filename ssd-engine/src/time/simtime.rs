// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The overall owner of time within a simulation.

use std::sync::Arc;

use ssd_track::entity::Entity;
use ssd_track::set_time;

use super::clock::Clock;
use crate::time::clock::TaskWaker;

/// The overall owner of time within a simulation.
///
/// Contains all Clocks and the current simulation time in ns.
#[derive(Clone)]
pub struct SimTime {
    pub entity: Arc<Entity>,

    current_ns: f64,

    /// Clocks are auto-created as required.
    clocks: Vec<Clock>,
}

impl SimTime {
    #[must_use]
    pub fn new(parent: &Arc<Entity>) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, "time")),
            current_ns: 0.0,
            clocks: Vec::new(),
        }
    }

    pub fn get_clock(&mut self, freq_mhz: f64) -> Clock {
        for clock in &self.clocks {
            if clock.freq_mhz() == freq_mhz {
                return clock.clone();
            }
        }
        let clock = Clock::new(freq_mhz);
        self.clocks.push(clock.clone());
        clock
    }

    /// Choose the clock with the earliest pending wake, advance time to it
    /// and return the associated Wakers.
    ///
    /// Returns `None` when no wake remains or when every pending wake
    /// belongs to a task that is allowed to exit, in which case the
    /// simulation is complete.
    pub fn advance_time(&mut self) -> Option<Vec<TaskWaker>> {
        if self.can_exit() {
            return None;
        }

        let next_clock = self.clocks.iter().min_by(|a, b| a.cmp(b))?.clone();
        let clock_time = next_clock.shared_state.waiting_times.borrow_mut().pop()?;
        let next_ns = next_clock.to_ns(&clock_time);
        if self.current_ns != next_ns {
            set_time!(self.entity ; next_ns);
            self.current_ns = next_ns;

            // Drag every other clock's `now` up to the new time so that
            // delays scheduled on them cannot land in the global past.
            for clock in &self.clocks {
                clock.catch_up_to(next_ns);
            }
        }
        let woken = next_clock.shared_state.waiting.borrow_mut().pop();
        woken
    }

    #[must_use]
    pub fn time_now_ns(&self) -> f64 {
        self.current_ns
    }

    /// The simulation can exit if all scheduled tasks can exit.
    #[must_use]
    pub fn can_exit(&self) -> bool {
        for clock in &self.clocks {
            if !clock.can_exit() {
                return false;
            }
        }
        true
    }
}
