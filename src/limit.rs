use std::sync::{Condvar, Mutex};

use crate::util::lock_unpoisoned;

/// Fixed-capacity gate bounding concurrent exchanges per client.
///
/// Disabled by default; installed by `max_in_flight(n)` on the builder.
/// `acquire` blocks the calling thread until a slot frees up; the permit
/// releases its slot on drop, so every exit path of the exchange (success,
/// transport failure, panic unwind) returns it.
pub(crate) struct InFlightGate {
    limit: usize,
    in_flight: Mutex<usize>,
    condvar: Condvar,
}

impl InFlightGate {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            in_flight: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) -> InFlightPermit<'_> {
        let mut in_flight = lock_unpoisoned(&self.in_flight);
        while *in_flight >= self.limit {
            in_flight = match self.condvar.wait(in_flight) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *in_flight += 1;
        drop(in_flight);
        InFlightPermit { gate: self }
    }
}

pub(crate) struct InFlightPermit<'a> {
    gate: &'a InFlightGate,
}

impl Drop for InFlightPermit<'_> {
    fn drop(&mut self) {
        let mut in_flight = lock_unpoisoned(&self.gate.in_flight);
        *in_flight = in_flight.saturating_sub(1);
        drop(in_flight);
        self.gate.condvar.notify_one();
    }
}
