//! Host event loop for the strap link
//!
//! Timer expirations and transport callbacks are funnelled into one loop
//! that hands each event to the controller before taking the next.

use crate::controller::StrapController;
use crate::strap::traits::{Presenter, TimerHandle, Timers, Transport};
use crate::system::events::{StrapEvent, Wakeup};
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Instant, Timer};
use log::{error, info};

pub const TIMER_CAPACITY: usize = 8;
pub const EVENT_CAPACITY: usize = 16;

/// Transport callbacks waiting to be dispatched.
pub type EventChannel = Channel<CriticalSectionRawMutex, StrapEvent, EVENT_CAPACITY>;

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    handle: TimerHandle,
    wakeup: Wakeup,
}

/// Bounded one-shot timers keyed on absolute deadlines.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: heapless::Vec<Deadline, TIMER_CAPACITY>,
    next_handle: u32,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.at).min()
    }

    /// Remove and return the earliest wake-up due at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Wakeup> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.at <= now)
            .min_by_key(|(_, entry)| entry.at)
            .map(|(index, _)| index)?;
        Some(self.entries.swap_remove(index).wakeup)
    }

    pub fn schedule_at(&mut self, at: Instant, wakeup: Wakeup) -> TimerHandle {
        self.next_handle = self.next_handle.wrapping_add(1);
        let handle = TimerHandle(self.next_handle);

        if self.entries.push(Deadline { at, handle, wakeup }).is_err() {
            error!("Timer queue full, dropping {:?} wake-up", wakeup);
        }
        handle
    }
}

impl Timers for TimerQueue {
    fn schedule(&mut self, delay: Duration, wakeup: Wakeup) -> TimerHandle {
        self.schedule_at(Instant::now() + delay, wakeup)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.entries.retain(|entry| entry.handle != handle);
    }
}

/// Drive the controller forever from its timers and the event channel.
pub async fn run<T: Transport, P: Presenter>(
    controller: &mut StrapController<T, TimerQueue, P>,
    events: &EventChannel,
) {
    info!("Strap event loop running");

    loop {
        let deadline = controller
            .timers()
            .next_deadline()
            .unwrap_or(Instant::MAX);

        match select(Timer::at(deadline), events.receive()).await {
            Either::First(()) => {
                let now = Instant::now();
                while let Some(wakeup) = controller.timers_mut().pop_expired(now) {
                    controller.handle(StrapEvent::Wakeup(wakeup));
                }
            }
            Either::Second(event) => controller.handle(event),
        }
    }
}
