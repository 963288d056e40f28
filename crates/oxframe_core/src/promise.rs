//! Promises and the virtual clock behind `setTimeout`.
//!
//! The sandbox never runs an event loop. A promise is either already settled, settled after a
//! known amount of virtual time, or never settled at all. Callers that need real waiting
//! (see `oxframe_resolver::settle`) turn the delay into a timer of their own.

use std::time::Duration;

use crate::value::JsValue;

#[derive(Clone)]
pub enum Settlement<'a> {
    Fulfilled(JsValue<'a>),
    Rejected(JsValue<'a>),
}

#[derive(Clone)]
pub enum Promise<'a> {
    Settled(Settlement<'a>),
    Delayed { after: Duration, settlement: Settlement<'a> },
    Never,
}

impl<'a> Promise<'a> {
    pub fn fulfilled(value: JsValue<'a>) -> Self {
        Promise::Settled(Settlement::Fulfilled(value))
    }

    pub fn rejected(reason: JsValue<'a>) -> Self {
        Promise::Settled(Settlement::Rejected(reason))
    }

    /// A promise that settles once `after` of virtual time has elapsed.
    pub fn after(after: Duration, settlement: Settlement<'a>) -> Self {
        if after.is_zero() {
            Promise::Settled(settlement)
        } else {
            Promise::Delayed { after, settlement }
        }
    }

    /// Push the settlement of this promise `extra` further into the future.
    pub fn delayed_by(self, extra: Duration) -> Self {
        match self {
            Promise::Settled(settlement) => Promise::after(extra, settlement),
            Promise::Delayed { after, settlement } => Promise::after(after + extra, settlement),
            Promise::Never => Promise::Never,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Promise::Settled(_))
    }
}

pub(crate) struct Timer<'a> {
    pub deadline: Duration,
    seq: usize,
    pub callback: JsValue<'a>,
    pub args: Vec<JsValue<'a>>,
}

/// Pending `setTimeout` callbacks ordered by virtual deadline.
#[derive(Default)]
pub(crate) struct TimerQueue<'a> {
    now: Duration,
    next_seq: usize,
    pending: Vec<Timer<'a>>,
}

impl<'a> TimerQueue<'a> {
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Queue `callback` to run `delay` after the current virtual time. Returns the timer id.
    pub fn schedule(
        &mut self,
        delay: Duration,
        callback: JsValue<'a>,
        args: Vec<JsValue<'a>>,
    ) -> usize {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Timer { deadline: self.now + delay, seq, callback, args });
        seq + 1
    }

    /// Remove the earliest timer and advance the clock to its deadline.
    pub fn pop_next(&mut self) -> Option<Timer<'a>> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (t.deadline, t.seq))
            .map(|(idx, _)| idx)?;
        let timer = self.pending.swap_remove(idx);
        self.now = self.now.max(timer.deadline);
        Some(timer)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_zero_is_settled() {
        let p = Promise::after(Duration::ZERO, Settlement::Fulfilled(JsValue::Null));
        assert!(p.is_settled());
    }

    #[test]
    fn test_delayed_by_accumulates() {
        let p = Promise::after(Duration::from_millis(10), Settlement::Fulfilled(JsValue::Null))
            .delayed_by(Duration::from_millis(5));
        match p {
            Promise::Delayed { after, .. } => assert_eq!(after, Duration::from_millis(15)),
            _ => panic!("expected a delayed promise"),
        }
        assert!(matches!(Promise::Never.delayed_by(Duration::from_secs(1)), Promise::Never));
    }

    #[test]
    fn test_timer_queue_orders_by_deadline_then_insertion() {
        let mut queue = TimerQueue::default();
        queue.schedule(Duration::from_millis(20), JsValue::string("late"), vec![]);
        queue.schedule(Duration::from_millis(5), JsValue::string("first"), vec![]);
        queue.schedule(Duration::from_millis(5), JsValue::string("second"), vec![]);

        let order: Vec<String> =
            std::iter::from_fn(|| queue.pop_next()).map(|t| t.callback.to_js_string()).collect();
        assert_eq!(order, ["first", "second", "late"]);
        assert_eq!(queue.now(), Duration::from_millis(20));
        assert!(queue.is_empty());
    }
}
