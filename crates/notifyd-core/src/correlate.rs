use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use nostr_sdk::Event;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

/// Result of waiting on a correlation id: the first of {answer delivered,
/// deadline reached} wins and the loser's outcome is discarded.
#[derive(Debug)]
pub enum WaitOutcome {
    Answered(Event),
    TimedOut,
}

struct PendingWaiter {
    seq: u64,
    tx: oneshot::Sender<Event>,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    pending: HashMap<String, PendingWaiter>,
}

/// One-shot request/response rendezvous keyed by correlation id.
///
/// At most one waiter is pending per id. Registering a second waiter under
/// an id that already has one orphans the first: it never receives an
/// answer and runs out its deadline normally. Callers avoid collisions by
/// embedding the requested identity in the id, which still collides when
/// the same identity is requested twice concurrently.
pub struct Waiters {
    timeout: Duration,
    inner: RefCell<Inner>,
}

impl Waiters {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            inner: RefCell::new(Inner::default()),
        }
    }

    /// Suspend until an answer is delivered under `id` or the timeout
    /// elapses, whichever comes first.
    pub async fn await_answer(&self, id: &str) -> WaitOutcome {
        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut inner = self.inner.borrow_mut();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            if inner
                .pending
                .insert(id.to_string(), PendingWaiter { seq, tx })
                .is_some()
            {
                warn!(correlation = id, "replaced pending waiter; earlier request will time out");
            }
            seq
        };

        let deadline = Instant::now() + self.timeout;
        let outcome = match time::timeout_at(deadline, rx).await {
            Ok(Ok(event)) => WaitOutcome::Answered(event),
            // Sender dropped: a newer waiter took over this id. The answer,
            // if one comes, belongs to it; run out the clock like any
            // unanswered wait.
            Ok(Err(_)) => {
                time::sleep_until(deadline).await;
                WaitOutcome::TimedOut
            }
            Err(_) => WaitOutcome::TimedOut,
        };

        if matches!(outcome, WaitOutcome::TimedOut) {
            // Deregister, but only if the registration is still ours; a
            // newer waiter under the same id must not be clobbered.
            let mut inner = self.inner.borrow_mut();
            if inner.pending.get(id).is_some_and(|w| w.seq == seq) {
                inner.pending.remove(id);
            }
        }
        outcome
    }

    /// Hand `event` to the waiter registered under `id`. Late answers and
    /// answers nobody asked for are logged no-ops.
    pub fn deliver(&self, id: &str, event: Event) {
        let waiter = self.inner.borrow_mut().pending.remove(id);
        match waiter {
            Some(waiter) => {
                if waiter.tx.send(event).is_err() {
                    debug!(correlation = id, "waiter gone before the answer arrived");
                }
            }
            None => debug!(correlation = id, "no waiter registered"),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.inner.borrow().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use nostr_sdk::{EventBuilder, Keys};
    use tokio::task::yield_now;

    use super::*;

    fn some_event() -> Event {
        EventBuilder::text_note("an answer")
            .sign_with_keys(&Keys::generate())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_an_answer() {
        let waiters = Waiters::new(Duration::from_millis(1000));
        let started = Instant::now();
        let outcome = waiters.await_answer("profile-x").await;
        assert!(matches!(outcome, WaitOutcome::TimedOut));
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert_eq!(waiters.pending_len(), 0);
    }

    #[tokio::test]
    async fn answer_wins_when_delivered_before_deadline() {
        let waiters = Waiters::new(Duration::from_millis(1000));
        let event = some_event();
        let (outcome, ()) = tokio::join!(waiters.await_answer("profile-x"), async {
            waiters.deliver("profile-x", event.clone());
        });
        match outcome {
            WaitOutcome::Answered(answer) => assert_eq!(answer.id, event.id),
            WaitOutcome::TimedOut => panic!("expected an answer"),
        }
        assert_eq!(waiters.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_delivery_is_a_no_op() {
        let waiters = Waiters::new(Duration::from_millis(1000));
        let outcome = waiters.await_answer("profile-x").await;
        assert!(matches!(outcome, WaitOutcome::TimedOut));
        waiters.deliver("profile-x", some_event());
        assert_eq!(waiters.pending_len(), 0);
    }

    #[tokio::test]
    async fn delivery_without_a_waiter_is_a_no_op() {
        let waiters = Waiters::new(Duration::from_millis(1000));
        waiters.deliver("nobody-home", some_event());
        assert_eq!(waiters.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_waiter_on_an_id_orphans_the_first() {
        let waiters = Waiters::new(Duration::from_millis(1000));
        let event = some_event();

        let (first, second, ()) = tokio::join!(
            waiters.await_answer("profile-x"),
            async {
                yield_now().await;
                waiters.await_answer("profile-x").await
            },
            async {
                time::sleep(Duration::from_millis(100)).await;
                waiters.deliver("profile-x", event.clone());
            },
        );

        assert!(matches!(first, WaitOutcome::TimedOut));
        match second {
            WaitOutcome::Answered(answer) => assert_eq!(answer.id, event.id),
            WaitOutcome::TimedOut => panic!("second waiter should get the answer"),
        }
        assert_eq!(waiters.pending_len(), 0);
    }
}
