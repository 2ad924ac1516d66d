//! Background listener threads for one broker subscription client.
//!
//! Peek-lock mode runs `max_concurrent_calls` workers, each doing
//! receive → dispatch → complete. Session mode runs a single worker that
//! accepts one session, handles one message and closes the session again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::broker::{MessageSettler, ReceivedMessage, SessionReceiver, SubscriptionClient};
use crate::config::SubscriptionOptions;
use crate::dispatch::EventDispatcher;
use crate::logging::{Log, RequestTrace};
use crate::sync::lock;

/// How a listener receives from its subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Concurrent peek-lock receive without ordering
    PeekLock,
    /// One session at a time, in order within the session
    Sessions,
}

/// Statistics from a stopped listener.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    /// Messages received under a lock.
    pub received: usize,
    /// Messages completed after dispatch.
    pub completed: usize,
    /// Messages abandoned because of cancellation.
    pub abandoned: usize,
    /// Messages left unacknowledged because processing or settlement failed.
    pub failed: usize,
    /// Receive calls that returned an error.
    pub receive_errors: usize,
    /// Receive cycles completed.
    pub polls: usize,
}

impl ListenerStats {
    pub(crate) fn merge(&mut self, other: &ListenerStats) {
        self.received += other.received;
        self.completed += other.completed;
        self.abandoned += other.abandoned;
        self.failed += other.failed;
        self.receive_errors += other.receive_errors;
        self.polls += other.polls;
    }
}

/// Handle to the worker threads of one listener. Drop or call `stop()` to
/// shut down.
pub struct ListenerHandle {
    entity: String,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<ListenerStats>>,
}

impl ListenerHandle {
    /// `<namespace>/<topic>/subscriptions/<name>`
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Stop the workers and wait for them to finish. Returns merged stats.
    pub fn stop(mut self) -> ListenerStats {
        self.signal_stop();
        let mut stats = ListenerStats::default();
        for worker in self.workers.drain(..) {
            stats.merge(&worker.join().unwrap_or_default());
        }
        stats
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

struct Worker {
    client: Arc<dyn SubscriptionClient>,
    dispatcher: Arc<EventDispatcher>,
    log: Arc<dyn Log>,
    options: SubscriptionOptions,
    stop: Arc<AtomicBool>,
    entity: String,
}

/// Start listening on `client`, dispatching every message to `dispatcher`.
pub fn spawn_listener(
    client: Arc<dyn SubscriptionClient>,
    dispatcher: Arc<EventDispatcher>,
    log: Arc<dyn Log>,
    options: SubscriptionOptions,
    mode: ReceiveMode,
) -> ListenerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let entity = format!("{}{}", client.namespace(), client.entity_path());
    let worker_count = match mode {
        ReceiveMode::PeekLock => options.max_concurrent_calls.max(1),
        ReceiveMode::Sessions => 1,
    };

    let workers = (0..worker_count)
        .map(|_| {
            let worker = Worker {
                client: Arc::clone(&client),
                dispatcher: Arc::clone(&dispatcher),
                log: Arc::clone(&log),
                options,
                stop: Arc::clone(&stop),
                entity: entity.clone(),
            };
            thread::spawn(move || match mode {
                ReceiveMode::PeekLock => worker.run_peek_lock(),
                ReceiveMode::Sessions => worker.run_sessions(),
            })
        })
        .collect();

    log.debug(&format!(
        "listening on {} with {} worker(s) ({:?})",
        entity, worker_count, mode
    ));

    ListenerHandle {
        entity,
        stop,
        workers,
    }
}

impl Worker {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.client.is_closed_or_closing()
    }

    fn run_peek_lock(self) -> ListenerStats {
        let mut stats = ListenerStats::default();
        while !self.stopping() {
            stats.polls += 1;
            match self.client.receive(self.options.receive_timeout) {
                Ok(Some(message)) => self.process(self.client.as_ref(), message, &mut stats),
                Ok(None) => {}
                Err(err) => self.receive_failed(&err.to_string(), &mut stats),
            }
        }
        stats
    }

    fn run_sessions(self) -> ListenerStats {
        let mut stats = ListenerStats::default();
        while !self.stopping() {
            stats.polls += 1;
            let session = match self.client.accept_session(self.options.receive_timeout) {
                Ok(Some(session)) => session,
                Ok(None) => continue,
                Err(err) => {
                    self.receive_failed(&err.to_string(), &mut stats);
                    continue;
                }
            };

            match session.receive(self.options.receive_timeout) {
                Ok(Some(message)) => self.process(session.as_ref(), message, &mut stats),
                Ok(None) => {}
                Err(err) => self.receive_failed(&err.to_string(), &mut stats),
            }
            // One message per session; anything still queued for it waits
            // for the next accept.
            session.close();
        }
        stats
    }

    fn receive_failed(&self, error: &str, stats: &mut ListenerStats) {
        stats.receive_errors += 1;
        if self.stopping() {
            return;
        }
        self.log
            .warn(&format!("receive on {} failed: {}", self.entity, error));
        self.pause(self.options.error_backoff);
    }

    /// Sleep for `duration` unless a stop is requested first.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }

    fn cancelled<S: MessageSettler + ?Sized>(&self, settler: &S, locked_until: Instant) -> bool {
        self.stopping() || settler.is_closed_or_closing() || Instant::now() >= locked_until
    }

    fn process<S>(&self, settler: &S, message: ReceivedMessage, stats: &mut ListenerStats)
    where
        S: MessageSettler + ?Sized,
    {
        stats.received += 1;
        let token = message.lock_token().to_string();

        if self.cancelled(settler, message.locked_until) {
            self.abandon(settler, &message, stats);
            return;
        }

        let start_time = Utc::now();
        let (outcome, locked_until) = with_lock_renewal(
            settler,
            &token,
            message.locked_until,
            self.options.max_auto_renew,
            || self.dispatcher.dispatch_envelope(&message.envelope),
        );

        let lock_held = locked_until.is_some_and(|until| !self.cancelled(settler, until));
        let response_code = match outcome {
            Err(_) => {
                stats.failed += 1;
                "Unacknowledged"
            }
            Ok(_) if !lock_held => {
                self.abandon(settler, &message, stats);
                "Abandoned"
            }
            Ok(_) => match settler.complete(&token) {
                Ok(()) => {
                    stats.completed += 1;
                    "Completed"
                }
                Err(err) => {
                    stats.failed += 1;
                    self.log.warn(&format!(
                        "could not complete {} on {}: {}",
                        message.envelope.message_id, self.entity, err
                    ));
                    "CompleteFailed"
                }
            },
        };

        self.log.request(&RequestTrace {
            route: self.entity.clone(),
            start_time,
            end_time: Utc::now(),
            response_code: response_code.to_string(),
            successful: response_code == "Completed",
            properties: vec![
                ("EventName".to_string(), message.envelope.label.clone()),
                ("MessageId".to_string(), message.envelope.message_id.clone()),
                (
                    "DeliveryCount".to_string(),
                    message.delivery_count().to_string(),
                ),
            ],
        });
    }

    fn abandon<S>(&self, settler: &S, message: &ReceivedMessage, stats: &mut ListenerStats)
    where
        S: MessageSettler + ?Sized,
    {
        stats.abandoned += 1;
        if let Err(err) = settler.abandon(message.lock_token()) {
            self.log.debug(&format!(
                "abandon of {} on {} failed: {}",
                message.envelope.message_id, self.entity, err
            ));
        } else {
            self.log.debug(&format!(
                "abandoned {} on {}",
                message.envelope.message_id, self.entity
            ));
        }
    }
}

/// Run `work` while a helper thread keeps the message lock alive, renewing
/// halfway through each lock period for at most `max_auto_renew`.
///
/// Returns the work's result and the lock's latest expiry, or `None` if a
/// renewal failed.
fn with_lock_renewal<S, T>(
    settler: &S,
    lock_token: &str,
    locked_until: Instant,
    max_auto_renew: Duration,
    work: impl FnOnce() -> T,
) -> (T, Option<Instant>)
where
    S: MessageSettler + ?Sized,
{
    let done = (Mutex::new(false), Condvar::new());
    let renew_deadline = Instant::now() + max_auto_renew;

    thread::scope(|s| {
        let renewer = s.spawn(|| {
            let mut until = locked_until;
            let mut finished = lock(&done.0);
            loop {
                let now = Instant::now();
                if *finished || now >= renew_deadline {
                    return Some(until);
                }
                let wait = (until.saturating_duration_since(now) / 2)
                    .min(renew_deadline - now)
                    .max(Duration::from_millis(1));
                finished = done
                    .1
                    .wait_timeout_while(finished, wait, |f| !*f)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                if *finished || Instant::now() >= renew_deadline {
                    return Some(until);
                }
                match settler.renew_lock(lock_token) {
                    Ok(next) => until = next,
                    Err(_) => return None,
                }
            }
        });

        let result = work();
        *lock(&done.0) = true;
        done.1.notify_all();
        let until = renewer.join().unwrap_or(None);
        (result, until)
    })
}
