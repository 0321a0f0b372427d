use std::{
    collections::BTreeSet,
    future::Future,
    pin::Pin,
    sync::{Condvar, LazyLock, Mutex, MutexGuard},
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use slabmap::SlabMap;


static TIMER: LazyLock<Timer> = LazyLock::new(|| Timer {
    queue: Mutex::new(TimerQueue::new()),
    condvar: Condvar::new(),
});

struct Timer {
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
}
impl Timer {
    fn lock(&self) -> MutexGuard<TimerQueue> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        }
    }
    fn run_worker(&self) {
        let mut wakes = Vec::new();
        let mut queue = self.lock();
        loop {
            let now = Instant::now();
            queue.take_expired(now, &mut wakes);
            if !wakes.is_empty() {
                drop(queue);
                for waker in wakes.drain(..) {
                    waker.wake();
                }
                queue = self.lock();
                continue;
            }
            let next = queue.deadlines.first().map(|(deadline, _)| *deadline);
            queue = match next {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(now);
                    match self.condvar.wait_timeout(queue, wait) {
                        Ok((guard, _)) => guard,
                        Err(e) => e.into_inner().0,
                    }
                }
                None => match self.condvar.wait(queue) {
                    Ok(guard) => guard,
                    Err(e) => e.into_inner(),
                },
            };
        }
    }
}

struct TimerEntry {
    deadline: Instant,
    waker: Option<Waker>,
    fired: bool,
}

struct TimerQueue {
    deadlines: BTreeSet<(Instant, usize)>,
    entries: SlabMap<TimerEntry>,
    thread_running: bool,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            deadlines: BTreeSet::new(),
            entries: SlabMap::new(),
            thread_running: false,
        }
    }
    fn take_expired(&mut self, now: Instant, wakes: &mut Vec<Waker>) {
        while let Some(&(deadline, id)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.remove(&(deadline, id));
            if let Some(entry) = self.entries.get_mut(id) {
                entry.fired = true;
                wakes.extend(entry.waker.take());
            }
        }
    }
    fn insert(&mut self, deadline: Instant, waker: &Waker, condvar: &Condvar) -> usize {
        if !self.thread_running {
            self.thread_running = true;
            std::thread::spawn(|| TIMER.run_worker());
        }
        let notify = self
            .deadlines
            .first()
            .map_or(true, |&(first, _)| deadline < first);
        let id = self.entries.insert(TimerEntry {
            deadline,
            waker: Some(waker.clone()),
            fired: false,
        });
        self.deadlines.insert((deadline, id));
        if notify {
            condvar.notify_one();
        }
        id
    }
    fn poll(&mut self, id: usize, cx: &Context) -> Poll<()> {
        let Some(entry) = self.entries.get_mut(id).filter(|e| !e.fired) else {
            self.remove(id);
            return Poll::Ready(());
        };
        let renew = match &entry.waker {
            Some(waker) => !waker.will_wake(cx.waker()),
            None => true,
        };
        if renew {
            entry.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
    fn remove(&mut self, id: usize) {
        if let Some(entry) = self.entries.remove(id) {
            self.deadlines.remove(&(entry.deadline, id));
        }
    }
}

/// Future returned by [`sleep`].
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    deadline: Instant,
    id: Option<usize>,
    done: bool,
}

impl Future for Sleep {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(());
        }
        let poll = match this.id {
            Some(id) => TIMER.lock().poll(id, cx),
            None if Instant::now() >= this.deadline => Poll::Ready(()),
            None => {
                this.id = Some(TIMER.lock().insert(this.deadline, cx.waker(), &TIMER.condvar));
                Poll::Pending
            }
        };
        if poll.is_ready() {
            this.id = None;
            this.done = true;
        }
        poll
    }
}
impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            TIMER.lock().remove(id);
        }
    }
}

/// Completes after `duration` has elapsed.
///
/// Deadlines are tracked by a single background thread, so this works with any executor,
/// including the form [`Runtime`](crate::Runtime).
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        deadline: Instant::now() + duration,
        id: None,
        done: false,
    }
}
