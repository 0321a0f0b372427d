use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use serde_json::Value;

use crate::{
    core::{spawn_action_async, ActionContext, Task, TaskKind},
    form::{FormMeta, WeakForm},
    registry::Registry,
    schema::Fields,
    utils::timer::sleep,
    value::{get_path, Record},
    Form, FormState, Subscription,
};

#[cfg(test)]
mod tests;

/// Defers work to a later point of the runtime.
pub trait Scheduler {
    fn schedule(&self, task: Task) -> ScheduleHandle;
}

/// Cancels a scheduled task.
#[derive(Clone, Debug, Default)]
pub struct ScheduleHandle(Rc<Cell<bool>>);

impl ScheduleHandle {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.set(true);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
    fn guard(&self, task: Task) -> Task {
        let this = self.clone();
        Task::new(move |ac| {
            if !this.is_cancelled() {
                task.run(ac)
            }
        })
    }
}

/// Runs the task as an idle task, after every other task of the runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdleScheduler;

impl Scheduler for IdleScheduler {
    fn schedule(&self, task: Task) -> ScheduleHandle {
        let handle = ScheduleHandle::new();
        handle.guard(task).schedule_with(TaskKind::IDLE);
        handle
    }
}

/// Runs the task after a fixed delay.
#[derive(Clone, Copy, Debug)]
pub struct TimerScheduler {
    delay: Duration,
}
impl TimerScheduler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}
impl Default for TimerScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl Scheduler for TimerScheduler {
    fn schedule(&self, task: Task) -> ScheduleHandle {
        let handle = ScheduleHandle::new();
        let task = handle.guard(task);
        let delay = self.delay;
        spawn_action_async(move |aac| async move {
            sleep(delay).await;
            aac.call(|ac| task.run(ac));
        });
        handle
    }
}

/// Everything a record-change listener may read during one settle pass.
#[derive(Debug)]
pub struct EvalContext {
    values: Record,
    record: Rc<Record>,
    meta: Rc<FormMeta>,
    readonly: bool,
}

impl EvalContext {
    pub fn new(form: &Form, state: &FormState) -> Self {
        Self {
            values: form.context(),
            record: state.record.clone(),
            meta: state.meta.clone(),
            readonly: form.options().readonly,
        }
    }
    /// Context values: opener context, record, `_model`, `_parent` and so on.
    pub fn values(&self) -> &Record {
        &self.values
    }
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.values, path)
    }
    /// The record this pass was built from.
    pub fn record(&self) -> &Rc<Record> {
        &self.record
    }
    pub fn fields(&self) -> &Fields {
        &self.meta.fields
    }
    pub fn model(&self) -> &str {
        &self.meta.model
    }
    pub fn readonly(&self) -> bool {
        self.readonly
    }
}

type Listener = Rc<RefCell<dyn FnMut(&EvalContext, &mut FormState)>>;

/// Coalesces record changes of a form into settle passes over its listeners.
pub struct RecordNotifier(Rc<NotifierNode>);

struct NotifierNode {
    form: WeakForm,
    scheduler: Rc<dyn Scheduler>,
    listeners: Registry<Listener>,
    pending: RefCell<Option<ScheduleHandle>>,
    settles: Cell<usize>,
}

impl RecordNotifier {
    pub(crate) fn new(form: WeakForm, scheduler: Rc<dyn Scheduler>) -> Self {
        Self(Rc::new(NotifierNode {
            form,
            scheduler,
            listeners: Registry::new(),
            pending: RefCell::new(None),
            settles: Cell::new(0),
        }))
    }

    /// Register `listener` and run it once right away with the current record.
    ///
    /// Listeners read from the context and write into the draft; the draft is committed
    /// once per pass, and only if some listener changed it.
    pub fn subscribe(
        &self,
        ac: &mut ActionContext,
        listener: impl FnMut(&EvalContext, &mut FormState) + 'static,
    ) -> Subscription {
        let listener: Listener = Rc::new(RefCell::new(listener));
        let subscription = self.0.listeners.register(listener.clone());
        self.0.run(ac, &[listener]);
        subscription
    }

    /// Request a settle pass. Does nothing if one is already pending.
    pub fn notify(&self) {
        if self.is_pending() {
            return;
        }
        let task = Task::from_weak_fn(Rc::downgrade(&self.0), |node, ac| node.settle(ac));
        let handle = self.0.scheduler.schedule(task);
        *self.0.pending.borrow_mut() = Some(handle);
    }

    pub fn is_pending(&self) -> bool {
        self.0.pending.borrow().is_some()
    }

    /// Run the pending settle pass now.
    pub fn flush(&self, ac: &mut ActionContext) {
        let handle = self.0.pending.borrow_mut().take();
        if let Some(handle) = handle {
            handle.cancel();
            self.0.settle(ac);
        }
    }

    /// Cancel the pending settle pass, if any.
    pub fn completed(&self) {
        if let Some(handle) = self.0.pending.borrow_mut().take() {
            handle.cancel();
        }
    }

    /// Number of settle passes run so far.
    pub fn settle_count(&self) -> usize {
        self.0.settles.get()
    }
    pub fn listener_count(&self) -> usize {
        self.0.listeners.len()
    }
}

impl NotifierNode {
    fn settle(&self, ac: &mut ActionContext) {
        self.pending.borrow_mut().take();
        self.settles.set(self.settles.get() + 1);
        let listeners = self.listeners.snapshot();
        tracing::trace!(listeners = listeners.len(), "settle");
        self.run(ac, &listeners);
    }
    fn run(&self, ac: &mut ActionContext, listeners: &[Listener]) {
        let Some(form) = self.form.upgrade() else {
            return;
        };
        let state = form.get();
        let cx = EvalContext::new(&form, &state);
        let mut draft = FormState::clone(&state);
        for listener in listeners {
            (&mut *listener.borrow_mut())(&cx, &mut draft);
        }
        if draft != *state {
            form.modify(ac, move |s| *s = draft);
        }
    }
}
