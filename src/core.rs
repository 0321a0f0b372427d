use std::{
    any::Any,
    cell::RefCell,
    collections::BTreeMap,
    future::{poll_fn, Future},
    mem::{replace, swap, take, transmute},
    pin::Pin,
    ptr::null_mut,
    rc::{Rc, Weak},
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll, Wake, Waker},
    thread::AccessError,
};

use derive_ex::{derive_ex, Ex};
use parse_display::Display;
use slabmap::SlabMap;


thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
}

struct Globals {
    is_runtime_exists: bool,
    actions: Vec<Action>,
    need_wake: bool,
    wakes: WakeTable,
    tasks: Tasks,
}
impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            actions: Vec::new(),
            need_wake: false,
            wakes: WakeTable::default(),
            tasks: Tasks::default(),
        }
    }
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut()))
    }
    fn schedule_task(kind: TaskKind, task: Task) {
        Self::with(|g| {
            g.assert_exists();
            g.tasks.push(kind, task);
            g.wake();
        })
    }
    fn get_tasks(kind: Option<TaskKind>, tasks: &mut Vec<Task>) {
        Self::with(|g| g.tasks.drain(kind, tasks))
    }
    fn get_actions(actions: &mut Vec<Action>) -> bool {
        Self::with(|g| {
            g.apply_wake();
            swap(actions, &mut g.actions);
        });
        !actions.is_empty()
    }
    fn assert_exists(&self) {
        if !self.is_runtime_exists {
            panic!("`Runtime` is not created.");
        }
    }
    fn push_action(&mut self, action: Action) {
        self.assert_exists();
        self.actions.push(action);
        self.wake();
    }
    fn apply_wake(&mut self) {
        let mut requests = self.wakes.requests.lock();
        for key in requests.drops.drain(..) {
            self.wakes.tasks.remove(key);
        }
        for key in requests.wakes.drain(..) {
            if let Some(action) = self.wakes.tasks.get(key) {
                self.actions.push(AsyncAction::to_action(action));
            }
        }
    }
    fn wait_for_ready(&mut self, cx: &Context) -> Poll<()> {
        self.need_wake = false;
        if !self.actions.is_empty() || !self.tasks.is_empty() {
            return Poll::Ready(());
        }
        let mut requests = self.wakes.requests.lock();
        if !requests.drops.is_empty() || !requests.wakes.is_empty() {
            return Poll::Ready(());
        }
        requests.waker = Some(cx.waker().clone());
        self.need_wake = true;
        Poll::Pending
    }
    fn finish_runtime(&mut self) {
        self.is_runtime_exists = false;
        self.actions.clear();
        self.tasks = Tasks::default();
    }
    fn wake(&mut self) {
        if !self.need_wake {
            return;
        }
        self.need_wake = false;
        self.wakes.requests.lock().wake();
    }
}

/// Cooperative runtime that drives form writes, settle passes and related-value fetches.
///
/// Only one `Runtime` can exist per thread. Everything it runs happens on that thread;
/// there is no parallelism, only interleaving of actions, tasks and asynchronous actions.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime {
    async_actions: SlabMap<Rc<AsyncAction>>,
    actions_buffer: Vec<Action>,
    tasks_buffer: Vec<Task>,
}
impl Runtime {
    pub fn new() -> Self {
        if Globals::with(|g| replace(&mut g.is_runtime_exists, true)) {
            panic!("Only one `Runtime` can exist in the same thread at the same time.");
        };
        Self {
            async_actions: SlabMap::new(),
            actions_buffer: Vec::new(),
            tasks_buffer: Vec::new(),
        }
    }

    pub fn ac(&mut self) -> &mut ActionContext {
        ActionContext::new(self)
    }

    /// Perform scheduled actions, including resumed asynchronous actions.
    ///
    /// Returns `true` if any action was performed.
    pub fn run_actions(&mut self) -> bool {
        let mut handled = false;
        let mut actions = take(&mut self.actions_buffer);
        while Globals::get_actions(&mut actions) {
            for action in actions.drain(..) {
                action.call(self.ac());
                handled = true;
            }
        }
        self.actions_buffer = actions;
        handled
    }

    /// Perform scheduled tasks.
    ///
    /// If `kind` is `None`, tasks of every kind are executed in ascending order of kind id.
    ///
    /// Returns `true` if any task was performed.
    pub fn run_tasks(&mut self, kind: Option<TaskKind>) -> bool {
        let mut tasks = take(&mut self.tasks_buffer);
        Globals::get_tasks(kind, &mut tasks);
        let handled = !tasks.is_empty();
        for task in tasks.drain(..) {
            task.run(self.ac());
        }
        self.tasks_buffer = tasks;
        handled
    }

    /// Repeat [`run_actions`](Self::run_actions) and [`run_tasks`](Self::run_tasks) until there is nothing left to do.
    pub fn update(&mut self) {
        loop {
            if self.run_actions() {
                continue;
            }
            if self.run_tasks(None) {
                continue;
            }
            break;
        }
    }

    /// Wait while there is no process to be executed by [`update`](Self::update).
    pub async fn wait_for_ready(&mut self) {
        poll_fn(|cx| Globals::with(|g| g.wait_for_ready(cx))).await
    }

    /// Number of asynchronous actions that have not completed yet.
    pub fn pending_async_actions(&self) -> usize {
        self.async_actions.len()
    }

    fn cancel_async_actions(&mut self) {
        let mut acts = Vec::new();
        while !self.async_actions.is_empty() {
            acts.extend(self.async_actions.values().cloned());
            for act in &acts {
                act.cancel(self.ac());
            }
            acts.clear();
        }
    }
}
impl Drop for Runtime {
    fn drop(&mut self) {
        self.cancel_async_actions();
        Globals::with(|g| g.finish_runtime());
    }
}

/// Context for changing form state.
///
/// Every write to a [`Form`](crate::Form) requires this context, so writes only happen
/// while the [`Runtime`] is running actions or tasks.
#[repr(transparent)]
pub struct ActionContext(Runtime);

impl ActionContext {
    fn new(rt: &mut Runtime) -> &mut Self {
        unsafe { transmute(rt) }
    }
}

/// Spawns a new action.
pub fn spawn_action(f: impl FnOnce(&mut ActionContext) + 'static) {
    Action(Box::new(f)).schedule()
}

/// Spawns a new asynchronous action.
///
/// The future is polled by the runtime. Use [`AsyncActionContext::call`] to write state after an `.await`.
pub fn spawn_action_async<Fut>(f: impl FnOnce(AsyncActionContext) -> Fut + 'static)
where
    Fut: Future<Output = ()> + 'static,
{
    spawn_action(|ac| AsyncAction::start(ac, f))
}

struct Action(Box<dyn FnOnce(&mut ActionContext)>);

impl Action {
    fn call(self, ac: &mut ActionContext) {
        (self.0)(ac)
    }
    fn schedule(self) {
        let _ = Globals::try_with(|g| g.push_action(self));
    }
}

struct AsyncAction {
    aac_source: AsyncActionContextSource,
    data: RefCell<Option<AsyncActionData>>,
}
impl AsyncAction {
    fn start<Fut>(ac: &mut ActionContext, f: impl FnOnce(AsyncActionContext) -> Fut + 'static)
    where
        Fut: Future<Output = ()> + 'static,
    {
        let aac_source = AsyncActionContextSource::new();
        let aac = aac_source.context();
        let future = aac_source.call(ac, || f(aac));
        let action = Rc::new(Self {
            aac_source,
            data: RefCell::new(None),
        });
        let id = ac.0.async_actions.insert(action.clone());
        let waker = WakeTable::waker(action.clone());
        *action.data.borrow_mut() = Some(AsyncActionData {
            id,
            waker,
            future: Box::pin(future),
        });
        action.next(ac);
    }
    fn call(
        self: &Rc<Self>,
        ac: &mut ActionContext,
        f: impl FnOnce(&mut Option<AsyncActionData>) -> Option<usize>,
    ) {
        let id_remove = self.aac_source.call(ac, || f(&mut self.data.borrow_mut()));
        if let Some(id_remove) = id_remove {
            ac.0.async_actions.remove(id_remove);
        }
    }
    fn cancel(self: &Rc<Self>, ac: &mut ActionContext) {
        self.call(ac, |data| Some(data.take()?.id))
    }
    fn next(self: Rc<Self>, ac: &mut ActionContext) {
        self.call(ac, |data| {
            let d = data.as_mut()?;
            let mut cx = Context::from_waker(&d.waker);
            if d.future.as_mut().poll(&mut cx).is_ready() {
                Some(data.take()?.id)
            } else {
                None
            }
        });
    }
    fn to_action(self: &Rc<Self>) -> Action {
        let this = self.clone();
        Action(Box::new(move |ac| this.next(ac)))
    }
}

struct AsyncActionData {
    future: Pin<Box<dyn Future<Output = ()>>>,
    waker: Waker,
    id: usize,
}

#[derive(Default)]
struct WakeTable {
    tasks: SlabMap<Rc<AsyncAction>>,
    requests: WakeRequests,
}
impl WakeTable {
    fn waker(action: Rc<AsyncAction>) -> Waker {
        Globals::with(|g| {
            let key = g.wakes.tasks.insert(action);
            RawWake::new(&g.wakes.requests, key)
        })
        .into()
    }
}

#[derive(Clone, Default)]
struct WakeRequests(Arc<Mutex<RawWakeRequests>>);

impl WakeRequests {
    fn lock(&self) -> MutexGuard<RawWakeRequests> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        }
    }
}

#[derive(Default)]
struct RawWakeRequests {
    wakes: Vec<usize>,
    drops: Vec<usize>,
    waker: Option<Waker>,
}
impl RawWakeRequests {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

struct RawWake {
    requests: WakeRequests,
    key: usize,
}
impl RawWake {
    fn new(requests: &WakeRequests, key: usize) -> Arc<Self> {
        Arc::new(RawWake {
            requests: requests.clone(),
            key,
        })
    }
}
impl Wake for RawWake {
    fn wake(self: Arc<Self>) {
        let mut requests = self.requests.lock();
        requests.wakes.push(self.key);
        requests.wake();
    }
}
impl Drop for RawWake {
    fn drop(&mut self) {
        self.requests.lock().drops.push(self.key);
    }
}

struct AsyncActionContextSource(Rc<RefCell<*mut Runtime>>);

impl AsyncActionContextSource {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(null_mut())))
    }
    fn call<T>(&self, ac: &mut ActionContext, f: impl FnOnce() -> T) -> T {
        let p: *mut Runtime = &mut ac.0;
        assert!(self.0.borrow().is_null());
        *self.0.borrow_mut() = p;
        let ret = f();
        assert!(*self.0.borrow() == p);
        *self.0.borrow_mut() = null_mut();
        ret
    }
    fn context(&self) -> AsyncActionContext {
        AsyncActionContext(self.0.clone())
    }
}

/// Context for changing form state from an asynchronous action.
pub struct AsyncActionContext(Rc<RefCell<*mut Runtime>>);

impl AsyncActionContext {
    /// Calls `f` with an [`ActionContext`].
    ///
    /// Only valid while the runtime is polling the asynchronous action, which is always the case inside its future.
    pub fn call<T>(&self, f: impl FnOnce(&mut ActionContext) -> T) -> T {
        let p = *self.0.borrow();
        assert!(
            !p.is_null(),
            "`AsyncActionContext` cannot be used outside of the asynchronous action."
        );
        unsafe { f((*p).ac()) }
    }
}

/// A unit of deferred work run by [`Runtime::run_tasks`].
pub struct Task(RawTask);

impl Task {
    pub fn new(f: impl FnOnce(&mut ActionContext) + 'static) -> Self {
        Task(RawTask::Box(Box::new(f)))
    }
    pub fn from_weak_fn<T: Any>(
        this: Weak<T>,
        f: impl Fn(Rc<T>, &mut ActionContext) + Copy + 'static,
    ) -> Self {
        Task(RawTask::Weak {
            this,
            f: Box::new(move |this, ac| {
                if let Some(this) = this.upgrade() {
                    if let Ok(this) = this.downcast() {
                        f(this, ac)
                    }
                }
            }),
        })
    }

    pub fn schedule_with(self, kind: TaskKind) {
        Globals::schedule_task(kind, self)
    }
    pub fn schedule(self) {
        self.schedule_with(TaskKind::default());
    }
    pub(crate) fn run(self, ac: &mut ActionContext) {
        match self.0 {
            RawTask::Box(f) => f(ac),
            RawTask::Weak { this, f } => f(this, ac),
        }
    }
}

enum RawTask {
    Box(Box<dyn FnOnce(&mut ActionContext)>),
    Weak {
        this: Weak<dyn Any>,
        #[allow(clippy::type_complexity)]
        f: Box<dyn Fn(Weak<dyn Any>, &mut ActionContext)>,
    },
}

/// kind of tasks performed by the runtime.
///
/// Tasks with a smaller id run first.
#[derive(Clone, Copy, Display, Debug, Ex)]
#[derive_ex(PartialEq, Eq, Hash, Default)]
#[display("{id}: {name}")]
#[default(Self::new(0, "<default>"))]
pub struct TaskKind {
    id: i8,
    #[eq(ignore)]
    name: &'static str,
}
impl TaskKind {
    /// Low-priority work that runs after every other kind, such as settle passes.
    pub const IDLE: TaskKind = TaskKind::new(i8::MAX, "idle");

    pub const fn new(id: i8, name: &'static str) -> Self {
        Self { id, name }
    }
}

#[derive(Default)]
struct Tasks(BTreeMap<i8, Vec<Task>>);

impl Tasks {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    fn push(&mut self, kind: TaskKind, task: Task) {
        self.0.entry(kind.id).or_default().push(task);
    }
    fn drain(&mut self, kind: Option<TaskKind>, to: &mut Vec<Task>) {
        if let Some(kind) = kind {
            if let Some(mut tasks) = self.0.remove(&kind.id) {
                to.append(&mut tasks);
            }
        } else {
            for (_, mut tasks) in take(&mut self.0) {
                to.append(&mut tasks);
            }
        }
    }
}
