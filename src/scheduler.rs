use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::{
    exception::Exception,
    value::{UserFunction, Value},
};

/// State of one cooperative task. A spawned task holds its function and
/// pre-evaluated arguments without executing anything; the body only runs
/// once the task becomes ready through an `await`.
pub enum TaskState {
    Pending {
        function: UserFunction,
        args: Vec<Value>,
    },
    Running,
    Done(Result<Value, Exception>),
}

#[derive(Clone)]
pub struct TaskHandle {
    pub id: u64,
    state: Rc<RefCell<TaskState>>,
}

impl TaskHandle {
    fn new(id: u64, function: UserFunction, args: Vec<Value>) -> Self {
        Self {
            id,
            state: Rc::new(RefCell::new(TaskState::Pending { function, args })),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.borrow(), TaskState::Pending { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.state.borrow(), TaskState::Running)
    }

    /// Transitions Pending -> Running, handing back the captured call.
    pub fn take_pending(&self) -> Option<(UserFunction, Vec<Value>)> {
        let mut state = self.state.borrow_mut();
        if matches!(&*state, TaskState::Pending { .. }) {
            match std::mem::replace(&mut *state, TaskState::Running) {
                TaskState::Pending { function, args } => Some((function, args)),
                _ => None,
            }
        } else {
            None
        }
    }

    pub fn finish(&self, result: Result<Value, Exception>) {
        *self.state.borrow_mut() = TaskState::Done(result);
    }

    /// Memoized result once the task completed.
    pub fn result(&self) -> Option<Result<Value, Exception>> {
        match &*self.state.borrow() {
            TaskState::Done(result) => Some(result.clone()),
            _ => None,
        }
    }
}

/// Single-threaded cooperative FIFO scheduler. Tasks enter the ready queue
/// only when awaited; between suspension points a task runs to completion,
/// so readiness order is exactly the order awaits occur. A task that is
/// never awaited never enters the queue and its body never runs.
#[derive(Default)]
pub struct Scheduler {
    ready: VecDeque<TaskHandle>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, function: UserFunction, args: Vec<Value>) -> TaskHandle {
        self.next_id += 1;
        TaskHandle::new(self.next_id, function, args)
    }

    pub fn mark_ready(&mut self, handle: &TaskHandle) {
        if handle.is_pending() {
            self.ready.push_back(handle.clone());
        }
    }

    pub fn next_ready(&mut self) -> Option<TaskHandle> {
        while let Some(handle) = self.ready.pop_front() {
            if handle.is_pending() {
                return Some(handle);
            }
        }
        None
    }
}
