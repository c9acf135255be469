//! Task control block.
//!
//! Modeled on the reference kernel's `Thread` (see `kernel/task/scheduler.rs`
//! for how `ThreadState` transitions are enforced), but stored by value in a
//! fixed-capacity arena rather than behind `Arc`: the specification's
//! cooperative/preemptive model has no SMP and no task ever outlives the
//! kernel, so reference counting buys nothing a plain index doesn't.

use alloc::boxed::Box;

use super::message::MessageQueue;

pub const MAX_TASKS: usize = 64;
pub const DEFAULT_STACK_WORDS: usize = 4096; // 16 KiB

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    Blocked,
    Sleeping,
    Zombie,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Realtime,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// What a `Blocked` task is waiting on, so `mutex_unlock`/`message_send`
/// know who to wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitObject {
    None,
    Mutex(u32),
    MessageQueue,
}

pub struct Tcb {
    pub id: TaskId,
    pub name: &'static str,
    pub state: State,
    pub priority: Priority,
    pub saved_sp: *mut u32,
    stack: Box<[u32]>,
    pub entry: extern "C" fn(usize),
    pub arg: usize,
    pub exit_code: i32,
    pub wakeup_tick: u32,
    pub wait_object: WaitObject,
    pub messages: MessageQueue,
    pub runtime_ticks: u32,
    pub last_scheduled_tick: u32,
}

// SAFETY: a `Tcb` is only ever touched through the scheduler's global
// `Mutex`, and its raw `saved_sp` pointer is into its own owned stack.
unsafe impl Send for Tcb {}

extern "C" fn task_trampoline() -> ! {
    let id = super::scheduler::current_id();
    let (entry, arg) = super::scheduler::with_task(id, |tcb| (tcb.entry, tcb.arg))
        .expect("trampoline: current task missing from pool");

    (entry)(arg);
    super::scheduler::task_exit(0);
}

impl Tcb {
    pub fn new(
        id: TaskId,
        name: &'static str,
        entry: extern "C" fn(usize),
        arg: usize,
        priority: Priority,
    ) -> Self {
        let mut stack = alloc::vec![0u32; DEFAULT_STACK_WORDS].into_boxed_slice();
        let top = stack.len();

        // Lay out the frame `khal::task::context_switch`'s epilogue expects
        // to pop: edi, esi, ebp, ebx, eflags, return address. The return
        // address is `task_trampoline`, which looks the real entry point
        // and argument up from the TCB instead of relying on any register
        // or stack-argument convention the fabricated frame can't express.
        stack[top - 1] = task_trampoline as usize as u32;
        stack[top - 2] = 0x0200; // eflags: IF set
        stack[top - 3] = 0; // ebx
        stack[top - 4] = 0; // ebp
        stack[top - 5] = 0; // esi
        stack[top - 6] = 0; // edi

        let saved_sp = unsafe { stack.as_mut_ptr().add(top - 6) };

        Self {
            id,
            name,
            state: State::Ready,
            priority,
            saved_sp,
            stack,
            entry,
            arg,
            exit_code: 0,
            wakeup_tick: 0,
            wait_object: WaitObject::None,
            messages: MessageQueue::new(),
            runtime_ticks: 0,
            last_scheduled_tick: 0,
        }
    }
}
