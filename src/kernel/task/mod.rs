pub mod message;
pub mod mutex;
pub mod scheduler;
pub mod tcb;

pub use message::{Message, MAX_MESSAGES_PER_QUEUE, MAX_MESSAGE_SIZE};
pub use mutex::TaskMutex;
pub use tcb::{Priority, State, TaskId};
