//! Per-task bounded FIFO message queues.

use alloc::collections::VecDeque;

use super::tcb::TaskId;
use crate::prelude::*;

pub const MAX_MESSAGES_PER_QUEUE: usize = 32;
pub const MAX_MESSAGE_SIZE: usize = 256;

#[derive(Clone)]
pub struct Message {
    pub sender: TaskId,
    pub msg_type: u32,
    pub payload: [u8; MAX_MESSAGE_SIZE],
    pub len: usize,
}

impl Message {
    pub fn new(sender: TaskId, msg_type: u32, data: &[u8]) -> KResult<Self> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(Error::InvalidArgument);
        }
        let mut payload = [0u8; MAX_MESSAGE_SIZE];
        payload[..data.len()].copy_from_slice(data);
        Ok(Self { sender, msg_type, payload, len: data.len() })
    }

    pub fn data(&self) -> &[u8] {
        &self.payload[..self.len]
    }
}

pub struct MessageQueue {
    queue: VecDeque<Message>,
}

impl MessageQueue {
    pub const fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    /// Enqueue `msg`. Fails with `NoSpace` once the queue holds
    /// [`MAX_MESSAGES_PER_QUEUE`] messages.
    pub fn push(&mut self, msg: Message) -> KResult<()> {
        if self.queue.len() >= MAX_MESSAGES_PER_QUEUE {
            return Err(Error::NoSpace);
        }
        self.queue.push_back(msg);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= MAX_MESSAGES_PER_QUEUE
    }
}
