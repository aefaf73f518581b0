use crossbeam::queue::SegQueue;

use crate::ecs::world::World;

type Command = Box<dyn FnOnce(&mut World) + Send>;

/// A lock-free queue of deferred structural mutations.
///
/// Pushing takes `&self`, so running systems, lifecycle hooks and run
/// conditions can all queue work against the world they only share. The
/// queue is drained in push order at the next sync point.
#[derive(Default)]
pub struct CommandQueue {
    queue: SegQueue<Command>,
}

impl CommandQueue {
    pub fn push(&self, command: impl FnOnce(&mut World) + Send + 'static) {
        self.queue.push(Box::new(command));
    }

    pub fn pop(&self) -> Option<Command> {
        self.queue.pop()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.queue.len())
            .finish()
    }
}
