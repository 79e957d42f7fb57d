//! Post-RT events: notifications queued by the audio thread for the main
//! thread's next idle tick.

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

pub const POST_RT_QUEUE_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostRtEventKind {
    ParameterChanged,
    ProgramChanged,
    MidiProgramChanged,
    NoteOn,
    NoteOff,
    LatencyChanged,
}

#[derive(Debug, Clone, Copy)]
pub struct PostRtEvent {
    pub kind: PostRtEventKind,
    pub plugin_id: u32,
    pub value1: i32,
    pub value2: i32,
    pub value3: i32,
    pub valuef: f32,
    /// Whether idle should also raise an engine callback for this event.
    pub send_callback: bool,
}

/// Two-stage queue: a lock-free pending side fed by the RT thread and a
/// main-thread list filled by `splice`.
///
/// The RT append never locks. Splice takes the ready-list mutex with a
/// try-lock and defers to the next tick on contention, so the swap is atomic
/// from the reader's point of view.
pub struct PostRtQueue {
    pending: ArrayQueue<PostRtEvent>,
    ready: Mutex<Vec<PostRtEvent>>,
}

impl PostRtQueue {
    pub fn new() -> Self {
        Self {
            pending: ArrayQueue::new(POST_RT_QUEUE_SIZE),
            ready: Mutex::new(Vec::with_capacity(POST_RT_QUEUE_SIZE)),
        }
    }

    /// RT-safe append. Returns false when the queue is full and the event
    /// was dropped.
    pub fn push_rt(&self, event: PostRtEvent) -> bool {
        self.pending.push(event).is_ok()
    }

    /// Move pending events into the ready list. Returns false when the
    /// ready list was contended and the splice was deferred.
    pub fn splice(&self) -> bool {
        let Some(mut ready) = self.ready.try_lock() else {
            return false;
        };
        while let Some(ev) = self.pending.pop() {
            ready.push(ev);
        }
        true
    }

    /// Drain the ready list into `out`, preserving append order.
    pub fn take_ready(&self, out: &mut Vec<PostRtEvent>) {
        let mut ready = self.ready.lock();
        out.append(&mut ready);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for PostRtQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(value1: i32) -> PostRtEvent {
        PostRtEvent {
            kind: PostRtEventKind::ParameterChanged,
            plugin_id: 0,
            value1,
            value2: 0,
            value3: 0,
            valuef: 0.0,
            send_callback: true,
        }
    }

    #[test]
    fn splice_preserves_append_order() {
        let q = PostRtQueue::new();
        for i in 0..10 {
            assert!(q.push_rt(ev(i)));
        }
        assert!(q.splice());
        let mut out = Vec::new();
        q.take_ready(&mut out);
        let order: Vec<i32> = out.iter().map(|e| e.value1).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn overflow_drops() {
        let q = PostRtQueue::new();
        for i in 0..POST_RT_QUEUE_SIZE {
            assert!(q.push_rt(ev(i as i32)));
        }
        assert!(!q.push_rt(ev(-1)));
    }

    #[test]
    fn splice_defers_on_contention() {
        let q = PostRtQueue::new();
        q.push_rt(ev(1));
        let guard = q.ready.lock();
        assert!(!q.splice());
        assert_eq!(q.pending_len(), 1);
        drop(guard);
        assert!(q.splice());
        assert_eq!(q.pending_len(), 0);
    }
}
