use datashare_common::error::StorageError;
use datashare_common::BindingStream;
use datashare_model::Binding;
use futures::stream::FusedStream;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Re-evaluates the right-hand side of a join from scratch.
pub type StreamFactory = Box<dyn Fn() -> BindingStream + Send + Sync>;

/// How a [NestedLoopJoin] combines a left binding with the right-hand side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    /// Emits the merge of every compatible pair.
    Inner,
    /// Like [JoinKind::Inner], but a left binding without any compatible right binding is
    /// emitted on its own.
    Left,
    /// Emits a left binding only if no right binding is compatible with it.
    Minus,
}

enum JoinState {
    /// Pulling the left input into the buffer.
    Filling,
    /// Scanning the right input against the buffer.
    Probing {
        right: BindingStream,
        left_done: bool,
    },
    Done,
}

/// A block nested-loop join with bounded memory.
///
/// The left input is pulled into a buffer of at most `capacity` bindings. Once the buffer is full
/// (or the left input ends), the left input is no longer polled and the right input is evaluated
/// from scratch and matched against every buffered binding. When the right input ends, the buffer
/// is cleared and filling resumes. The right input is therefore evaluated
/// `ceil(|left| / capacity)` times, and never if the left input is empty.
///
/// The first error of either input is emitted and ends the join.
pub struct NestedLoopJoin {
    kind: JoinKind,
    left: BindingStream,
    right: StreamFactory,
    capacity: usize,
    buffer: Vec<Binding>,
    /// Whether the buffered binding at the same index has found a compatible right binding.
    matched: Vec<bool>,
    pending: VecDeque<Binding>,
    state: JoinState,
}

impl NestedLoopJoin {
    pub fn new(kind: JoinKind, left: BindingStream, right: StreamFactory, capacity: usize) -> Self {
        Self {
            kind,
            left,
            right,
            capacity: capacity.max(1),
            buffer: Vec::new(),
            matched: Vec::new(),
            pending: VecDeque::new(),
            state: JoinState::Filling,
        }
    }

    fn start_probing(&mut self, left_done: bool) {
        self.state = JoinState::Probing {
            right: (self.right)(),
            left_done,
        };
    }

    fn finish(&mut self) {
        self.state = JoinState::Done;
        self.buffer.clear();
        self.matched.clear();
        self.pending.clear();
    }
}

/// Matches one right binding against the buffer.
fn probe(
    kind: JoinKind,
    buffer: &[Binding],
    matched: &mut [bool],
    pending: &mut VecDeque<Binding>,
    right: &Binding,
) {
    for (left, matched) in buffer.iter().zip(matched.iter_mut()) {
        match kind {
            JoinKind::Inner | JoinKind::Left => {
                if let Some(merged) = left.merge(right) {
                    *matched = true;
                    pending.push_back(merged);
                }
            }
            JoinKind::Minus => {
                if !*matched && left.is_compatible(right) {
                    *matched = true;
                }
            }
        }
    }
}

/// Emits what the buffer contributes once the right input has ended.
fn flush_unmatched(
    kind: JoinKind,
    buffer: &mut Vec<Binding>,
    matched: &mut Vec<bool>,
    pending: &mut VecDeque<Binding>,
) {
    if matches!(kind, JoinKind::Left | JoinKind::Minus) {
        pending.extend(
            buffer
                .drain(..)
                .zip(matched.iter())
                .filter(|(_, matched)| !**matched)
                .map(|(binding, _)| binding),
        );
    }
    buffer.clear();
    matched.clear();
}

impl Stream for NestedLoopJoin {
    type Item = Result<Binding, StorageError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(binding) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(binding)));
            }

            match &mut this.state {
                JoinState::Done => return Poll::Ready(None),
                JoinState::Filling => match ready!(this.left.poll_next_unpin(cx)) {
                    Some(Ok(binding)) => {
                        this.buffer.push(binding);
                        this.matched.push(false);
                        if this.buffer.len() >= this.capacity {
                            this.start_probing(false);
                        }
                    }
                    Some(Err(error)) => {
                        this.finish();
                        return Poll::Ready(Some(Err(error)));
                    }
                    None if this.buffer.is_empty() => this.finish(),
                    None => this.start_probing(true),
                },
                JoinState::Probing { right, left_done } => {
                    let left_done = *left_done;
                    match ready!(right.poll_next_unpin(cx)) {
                        Some(Ok(binding)) => probe(
                            this.kind,
                            &this.buffer,
                            &mut this.matched,
                            &mut this.pending,
                            &binding,
                        ),
                        Some(Err(error)) => {
                            this.finish();
                            return Poll::Ready(Some(Err(error)));
                        }
                        None => {
                            flush_unmatched(
                                this.kind,
                                &mut this.buffer,
                                &mut this.matched,
                                &mut this.pending,
                            );
                            this.state = if left_done {
                                JoinState::Done
                            } else {
                                JoinState::Filling
                            };
                        }
                    }
                }
            }
        }
    }
}

impl FusedStream for NestedLoopJoin {
    fn is_terminated(&self) -> bool {
        matches!(self.state, JoinState::Done) && self.pending.is_empty()
    }
}

impl Debug for NestedLoopJoin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedLoopJoin")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}
