use crate::error::StorageError;
use datashare_model::Binding;
use futures::stream::{FusedStream, SelectAll};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

/// A lazily evaluated, pull-driven sequence of bindings.
///
/// Polling drives the producer; a consumer that stops polling suspends it, and dropping the
/// stream cancels it.
pub type BindingStream = Pin<Box<dyn Stream<Item = Result<Binding, StorageError>> + Send>>;

/// Rewrites or drops a binding produced by the input with the given index of a [UnionStream].
pub type BindingTransform = Arc<dyn Fn(usize, Binding) -> Option<Binding> + Send + Sync>;

type IndexedStream =
    Pin<Box<dyn Stream<Item = (usize, Result<Binding, StorageError>)> + Send>>;

/// Returns a stream that ends immediately.
pub fn empty_stream() -> BindingStream {
    Box::pin(futures::stream::empty())
}

/// Merges `streams` into a single stream. See [UnionStream].
pub fn union_streams(streams: Vec<BindingStream>) -> BindingStream {
    Box::pin(UnionStream::new(streams, None))
}

/// Merges several binding streams into one.
///
/// Inputs are polled fairly, so no input can starve the others and a slow consumer suspends all
/// of them. There is no ordering guarantee across inputs and no deduplication. The first error
/// of any input is forwarded and terminates the merged stream, dropping the remaining inputs.
pub struct UnionStream {
    inputs: SelectAll<IndexedStream>,
    transform: Option<BindingTransform>,
    finished: bool,
}

impl UnionStream {
    /// Creates a new [UnionStream]. If a `transform` is given, it is applied to every binding
    /// together with the index of the input that produced it.
    pub fn new(streams: Vec<BindingStream>, transform: Option<BindingTransform>) -> Self {
        let inputs = streams
            .into_iter()
            .enumerate()
            .map(|(index, stream)| -> IndexedStream {
                Box::pin(stream.map(move |item| (index, item)))
            })
            .collect::<SelectAll<_>>();
        Self {
            inputs,
            transform,
            finished: false,
        }
    }
}

impl Stream for UnionStream {
    type Item = Result<Binding, StorageError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match ready!(self.inputs.poll_next_unpin(cx)) {
                None => {
                    self.finished = true;
                    return Poll::Ready(None);
                }
                Some((_, Err(error))) => {
                    self.finished = true;
                    self.inputs = SelectAll::new();
                    return Poll::Ready(Some(Err(error)));
                }
                Some((index, Ok(binding))) => {
                    let binding = match &self.transform {
                        None => Some(binding),
                        Some(transform) => transform(index, binding),
                    };
                    if let Some(binding) = binding {
                        return Poll::Ready(Some(Ok(binding)));
                    }
                }
            }
        }
    }
}

impl FusedStream for UnionStream {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datashare_model::{Constant, Variable};
    use futures::TryStreamExt;

    fn bindings(values: &[&str]) -> BindingStream {
        let items = values
            .iter()
            .map(|v| {
                Ok::<Binding, StorageError>(
                    [(Variable::new_unchecked("x"), Constant::new(*v))]
                        .into_iter()
                        .collect(),
                )
            })
            .collect::<Vec<_>>();
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn union_keeps_duplicates() {
        let stream = union_streams(vec![bindings(&["a", "b"]), bindings(&["a"])]);
        let mut values = stream
            .map_ok(|b| b.get(&Variable::new_unchecked("x")).unwrap().to_string())
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        values.sort();
        assert_eq!(values, vec!["a", "a", "b"]);
    }

    #[tokio::test]
    async fn union_of_nothing_is_empty() {
        let result = union_streams(Vec::new()).try_collect::<Vec<_>>().await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn union_stops_at_first_error() {
        let failing: BindingStream = Box::pin(futures::stream::iter(vec![Err::<Binding, _>(
            StorageError::Remote("boom".to_owned()),
        )]));
        let mut stream = union_streams(vec![failing, bindings(&["a", "b", "c"])]);

        let mut saw_error = false;
        while let Some(item) = stream.next().await {
            if item.is_err() {
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn transform_drops_and_rewrites() {
        let transform: BindingTransform = Arc::new(|index: usize, mut binding: Binding| {
            if index == 1 {
                return None;
            }
            binding.insert(Variable::new_unchecked("g"), Constant::new("ex:g0"));
            Some(binding)
        });
        let stream = UnionStream::new(vec![bindings(&["a"]), bindings(&["b"])], Some(transform));
        let result = stream.try_collect::<Vec<_>>().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(
            result[0].get(&Variable::new_unchecked("g")),
            Some(&Constant::new("ex:g0"))
        );
    }
}
