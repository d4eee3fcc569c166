//! Solution modifiers: distinct, order by, slice and grouping.

use crate::algebra::{AggregateExpression, OrderExpression};
use crate::expression::{integer_literal, ExpressionEvaluatorRef, ExpressionValue};
use datashare_common::error::StorageError;
use datashare_common::BindingStream;
use datashare_model::{Binding, Variable};
use futures::{future, StreamExt, TryStreamExt};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;

/// Drops bindings that are equal to one emitted before.
pub fn distinct(input: BindingStream) -> BindingStream {
    let mut seen = FxHashSet::default();
    input
        .try_filter(move |binding| future::ready(seen.insert(binding.clone())))
        .boxed()
}

/// Skips `start` bindings and emits at most `length` bindings after that.
pub fn slice(input: BindingStream, start: usize, length: Option<usize>) -> BindingStream {
    let mut skipped = 0;
    let input = input.try_filter(move |_| {
        let keep = skipped >= start;
        if !keep {
            skipped += 1;
        }
        future::ready(keep)
    });
    match length {
        Some(length) => input.take(length).boxed(),
        None => input.boxed(),
    }
}

/// Materializes the input and sorts it by `keys`.
///
/// Keys that are unbound or fail to evaluate sort before all values. The sort is stable.
pub fn order_by(
    input: BindingStream,
    keys: Vec<OrderExpression>,
    evaluator: ExpressionEvaluatorRef,
) -> BindingStream {
    materialize(input, move |bindings| {
        let mut keyed = bindings
            .into_iter()
            .map(|binding| {
                let values = keys
                    .iter()
                    .map(|key| evaluator.evaluate(key.expression(), &binding).ok())
                    .collect::<Vec<_>>();
                (values, binding)
            })
            .collect::<Vec<_>>();
        keyed.sort_by(|(lhs, _), (rhs, _)| compare_keys(&keys, lhs, rhs));
        keyed.into_iter().map(|(_, binding)| binding).collect()
    })
}

fn compare_keys(
    keys: &[OrderExpression],
    lhs: &[Option<ExpressionValue>],
    rhs: &[Option<ExpressionValue>],
) -> Ordering {
    for ((key, lhs), rhs) in keys.iter().zip(lhs).zip(rhs) {
        let ordering = lhs.cmp(rhs);
        let ordering = if key.is_descending() {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering.is_ne() {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Materializes the input, groups it by `variables` and computes `aggregates` per group.
///
/// Groups are emitted in the order their first binding arrived. Without group variables, an
/// empty input still yields one group.
pub fn group(
    input: BindingStream,
    variables: Vec<Variable>,
    aggregates: Vec<(Variable, AggregateExpression)>,
    evaluator: ExpressionEvaluatorRef,
) -> BindingStream {
    materialize(input, move |bindings| {
        let mut index = FxHashMap::default();
        let mut groups: Vec<(Binding, Vec<Binding>)> = Vec::new();
        for binding in bindings {
            let key = binding.project(&variables);
            let position = *index.entry(key.clone()).or_insert_with(|| {
                groups.push((key, Vec::new()));
                groups.len() - 1
            });
            groups[position].1.push(binding);
        }
        if groups.is_empty() && variables.is_empty() {
            groups.push((Binding::new(), Vec::new()));
        }

        groups
            .into_iter()
            .map(|(mut key, members)| {
                for (variable, aggregate) in &aggregates {
                    if let Some(value) = aggregate_group(aggregate, &members, &evaluator) {
                        key.insert(variable.clone(), integer_literal(value));
                    }
                }
                key
            })
            .collect()
    })
}

/// Computes one aggregate over a group. Returns [None] if the aggregate is undefined, e.g., a sum
/// over a non-integer value.
fn aggregate_group(
    aggregate: &AggregateExpression,
    members: &[Binding],
    evaluator: &ExpressionEvaluatorRef,
) -> Option<i64> {
    match aggregate {
        AggregateExpression::Count {
            expression: None,
            distinct: false,
        } => i64::try_from(members.len()).ok(),
        AggregateExpression::Count {
            expression: None,
            distinct: true,
        } => i64::try_from(members.iter().collect::<FxHashSet<_>>().len()).ok(),
        AggregateExpression::Count {
            expression: Some(expression),
            distinct,
        } => {
            let values = members
                .iter()
                .filter_map(|binding| evaluator.evaluate(expression, binding).ok());
            let count = if *distinct {
                values.collect::<FxHashSet<_>>().len()
            } else {
                values.count()
            };
            i64::try_from(count).ok()
        }
        AggregateExpression::Sum {
            expression,
            distinct,
        } => {
            let mut seen = FxHashSet::default();
            let mut sum = 0_i64;
            for binding in members {
                let value = evaluator.evaluate(expression, binding).ok()?;
                if *distinct && !seen.insert(value.clone()) {
                    continue;
                }
                let ExpressionValue::Integer(value) = value else {
                    return None;
                };
                sum = sum.checked_add(value)?;
            }
            Some(sum)
        }
    }
}

/// Collects the whole input, then emits the bindings returned by `f`.
fn materialize(
    input: BindingStream,
    f: impl FnOnce(Vec<Binding>) -> Vec<Binding> + Send + 'static,
) -> BindingStream {
    futures::stream::once(async move {
        let bindings = input.try_collect::<Vec<_>>().await?;
        Ok::<_, StorageError>(futures::stream::iter(f(bindings).into_iter().map(Ok)))
    })
    .try_flatten()
    .boxed()
}
