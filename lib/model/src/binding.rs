use crate::{Constant, Variable};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt::{Display, Formatter};

/// A solution mapping from variables to the constants they are bound to.
///
/// On the wire a binding is a JSON object keyed by variable name (without `?`).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Binding(BTreeMap<Variable, Constant>);

impl Binding {
    /// Creates an empty [Binding].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: &Variable) -> Option<&Constant> {
        self.0.get(variable)
    }

    pub fn contains(&self, variable: &Variable) -> bool {
        self.0.contains_key(variable)
    }

    /// Binds `variable` to `value`, returning the previous value.
    pub fn insert(&mut self, variable: Variable, value: Constant) -> Option<Constant> {
        self.0.insert(variable, value)
    }

    pub fn remove(&mut self, variable: &Variable) -> Option<Constant> {
        self.0.remove(variable)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Variable, Constant> {
        self.0.iter()
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.0.keys()
    }

    /// Two bindings are compatible if every variable bound in both maps to the same constant.
    pub fn is_compatible(&self, other: &Binding) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .iter()
            .all(|(variable, value)| large.get(variable).map_or(true, |other| other == value))
    }

    /// Merges two compatible bindings. Returns [None] if they are not compatible.
    pub fn merge(&self, other: &Binding) -> Option<Binding> {
        if !self.is_compatible(other) {
            return None;
        }
        let mut result = self.clone();
        for (variable, value) in other.iter() {
            result
                .0
                .entry(variable.clone())
                .or_insert_with(|| value.clone());
        }
        Some(result)
    }

    /// Restricts the binding to `variables`. Unbound variables are left out.
    #[must_use]
    pub fn project<'a>(&self, variables: impl IntoIterator<Item = &'a Variable>) -> Binding {
        variables
            .into_iter()
            .filter_map(|variable| {
                self.get(variable)
                    .map(|value| (variable.clone(), value.clone()))
            })
            .collect()
    }
}

impl FromIterator<(Variable, Constant)> for Binding {
    fn from_iter<T: IntoIterator<Item = (Variable, Constant)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Binding {
    type Item = (Variable, Constant);
    type IntoIter = btree_map::IntoIter<Variable, Constant>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Binding {
    type Item = (&'a Variable, &'a Constant);
    type IntoIter = btree_map::Iter<'a, Variable, Constant>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for Binding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (variable, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{variable}: {value}")?;
        }
        f.write_str("}")
    }
}
