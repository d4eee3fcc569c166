use crate::{Binding, Constant, Term, Variable};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A triple whose positions are [Term]s.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl TriplePattern {
    pub fn new(subject: impl Into<Term>, predicate: impl Into<Term>, object: impl Into<Term>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// Parses each position with [Term::parse].
    pub fn parse(
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<Self, crate::TermParseError> {
        Ok(Self::new(
            Term::parse(subject)?,
            Term::parse(predicate)?,
            Term::parse(object)?,
        ))
    }

    /// Iterates over the variables of this pattern in subject, predicate, object order.
    /// A variable that appears twice is returned twice.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter_map(Term::as_variable)
    }

    /// Matches `fact` against this pattern, extending `binding`.
    ///
    /// Variables already bound in `binding` must agree with the fact. Returns [None] if the
    /// fact does not match.
    pub fn match_fact(&self, fact: &Fact, binding: &Binding) -> Option<Binding> {
        let mut result = binding.clone();
        for (term, value) in [
            (&self.subject, &fact.subject),
            (&self.predicate, &fact.predicate),
            (&self.object, &fact.object),
        ] {
            match term {
                Term::Constant(constant) => {
                    if constant != value {
                        return None;
                    }
                }
                Term::Variable(variable) => match result.get(variable) {
                    Some(bound) if bound != value => return None,
                    Some(_) => {}
                    None => {
                        result.insert(variable.clone(), value.clone());
                    }
                },
            }
        }
        Some(result)
    }
}

impl Display for TriplePattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

impl From<Fact> for TriplePattern {
    fn from(value: Fact) -> Self {
        Self::new(value.subject, value.predicate, value.object)
    }
}

/// A triple without variables.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub subject: Constant,
    pub predicate: Constant,
    pub object: Constant,
}

impl Fact {
    pub fn new(
        subject: impl Into<Constant>,
        predicate: impl Into<Constant>,
        object: impl Into<Constant>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

impl Display for Fact {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_fact_binds_variables() {
        let pattern = TriplePattern::parse("?x", "foaf:knows", "ex:bob").unwrap();
        let fact = Fact::new("ex:alice", "foaf:knows", "ex:bob");

        let binding = pattern.match_fact(&fact, &Binding::new()).unwrap();
        assert_eq!(
            binding.get(&Variable::new_unchecked("x")),
            Some(&Constant::new("ex:alice"))
        );
    }

    #[test]
    fn match_fact_respects_repeated_variable() {
        let pattern = TriplePattern::parse("?x", "ex:same", "?x").unwrap();
        assert!(pattern
            .match_fact(&Fact::new("ex:a", "ex:same", "ex:b"), &Binding::new())
            .is_none());
        assert!(pattern
            .match_fact(&Fact::new("ex:a", "ex:same", "ex:a"), &Binding::new())
            .is_some());
    }

    #[test]
    fn match_fact_respects_existing_binding() {
        let pattern = TriplePattern::parse("?x", "foaf:name", "?name").unwrap();
        let mut binding = Binding::new();
        binding.insert(Variable::new_unchecked("x"), Constant::new("ex:carol"));

        let fact = Fact::new("ex:bob", "foaf:name", "\"Bob\"");
        assert!(pattern.match_fact(&fact, &binding).is_none());
    }
}
