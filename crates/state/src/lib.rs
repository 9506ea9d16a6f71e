//! Triple-indexed fact store for planning states.
//!
//! A [`State`] maps `(predicate, subject)` keys to opaque JSON values and
//! maintains reverse indices so the quantifier queries "exists a subject with
//! P(s) = v" and "forall subjects satisfying a filter, P(s) = v" answer
//! without scanning the full fact table. States are values: the planner
//! clones them and never mutates a cached state in place.

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A single `(predicate, subject, value)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: String,
    pub subject: String,
    pub value: Value,
}

impl Fact {
    pub fn new(
        predicate: impl Into<String>,
        subject: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            predicate: predicate.into(),
            subject: subject.into(),
            value,
        }
    }
}

/// Fact store with forward and reverse indices.
///
/// Keys `(predicate, subject)` are unique; setting an existing key replaces
/// its value. Missing keys are reported as absence, never as errors.
#[derive(Debug, Clone, Default)]
pub struct State {
    facts: HashMap<(String, String), Value>,
    /// predicate -> subjects carrying that predicate
    by_predicate: HashMap<String, HashSet<String>>,
    /// (predicate, canonical value) -> subjects with that exact fact
    by_value: HashMap<(String, String), HashSet<String>>,
}

/// Canonical rendering used as the reverse-index key for a value.
fn value_key(value: &Value) -> String {
    value.to_string()
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact, replacing any previous value for `(predicate, subject)`.
    pub fn set_fact(&mut self, predicate: &str, subject: &str, value: Value) {
        self.remove_fact(predicate, subject);

        self.by_predicate
            .entry(predicate.to_string())
            .or_default()
            .insert(subject.to_string());
        self.by_value
            .entry((predicate.to_string(), value_key(&value)))
            .or_default()
            .insert(subject.to_string());
        self.facts
            .insert((predicate.to_string(), subject.to_string()), value);
    }

    /// Get the value for `(predicate, subject)`, if present.
    pub fn get_fact(&self, predicate: &str, subject: &str) -> Option<&Value> {
        self.facts
            .get(&(predicate.to_string(), subject.to_string()))
    }

    /// Remove a fact, returning its previous value.
    pub fn remove_fact(&mut self, predicate: &str, subject: &str) -> Option<Value> {
        let key = (predicate.to_string(), subject.to_string());
        let previous = self.facts.remove(&key)?;

        if let Some(subjects) = self.by_predicate.get_mut(predicate) {
            subjects.remove(subject);
            if subjects.is_empty() {
                self.by_predicate.remove(predicate);
            }
        }
        let value_index_key = (predicate.to_string(), value_key(&previous));
        if let Some(subjects) = self.by_value.get_mut(&value_index_key) {
            subjects.remove(subject);
            if subjects.is_empty() {
                self.by_value.remove(&value_index_key);
            }
        }
        Some(previous)
    }

    /// True if any predicate mentions this subject.
    pub fn has_subject(&self, subject: &str) -> bool {
        self.by_predicate
            .values()
            .any(|subjects| subjects.contains(subject))
    }

    /// True iff the key exists and its value equals `value`.
    pub fn matches(&self, predicate: &str, subject: &str, value: &Value) -> bool {
        self.get_fact(predicate, subject) == Some(value)
    }

    /// All subjects carrying the given predicate, in sorted order.
    pub fn get_subjects_with_predicate(&self, predicate: &str) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .by_predicate
            .get(predicate)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        subjects.sort();
        subjects
    }

    /// All subjects with exactly this `(predicate, value)` fact, sorted.
    pub fn get_subjects_with_fact(&self, predicate: &str, value: &Value) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .by_value
            .get(&(predicate.to_string(), value_key(value)))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        subjects.sort();
        subjects
    }

    /// True if some subject (optionally restricted by `subject_filter`)
    /// carries the fact `(predicate, value)`.
    pub fn exists(
        &self,
        predicate: &str,
        value: &Value,
        subject_filter: Option<&dyn Fn(&str) -> bool>,
    ) -> bool {
        match self.by_value.get(&(predicate.to_string(), value_key(value))) {
            Some(subjects) => match subject_filter {
                Some(filter) => subjects.iter().any(|s| filter(s)),
                None => !subjects.is_empty(),
            },
            None => false,
        }
    }

    /// True if every subject selected by `subject_filter` from the
    /// predicate's subjects carries the value. Vacuously true when the
    /// filter selects nothing.
    pub fn forall(
        &self,
        predicate: &str,
        value: &Value,
        subject_filter: &dyn Fn(&str) -> bool,
    ) -> bool {
        match self.by_predicate.get(predicate) {
            Some(subjects) => subjects
                .iter()
                .filter(|s| subject_filter(s.as_str()))
                .all(|s| self.matches(predicate, s, value)),
            None => true,
        }
    }

    /// Merge another state into a new one; `other` wins on key collisions.
    pub fn merge(&self, other: &State) -> State {
        let mut merged = self.clone();
        for ((predicate, subject), value) in &other.facts {
            merged.set_fact(predicate, subject, value.clone());
        }
        merged
    }

    /// Export all facts as triples, sorted by `(predicate, subject)`.
    pub fn to_triples(&self) -> Vec<Fact> {
        let mut triples: Vec<Fact> = self
            .facts
            .iter()
            .map(|((predicate, subject), value)| {
                Fact::new(predicate.clone(), subject.clone(), value.clone())
            })
            .collect();
        triples.sort_by(|a, b| {
            (a.predicate.as_str(), a.subject.as_str())
                .cmp(&(b.predicate.as_str(), b.subject.as_str()))
        });
        triples
    }

    /// Build a state from triples; later triples win on duplicate keys.
    pub fn from_triples(triples: impl IntoIterator<Item = Fact>) -> State {
        let mut state = State::new();
        for fact in triples {
            state.set_fact(&fact.predicate, &fact.subject, fact.value);
        }
        state
    }

    /// Value-semantics copy.
    pub fn copy(&self) -> State {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Compact one-line rendering for trace output.
    pub fn summary(&self) -> String {
        let rendered: Vec<String> = self
            .to_triples()
            .iter()
            .map(|f| format!("{}({})={}", f.predicate, f.subject, f.value))
            .collect();
        format!("{{{}}}", rendered.join(", "))
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.facts == other.facts
    }
}

// States serialize as their triple list; the indices are rebuilt on load.
impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let triples = self.to_triples();
        let mut seq = serializer.serialize_seq(Some(triples.len()))?;
        for fact in triples {
            seq.serialize_element(&fact)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TripleVisitor;

        impl<'de> Visitor<'de> for TripleVisitor {
            type Value = State;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a sequence of fact triples")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<State, A::Error> {
                let mut state = State::new();
                while let Some(fact) = seq.next_element::<Fact>()? {
                    state.set_fact(&fact.predicate, &fact.subject, fact.value);
                }
                Ok(state)
            }
        }

        deserializer.deserialize_seq(TripleVisitor)
    }
}
