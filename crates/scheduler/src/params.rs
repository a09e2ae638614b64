//! Parameter expansion: one `add` call with ranged arguments becomes many
//! concrete block instances.
//!
//! Ordinary parameters are zipped (value `i` of each goes to instance `i`),
//! outer parameters are crossed with each other. With both kinds present
//! the outer product is the outer loop and the zipped sequence is replayed
//! inside every outer combination.

use std::any::Any;

use blockflow_core::{Arg, Args, FlowError};
use indexmap::IndexMap;

/// Separator between the parts of an instance label.
pub const LABEL_SEPARATOR: &str = "-";

/// A range of values for one keyword argument.
#[derive(Debug, Clone)]
pub struct Parameter {
    values: Vec<Arg>,
    labels: Option<Vec<String>>,
    outer: bool,
    gather: bool,
}

impl Parameter {
    pub fn new<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Arg>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            labels: None,
            outer: false,
            gather: false,
        }
    }

    /// Per-value labels added to instance names. Missing or empty entries
    /// contribute nothing.
    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    /// Cross with the other outer parameters instead of zipping.
    pub fn outer(mut self) -> Self {
        self.outer = true;
        self
    }

    /// Mark results along this parameter as meant to be gathered downstream.
    pub fn gather(mut self) -> Self {
        self.gather = true;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_outer(&self) -> bool {
        self.outer
    }

    pub fn is_gather(&self) -> bool {
        self.gather
    }

    fn label_at(&self, index: usize) -> Option<&str> {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(index))
            .map(String::as_str)
            .filter(|label| !label.is_empty())
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Fixed(Arg),
    Ranged(Parameter),
}

/// Keyword arguments (plain or ranged) for one `add` call.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    label: Option<String>,
    bindings: IndexMap<String, Binding>,
}

impl Instance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.bindings.insert(name.into(), Binding::Fixed(value.into()));
        self
    }

    /// Pass a value with no stored form (a model, a closure table, ...).
    pub fn opaque<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.bindings.insert(name.into(), Binding::Fixed(Arg::opaque(value)));
        self
    }

    pub fn param(mut self, name: impl Into<String>, parameter: Parameter) -> Self {
        self.bindings.insert(name.into(), Binding::Ranged(parameter));
        self
    }

    pub(crate) fn base_label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn set_label_if_missing(&mut self, label: String) {
        if self.label.is_none() {
            self.label = Some(label);
        }
    }

    /// Names of gather-marked parameters.
    pub(crate) fn gathered(&self) -> Vec<String> {
        self.bindings
            .iter()
            .filter_map(|(name, binding)| match binding {
                Binding::Ranged(p) if p.gather => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Concrete `(label, args)` combinations in instance order.
    pub fn expand(&self) -> Result<Vec<Expansion>, FlowError> {
        let zipped: Vec<(&str, &Parameter)> = self
            .ranged()
            .filter(|(_, p)| !p.outer)
            .collect();
        let outer: Vec<(&str, &Parameter)> = self.ranged().filter(|(_, p)| p.outer).collect();

        let zip_len = match zipped.first() {
            None => 1,
            Some((_, first)) => {
                if zipped.iter().any(|(_, p)| p.len() != first.len()) {
                    return Err(FlowError::ParameterLength(
                        zipped
                            .iter()
                            .map(|(name, p)| (name.to_string(), p.len()))
                            .collect(),
                    ));
                }
                first.len()
            }
        };

        let mut expansions = Vec::new();
        for outer_indices in cartesian(&outer.iter().map(|(_, p)| p.len()).collect::<Vec<_>>()) {
            for zip_index in 0..zip_len {
                expansions.push(self.combination(&outer, &outer_indices, zip_index));
            }
        }
        Ok(expansions)
    }

    fn ranged(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.bindings.iter().filter_map(|(name, binding)| match binding {
            Binding::Ranged(p) => Some((name.as_str(), p)),
            Binding::Fixed(_) => None,
        })
    }

    fn combination(
        &self,
        outer: &[(&str, &Parameter)],
        outer_indices: &[usize],
        zip_index: usize,
    ) -> Expansion {
        let mut parts: Vec<&str> = self
            .label
            .as_deref()
            .filter(|label| !label.is_empty())
            .into_iter()
            .collect();
        let mut args = Args::new();

        for (name, binding) in &self.bindings {
            match binding {
                Binding::Fixed(value) => {
                    args.insert(name.clone(), value.clone());
                }
                Binding::Ranged(p) => {
                    let index = match outer.iter().position(|(n, _)| *n == name.as_str()) {
                        Some(slot) => outer_indices[slot],
                        None => zip_index,
                    };
                    args.insert(name.clone(), p.values[index].clone());
                    parts.extend(p.label_at(index));
                }
            }
        }

        Expansion {
            label: parts.join(LABEL_SEPARATOR),
            args,
        }
    }
}

/// One concrete combination produced by [`Instance::expand`].
#[derive(Debug, Clone)]
pub struct Expansion {
    pub label: String,
    pub args: Args,
}

/// Index tuples over the given lengths, first dimension outermost.
/// No dimensions yields one empty tuple; a zero length yields none.
fn cartesian(lengths: &[usize]) -> Vec<Vec<usize>> {
    lengths.iter().fold(vec![Vec::new()], |acc, &len| {
        acc.iter()
            .flat_map(|prefix| {
                (0..len).map(move |i| {
                    let mut next = prefix.clone();
                    next.push(i);
                    next
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_core::Value;

    fn value_of(e: &Expansion, name: &str) -> Value {
        e.args[name].as_value().cloned().unwrap()
    }

    #[test]
    fn zipped_parameters_pair_up() {
        let instance = Instance::new()
            .param("x", Parameter::new([1, 2, 3]))
            .param("y", Parameter::new([10.0, 20.0, 30.0]));
        let expanded = instance.expand().unwrap();

        assert_eq!(expanded.len(), 3);
        assert_eq!(value_of(&expanded[1], "x"), Value::Int(2));
        assert_eq!(value_of(&expanded[1], "y"), Value::Float(20.0));
    }

    #[test]
    fn outer_parameters_cross() {
        let instance = Instance::new()
            .param("a", Parameter::new([1, 2]).outer())
            .param("b", Parameter::new(["p", "q", "r"]).outer());
        let expanded = instance.expand().unwrap();

        assert_eq!(expanded.len(), 6);
        let pairs: Vec<(Value, Value)> = expanded
            .iter()
            .map(|e| (value_of(e, "a"), value_of(e, "b")))
            .collect();
        assert_eq!(pairs[0], (Value::Int(1), Value::from("p")));
        assert_eq!(pairs[2], (Value::Int(1), Value::from("r")));
        assert_eq!(pairs[3], (Value::Int(2), Value::from("p")));
    }

    #[test]
    fn outer_loop_replays_zipped_sequence() {
        let instance = Instance::new()
            .param("t", Parameter::new([0.1, 0.2]).outer())
            .param("x", Parameter::new([1, 2, 3]))
            .param("y", Parameter::new([4, 5, 6]));
        let expanded = instance.expand().unwrap();

        assert_eq!(expanded.len(), 6);
        let xs: Vec<Value> = expanded.iter().map(|e| value_of(e, "x")).collect();
        assert_eq!(xs[..3], xs[3..]);
        assert_eq!(value_of(&expanded[4], "t"), Value::Float(0.2));
    }

    #[test]
    fn mismatched_zip_lengths_fail() {
        let instance = Instance::new()
            .param("x", Parameter::new([1, 2, 3]))
            .param("y", Parameter::new([1, 2]));
        match instance.expand() {
            Err(FlowError::ParameterLength(lengths)) => {
                assert_eq!(lengths, vec![("x".to_string(), 3), ("y".to_string(), 2)]);
            }
            other => panic!("expected a length error, got {other:?}"),
        }
    }

    #[test]
    fn empty_parameter_produces_nothing() {
        let instance = Instance::new().param("x", Parameter::new(Vec::<i64>::new()));
        assert!(instance.expand().unwrap().is_empty());
    }

    #[test]
    fn labels_join_in_declaration_order() {
        let instance = Instance::new()
            .label("run")
            .arg("steps", 100)
            .param("a", Parameter::new([1, 2]).labels(["a1", "a2"]).outer())
            .param("b", Parameter::new([3, 4]).labels(["", "b4"]));
        let labels: Vec<String> = instance.expand().unwrap().into_iter().map(|e| e.label).collect();
        assert_eq!(labels, vec!["run-a1", "run-a1-b4", "run-a2", "run-a2-b4"]);
    }

    #[test]
    fn plain_arguments_reach_every_instance() {
        let instance = Instance::new()
            .arg("steps", 100)
            .param("x", Parameter::new([1, 2]).gather());
        let expanded = instance.expand().unwrap();
        assert!(expanded.iter().all(|e| value_of(e, "steps") == Value::Int(100)));
        assert_eq!(instance.gathered(), vec!["x".to_string()]);
    }

    #[test]
    fn no_parameters_is_one_instance() {
        let expanded = Instance::new().label("only").arg("k", 1).expand().unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].label, "only");
    }
}
