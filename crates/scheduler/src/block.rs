use std::collections::HashMap;

use blockflow_store::Target;

use crate::deferred::{BlockFn, DeferredFunction};
use crate::params::LABEL_SEPARATOR;

/// Handle returned when a function is registered. Dependencies may be
/// declared with it or with the plain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnRef {
    name: String,
}

impl FnRef {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AsRef<str> for FnRef {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for FnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Anything that names zero or more dependencies. Function handles are
/// turned into names here, before they reach the graph.
pub trait IntoDependencies {
    fn into_dependencies(self) -> Vec<String>;
}

impl IntoDependencies for () {
    fn into_dependencies(self) -> Vec<String> {
        Vec::new()
    }
}

impl IntoDependencies for &FnRef {
    fn into_dependencies(self) -> Vec<String> {
        vec![self.name.clone()]
    }
}

impl IntoDependencies for FnRef {
    fn into_dependencies(self) -> Vec<String> {
        vec![self.name]
    }
}

impl IntoDependencies for &str {
    fn into_dependencies(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoDependencies for String {
    fn into_dependencies(self) -> Vec<String> {
        vec![self]
    }
}

impl<T: IntoDependencies> IntoDependencies for Option<T> {
    fn into_dependencies(self) -> Vec<String> {
        self.map(IntoDependencies::into_dependencies).unwrap_or_default()
    }
}

impl<T: IntoDependencies> IntoDependencies for Vec<T> {
    fn into_dependencies(self) -> Vec<String> {
        self.into_iter().flat_map(IntoDependencies::into_dependencies).collect()
    }
}

impl<T: IntoDependencies, const N: usize> IntoDependencies for [T; N] {
    fn into_dependencies(self) -> Vec<String> {
        self.into_iter().flat_map(IntoDependencies::into_dependencies).collect()
    }
}

/// Append names not already present, keeping declaration order.
pub(crate) fn extend_unique(list: &mut Vec<String>, names: impl IntoIterator<Item = String>) {
    for name in names {
        if !list.contains(&name) {
            list.push(name);
        }
    }
}

/// Registration options for a cached function.
#[derive(Debug, Clone)]
pub struct Cache {
    pub(crate) name: String,
    pub(crate) doc: Option<String>,
    pub(crate) depends: Vec<String>,
}

impl Cache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: None,
            depends: Vec::new(),
        }
    }

    /// One-line description shown by `display`.
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn depends(mut self, deps: impl IntoDependencies) -> Self {
        extend_unique(&mut self.depends, deps.into_dependencies());
        self
    }
}

/// One schedulable unit: a bound function, its output file and its edges.
#[derive(Debug)]
pub struct Block {
    pub(crate) function: DeferredFunction,
    pub(crate) target: Target,
    /// Names of blocks (or families, before normalisation) this block reads.
    pub(crate) dependencies: Vec<String>,
    /// Reverse edges, rebuilt by the resolver.
    pub(crate) children: Vec<String>,
    pub(crate) complete: bool,
    /// Owning family, for instances.
    pub(crate) family: Option<String>,
    pub(crate) doc: Option<String>,
}

impl Block {
    pub(crate) fn new(function: DeferredFunction, target: Target) -> Self {
        Self {
            function,
            target,
            dependencies: Vec::new(),
            children: Vec::new(),
            complete: false,
            family: None,
            doc: None,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }
}

/// The instances generated from one parameterised function.
pub struct Family {
    pub(crate) func: BlockFn,
    pub(crate) doc: Option<String>,
    /// Applied to every member at creation.
    pub(crate) dependencies: Vec<String>,
    pub(crate) members: Vec<String>,
    pub(crate) gathered: Vec<String>,
    label_counters: HashMap<String, usize>,
}

impl Family {
    pub(crate) fn new(func: BlockFn, doc: Option<String>, dependencies: Vec<String>) -> Self {
        Self {
            func,
            doc,
            dependencies,
            members: Vec::new(),
            gathered: Vec::new(),
            label_counters: HashMap::new(),
        }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Parameter names marked for gathering.
    pub fn gathered(&self) -> &[String] {
        &self.gathered
    }

    /// Derive block names for one registration call's labels.
    ///
    /// A label new to the family that occurs once in the call gets
    /// `{base}-{label}`; otherwise `{base}-{label}-{k}` with `k` counting
    /// per label across calls. An empty label is `{base}-{k}`. Earlier
    /// members are never renamed.
    pub(crate) fn assign_names(&mut self, base: &str, labels: &[String]) -> Vec<String> {
        let mut in_call: HashMap<&str, usize> = HashMap::new();
        for label in labels {
            *in_call.entry(label.as_str()).or_default() += 1;
        }

        let mut names: Vec<String> = Vec::with_capacity(labels.len());
        for label in labels {
            let bare = join(&[base, label]);
            let taken = |name: &str, names: &[String]| {
                self.members.iter().any(|m| m == name) || names.iter().any(|n| n == name)
            };

            let name = if !label.is_empty()
                && !self.label_counters.contains_key(label)
                && in_call[label.as_str()] == 1
                && !taken(&bare, &names)
            {
                bare
            } else {
                loop {
                    let counter = self.label_counters.entry(label.clone()).or_insert(0);
                    let k = *counter;
                    *counter += 1;
                    let candidate = if label.is_empty() {
                        join(&[base, &k.to_string()])
                    } else {
                        join(&[base, label, &k.to_string()])
                    };
                    if !taken(&candidate, &names) {
                        break candidate;
                    }
                }
            };
            // bare use consumes index 0 for the label
            self.label_counters.entry(label.clone()).or_insert(1);
            names.push(name);
        }
        names
    }
}

fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(LABEL_SEPARATOR)
}
