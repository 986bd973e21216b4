//! The environment factory: every problem the application can load is
//! registered here under a unique id together with its metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use eyre::Result;

use crate::cancellation::Token;
use crate::error::UnknownProblem;
use crate::problem::{AnyProblem, Metadata};

/// An opaque handle to the accelerator control system.
pub trait ControlSystem: Send + Sync {
    /// The timing user (cycle selector) the client is bound to.
    fn selector(&self) -> String;
}

/// What a problem receives when it is constructed.
#[derive(Default, Clone)]
pub struct ProblemContext {
    /// Only set if the problem's metadata asks for it.
    pub control_system: Option<Arc<dyn ControlSystem>>,
    /// Only set if the problem declares itself cancellable.
    pub cancellation_token: Option<Token>,
}

type EntryPoint = Box<dyn Fn(ProblemContext) -> Result<AnyProblem> + Send + Sync>;

pub struct ProblemSpec {
    pub id: String,
    pub metadata: Metadata,
    /// The package that provides the problem, if known.
    pub source: Option<String>,
    entry_point: EntryPoint,
}

impl ProblemSpec {
    pub fn new<F>(id: &str, metadata: Metadata, entry_point: F) -> Self
    where
        F: Fn(ProblemContext) -> Result<AnyProblem> + Send + Sync + 'static,
    {
        ProblemSpec {
            id: id.to_owned(),
            metadata,
            source: None,
            entry_point: Box::new(entry_point),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_owned());
        self
    }
}

impl fmt::Debug for ProblemSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProblemSpec")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ProblemRegistry {
    specs: BTreeMap<String, ProblemSpec>,
}

impl ProblemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ProblemSpec) {
        if self.specs.contains_key(&spec.id) {
            tracing::warn!("Replacing registered problem {}", spec.id);
        }
        self.specs.insert(spec.id.clone(), spec);
    }

    pub fn spec(&self, id: &str) -> Result<&ProblemSpec, UnknownProblem> {
        self.specs
            .get(id)
            .ok_or_else(|| UnknownProblem(id.to_owned()))
    }

    /// Ids of all problems, optionally restricted to one machine.
    pub fn names<'a>(&'a self, machine: Option<&'a str>) -> impl Iterator<Item = &'a str> + 'a {
        self.specs
            .values()
            .filter(move |spec| machine.is_none() || spec.metadata.machine.as_deref() == machine)
            .map(|spec| spec.id.as_str())
    }

    /// Construct the problem `id`.
    ///
    /// `control_system` is only called if the problem needs a client, and
    /// `token` is only passed on if the problem is cancellable.
    pub fn make<F>(&self, id: &str, control_system: F, token: &Token) -> Result<AnyProblem>
    where
        F: FnOnce() -> Result<Arc<dyn ControlSystem>>,
    {
        let spec = self.spec(id)?;
        let mut context = ProblemContext::default();
        if spec.metadata.needs_control_system {
            context.control_system = Some(control_system()?);
        }
        if spec.metadata.cancellable {
            context.cancellation_token = Some(token.clone());
        }
        (spec.entry_point)(context)
    }
}
