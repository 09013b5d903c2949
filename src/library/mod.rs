//! Libraries under test and the registry that names them

pub mod nalgebra;
pub mod native;

use crate::operation::{KernelAdapter, MatrixLibrary, Operation, OperationAdapter};
use rustc_hash::FxHashMap;

/// Builds the adapter for one operation, or `None` if the library lacks it.
pub type AdapterFactory = fn(Operation) -> Option<Box<dyn OperationAdapter>>;

/// Static identity of a library under test.
#[derive(Clone)]
pub struct EvaluationTarget {
    pub name: &'static str,
    pub description: &'static str,
    factory: AdapterFactory,
}

impl EvaluationTarget {
    pub fn new(name: &'static str, description: &'static str, factory: AdapterFactory) -> Self {
        Self { name, description, factory }
    }

    pub fn adapter(&self, op: Operation) -> Option<Box<dyn OperationAdapter>> {
        (self.factory)(op)
    }

    pub fn supports(&self, op: Operation) -> bool {
        self.adapter(op).is_some()
    }
}

fn boxed<L: MatrixLibrary + 'static>(library: L, op: Operation) -> Option<Box<dyn OperationAdapter>> {
    KernelAdapter::new(library, op).map(|a| Box::new(a) as Box<dyn OperationAdapter>)
}

/// Table of evaluation targets keyed by library name. Built once at startup
/// and passed to whoever needs it.
#[derive(Clone, Default)]
pub struct LibraryRegistry {
    targets: FxHashMap<&'static str, EvaluationTarget>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every library compiled into this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(EvaluationTarget::new(
            "native",
            "hand-written row-major baseline",
            |op| boxed(native::NativeLibrary, op),
        ));
        registry.register(EvaluationTarget::new(
            "nalgebra",
            "nalgebra DMatrix",
            |op| boxed(self::nalgebra::NalgebraLibrary, op),
        ));
        registry
    }

    pub fn register(&mut self, target: EvaluationTarget) {
        self.targets.insert(target.name, target);
    }

    pub fn get(&self, name: &str) -> Option<&EvaluationTarget> {
        self.targets.get(name)
    }

    pub fn supports(&self, library: &str, op: Operation) -> bool {
        self.get(library).map_or(false, |t| t.supports(op))
    }

    /// Library names in a stable order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.targets.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
