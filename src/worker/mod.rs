//! Worker side of the supervisor protocol
//!
//! A worker reads one bincode-encoded [`TestDescriptor`] from stdin, runs the
//! block and writes one bincode-encoded [`WorkerReply`] to stdout. Logging goes
//! to stderr so stdout carries nothing but the reply.

use crate::benchmark::{BlockResult, TestDescriptor, TrialResult};
use crate::generator::{generator_for, InputOutputGenerator};
use crate::library::LibraryRegistry;
use crate::memory;
use crate::trial::{TrialController, TrialError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::{info, warn};

/// Exit status for a reply of [`WorkerReply::Failed`].
pub const EXIT_FAILED: i32 = 1;

pub use crate::memory::EXIT_OUT_OF_MEMORY;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum WorkerReply {
    /// All requested trials ran.
    Completed(BlockResult),
    /// The block budget ran out; carries the trials that did finish.
    TooSlow(BlockResult),
    /// The block could not run at all.
    Failed(String),
}

impl WorkerReply {
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerReply::Completed(_) | WorkerReply::TooSlow(_) => 0,
            WorkerReply::Failed(_) => EXIT_FAILED,
        }
    }
}

pub fn read_descriptor<R: Read>(reader: R) -> bincode::Result<TestDescriptor> {
    bincode::deserialize_from(reader)
}

pub fn write_descriptor<W: Write>(writer: W, descriptor: &TestDescriptor) -> bincode::Result<()> {
    bincode::serialize_into(writer, descriptor)
}

pub fn encode_reply(reply: &WorkerReply) -> bincode::Result<Vec<u8>> {
    bincode::serialize(reply)
}

pub fn decode_reply(bytes: &[u8]) -> bincode::Result<WorkerReply> {
    bincode::deserialize(bytes)
}

/// Runs every trial of one block in this process.
pub fn run_block(descriptor: &TestDescriptor, registry: &LibraryRegistry) -> WorkerReply {
    let Some(target) = registry.get(&descriptor.library) else {
        return WorkerReply::Failed(format!("unknown library '{}'", descriptor.library));
    };
    let Some(mut adapter) = target.adapter(descriptor.operation) else {
        return WorkerReply::Failed(format!(
            "library '{}' does not support '{}'",
            descriptor.library, descriptor.operation
        ));
    };

    let mut generator = generator_for(descriptor.operation);
    let inputs = generator.create_inputs(descriptor.size, descriptor.seed);
    let mut outputs = Vec::with_capacity(generator.num_outputs());

    adapter.configure();
    info!(
        library = adapter.name(),
        operation = %descriptor.operation,
        size = descriptor.size,
        trials = descriptor.trials,
        "starting block"
    );

    let mut controller = TrialController::new(descriptor.goal_nanos())
        .with_estimate(descriptor.repetition_estimate)
        .with_budget(descriptor.max_nanos());
    let mut block = BlockResult {
        trials: Vec::with_capacity(descriptor.trials),
        repetition_estimate: descriptor.repetition_estimate,
    };

    for trial in 0..descriptor.trials {
        memory::reset_peak();
        let measurement = match controller.measure(adapter.as_mut(), &inputs, &mut outputs) {
            Ok(m) => m,
            Err(e @ TrialError::BudgetExhausted { .. }) => {
                warn!(
                    library = %descriptor.library,
                    operation = %descriptor.operation,
                    size = descriptor.size,
                    completed = block.trials.len(),
                    "{}",
                    e
                );
                block.repetition_estimate = controller.estimate();
                return WorkerReply::TooSlow(block);
            }
            Err(e) => return WorkerReply::Failed(e.to_string()),
        };
        let memory_bytes = memory::peak_bytes();

        let error = descriptor
            .sanity_check
            .then(|| generator.check_results(&outputs, descriptor.tolerance));

        info!(
            trial,
            repetitions = measurement.repetitions,
            ops_per_sec = measurement.ops_per_sec,
            "trial done"
        );
        block.trials.push(TrialResult {
            ops_per_sec: measurement.ops_per_sec,
            repetitions: measurement.repetitions,
            elapsed_nanos: measurement.elapsed_nanos,
            memory_bytes,
            error,
        });
    }

    block.repetition_estimate = controller.estimate();
    WorkerReply::Completed(block)
}
