//! The execution pipeline: create, load libraries, compile, run, close.

use tracing::{debug, error};

use crate::{
    config::{Config, OutputMode},
    error::ScriptError,
    memory::{AllocStats, BlockAllocator},
    state::{ExecutionContext, Interpreter},
};

/// What one execution produced.
#[derive(Debug)]
pub struct Report {
    pub outcome: Result<(), ScriptError>,
    /// Script output when [`OutputMode::Capture`] is on, empty otherwise.
    pub output: String,
    /// Allocator counters after the interpreter was closed.
    pub memory: AllocStats,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&ScriptError> {
        self.outcome.as_ref().err()
    }
}

/// Runs `source` in a fresh interpreter. Failures are logged under their
/// tag and returned in the report; nothing is re-raised.
pub fn execute(config: &Config, source: &[u8]) -> Report {
    let allocator = match config.alloc_fail_after {
        Some(n) => BlockAllocator::failing_after(n),
        None => BlockAllocator::new(),
    };
    let ctx = ExecutionContext::new(allocator);

    let outcome = run(config, &ctx, source);
    if let Err(err) = &outcome {
        error!("{err}");
    }

    let memory = ctx.allocator().stats();
    if memory.live_blocks != 0 {
        error!(live_blocks = memory.live_blocks, "interpreter memory not released");
    }
    debug!(peak_bytes = memory.peak_bytes, allocations = memory.allocations, "execution done");

    Report {
        outcome,
        output: ctx.take_output(),
        memory,
    }
}

fn run(config: &Config, ctx: &ExecutionContext, source: &[u8]) -> Result<(), ScriptError> {
    let mut interp = Interpreter::new(ctx)?;
    let outcome = ctx.guard(|| {
        interp.open_libs()?;
        if config.output == OutputMode::Capture {
            interp.capture_print();
        }
        interp.compile(source, config.chunk_name.as_deref())?;
        interp.run()
    });
    // closes the state on every path, parse errors included
    drop(interp);
    outcome
}
