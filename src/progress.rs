//! Progress observation.
//!
//! The engine reports progress through an injected [`ProgressListener`]
//! rather than rendering anything itself; the bundled command line tool
//! implements the trait with a terminal progress bar, and library callers
//! can plug in whatever suits them (or nothing, via [`NullListener`]).

/// Observer of a rechunk run. Callbacks may fire concurrently from worker
/// threads, so implementations must be `Send + Sync`; they should also be
/// cheap, as `chunk_written` fires once per destination chunk.
pub trait ProgressListener: Send + Sync {
    /// A stage of a variable is about to start. `stage` is zero-based;
    /// `num_chunks` is the number of destination chunks the stage will write.
    fn stage_started(&self, variable: &str, stage: usize, num_stages: usize, num_chunks: u64) {
        let _ = (variable, stage, num_stages, num_chunks);
    }

    /// One destination chunk of the current stage has been written.
    fn chunk_written(&self, variable: &str, stage: usize) {
        let _ = (variable, stage);
    }

    /// A stage of a variable has completed.
    fn stage_finished(&self, variable: &str, stage: usize) {
        let _ = (variable, stage);
    }
}

/// A listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl ProgressListener for NullListener {}
