use crate::error::Result;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;

pub struct OnnxSession {
    pub session: Session,
}

impl OnnxSession {
    /// Build a session for `path`. `threads` defaults to the number of CPUs.
    pub fn new(path: impl AsRef<Path>, threads: Option<usize>) -> Result<Self> {
        let threads = threads.unwrap_or_else(num_cpus::get);
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?;

        #[cfg(feature = "cuda")]
        let builder =
            builder.with_execution_providers([ort::ep::CUDA::default().build()])?;

        let session = builder.commit_from_file(path)?;
        Ok(Self { session })
    }

    /// Label of the device inference is expected to run on.
    #[must_use]
    pub const fn device() -> &'static str {
        if cfg!(feature = "cuda") {
            "cuda"
        } else {
            "cpu"
        }
    }

    /// Helper to check if the model expects a specific input name
    #[must_use]
    pub fn has_input(&self, name: &str) -> bool {
        self.session.inputs().iter().any(|i| i.name() == name)
    }

    /// Helper to find the first likely input name for a specific role
    #[must_use]
    pub fn find_input(&self, possibilities: &[&str]) -> Option<String> {
        possibilities
            .iter()
            .find(|p| self.has_input(p))
            .map(|p| (*p).to_string())
    }
}
