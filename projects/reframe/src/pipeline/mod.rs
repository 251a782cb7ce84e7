// Frame-batch transform pipeline

pub mod audio;
pub mod executor;
pub mod extract;
pub mod orchestrator;
pub mod reassemble;
pub mod scheduler;
pub mod session;
pub mod transformer;
pub mod types;

#[cfg(test)]
pub mod testing;
