mod pipeline;

#[cfg(test)]
mod tests;

pub use pipeline::{MediaPipeline, PipelineSummary};
