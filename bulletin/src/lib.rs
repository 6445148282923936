// Library interface for the bulletin pipeline modules.
// The binary and the integration tests import everything from here.

pub mod classification;
pub mod discovery;
pub mod enrichment;
pub mod error;
pub mod extraction;
pub mod fanout;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod summarization;
