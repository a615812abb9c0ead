pub mod chunking_strategy;
pub mod discovery;
pub mod indexing_engine;
pub mod run_state;
