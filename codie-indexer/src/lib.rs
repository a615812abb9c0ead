//! codie-indexer: turns a source tree into embedded code chunks
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: File discovery, chunking and the worker-pool indexing engine
//! - **[`storage`]**: Record sinks (JSON file, SQLite key/value)
//! - **[`config`]**: Layered settings (defaults, `codie.toml`, environment)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codie_embed::EmbeddingClient;
//! use codie_indexer::config::IndexerSettings;
//! use codie_indexer::retrieval::indexing_engine::{IndexingEngine, IndexingEngineConfig};
//! use codie_indexer::storage::open_store;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut settings = IndexerSettings::load(None)?;
//! settings.apply_env();
//!
//! let client = Arc::new(EmbeddingClient::from_config(&settings.embed_config())?);
//! let store = open_store(&settings.output).await?;
//! let engine = IndexingEngine::new(IndexingEngineConfig::new("."), client, store);
//! let summary = engine.run().await?;
//! println!("{} records", summary.records);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! FileDiscovery → queue → workers (chunk → embed) → collectors → RecordStore
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;
