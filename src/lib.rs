//! # Code Explainer
//!
//! A web backend that explains source code with a generative-AI provider.
//!
//! Code arrives as an uploaded file or pasted text, is normalized, sent to
//! the provider, and the structured answer is persisted under a project.
//! Reads go through a TTL cache in front of the SQLite store.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────┐
//! │   Input    │──▶│  Generator  │──▶│  SQLite   │
//! │ Normalizer │   │ (provider)  │   │  store    │
//! └────────────┘   └─────────────┘   └────┬─────┘
//!                                         │
//!                      ┌──────────────────┤
//!                      ▼                  ▼
//!                 ┌──────────┐      ┌──────────┐
//!                 │  Result  │      │   HTTP   │
//!                 │  cache   │◀─────│  / CLI   │
//!                 └──────────┘      └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`input`] | Upload / paste normalization |
//! | [`extract`] | JSON recovery from free text |
//! | [`provider`] | Generative-model provider abstraction |
//! | [`generator`] | Explanation generation and normalization |
//! | [`cache`] | TTL key-value cache |
//! | [`store`] | Project and explanation persistence |
//! | [`explain`] | The end-to-end pipeline |
//! | [`server`] | HTTP server |
//! | [`auth`] | Bearer-token identification |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod explain;
pub mod extract;
pub mod generator;
pub mod input;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod server;
pub mod store;
