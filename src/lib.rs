//! catalog-fetch - resolve catalog tracks to canonical metadata and download
//! them in ordered batches.

pub mod aggregate;
pub mod artwork;
pub mod batch;
pub mod catalog;
pub mod downloader;
pub mod error;
pub mod fallback;
pub mod format;
pub mod http_client;
pub mod link;
pub mod models;
pub mod normalize;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod safety;
pub mod settings;
pub mod tagger;

#[cfg(test)]
pub(crate) mod test_support;
