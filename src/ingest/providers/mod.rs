// src/ingest/providers/mod.rs
pub mod deviantart;

pub use deviantart::{DeviantArtAuth, DeviantArtClient};
