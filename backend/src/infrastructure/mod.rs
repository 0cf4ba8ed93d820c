pub mod embeddings;
pub mod file_system;
pub mod generation;
pub mod loaders;
pub mod persistence;
pub mod text;
