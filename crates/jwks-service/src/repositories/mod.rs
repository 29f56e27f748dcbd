pub mod key_file;

pub use key_file::{KeyFileRepository, LoadedKeys};
