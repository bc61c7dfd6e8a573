// Backend command handlers shared by the HTTP command proxy and the CLI

pub mod sessions;

pub use sessions::*;
