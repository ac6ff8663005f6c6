pub mod cli;
pub mod format;
pub mod image;
pub mod layout;
pub mod linker;
pub mod range;
pub mod resolver;
pub mod writer;

pub use cli::run;
pub use linker::{link, LinkConfig, LinkHost, LinkResult};
