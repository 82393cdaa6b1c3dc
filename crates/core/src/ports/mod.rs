mod alerts;
mod chain_source;
mod handler;
mod watermark;

pub use alerts::*;
pub use chain_source::*;
pub use handler::*;
pub use watermark::*;
