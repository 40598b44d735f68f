pub mod argon;
pub(crate) mod context;
mod error;
pub mod keygen;
pub mod server;
pub mod sync;

pub use context::Context;
pub use error::Error;
