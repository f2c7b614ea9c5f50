mod decoder;
mod error;
mod reader;
mod types;

pub use self::{decoder::*, error::*, reader::*, types::*};
