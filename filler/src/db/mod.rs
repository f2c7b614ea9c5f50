mod memory;
mod postgres;
mod store;
mod transaction;
mod value;

pub use self::{memory::*, postgres::*, store::*, transaction::*, value::*};
