mod asset;
mod name;
mod types;

pub use self::{asset::*, name::*, types::*};
