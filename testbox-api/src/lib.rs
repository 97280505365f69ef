pub mod constants;
pub mod identity;
pub mod image;
pub mod recipe;
pub mod reference;
pub mod render;
pub mod validate;

mod errors;

pub use errors::Error;

#[cfg(test)]
mod test_common;
