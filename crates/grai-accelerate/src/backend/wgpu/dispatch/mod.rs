pub mod common;
pub mod convert;
pub mod reduction;
