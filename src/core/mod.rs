pub mod quantize;
pub mod recalc;

pub use recalc::{recalculate, round6};
