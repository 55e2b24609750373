// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod indicators;
pub mod pipeline;
pub mod utils;
pub mod yahoo;

pub use utils::*;
