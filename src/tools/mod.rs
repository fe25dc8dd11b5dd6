// Helpers for strategies
pub mod trailing;

pub use trailing::TrailingStop;
