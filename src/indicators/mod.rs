// Technical indicators used by the bundled strategies
pub mod moving_average;

pub use moving_average::{calculate_ema, calculate_sma, ema, sma};
