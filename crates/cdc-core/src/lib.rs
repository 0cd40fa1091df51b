//! Word types, ones-complement arithmetic, floating point, and model
//! capability gating shared by the CPU, PP, channel, and memory crates.

pub mod arith;
pub mod float;
pub mod model;
pub mod words;

pub use arith::{
    add18, add21, add24, add60, add_ra, popcount60, shift_left_circular60, shift_right_arith60,
    subtract18, subtract60,
};
pub use model::{ModelFeatures, ModelType};
pub use words::{CpWord, PpWord, MASK3, MASK6, MASK12, MASK18, MASK21, MASK24, MASK30, MASK60};
