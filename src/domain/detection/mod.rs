pub mod pattern;
pub mod pivot;
