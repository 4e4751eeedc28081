// Pivot detection and pattern state machines
pub mod double_extreme;
pub mod pattern_matcher;
pub mod pivot_detector;
pub mod vcp;
