use crate::application::detection::double_extreme::DoubleExtremeMatcher;
use crate::application::detection::vcp::VcpMatcher;
use crate::config::DetectionEnvConfig;
use crate::domain::detection::pattern::{Pattern, PatternType};
use crate::domain::detection::pivot::PivotTransition;
use crate::domain::market::candle::Candle;

macro_rules! define_pattern_matchers {
    (
        $(
            $variant:ident($matcher:ty)
        ),* $(,)?
    ) => {
        /// All pattern state machines, dispatched by enum.
        ///
        /// Every variant follows the same contract: `on_pivot` advances the
        /// state on confirmed/retracted pivots, `on_candle` checks breakouts
        /// and timeouts and returns a pattern at most once.
        #[derive(Debug, Clone)]
        pub enum PatternMatcher {
            $($variant($matcher)),*
        }

        impl PatternMatcher {
            pub fn on_pivot(&mut self, transition: &PivotTransition) {
                match self {
                    $(Self::$variant(m) => m.on_pivot(transition)),*
                }
            }

            pub fn reset(&mut self) {
                match self {
                    $(Self::$variant(m) => m.reset()),*
                }
            }
        }
    };
}

define_pattern_matchers! {
    Vcp(VcpMatcher),
    DoubleTop(DoubleExtremeMatcher),
    DoubleBottom(DoubleExtremeMatcher),
}

impl PatternMatcher {
    pub fn for_type(pattern_type: PatternType, config: &DetectionEnvConfig) -> Self {
        match pattern_type {
            PatternType::Vcp => PatternMatcher::Vcp(VcpMatcher::new(config.vcp)),
            PatternType::DoubleTop => {
                PatternMatcher::DoubleTop(DoubleExtremeMatcher::double_top(config.double_pattern))
            }
            PatternType::DoubleBottom => PatternMatcher::DoubleBottom(
                DoubleExtremeMatcher::double_bottom(config.double_pattern),
            ),
        }
    }

    /// One matcher per known pattern type.
    pub fn all(config: &DetectionEnvConfig) -> Vec<PatternMatcher> {
        PatternType::all()
            .into_iter()
            .map(|t| Self::for_type(t, config))
            .collect()
    }

    pub fn pattern_type(&self) -> PatternType {
        match self {
            PatternMatcher::Vcp(_) => PatternType::Vcp,
            PatternMatcher::DoubleTop(_) => PatternType::DoubleTop,
            PatternMatcher::DoubleBottom(_) => PatternType::DoubleBottom,
        }
    }

    pub fn on_candle(&mut self, index: u64, candle: &Candle) -> Option<Pattern> {
        match self {
            PatternMatcher::Vcp(m) => m.on_candle(index, candle),
            PatternMatcher::DoubleTop(m) | PatternMatcher::DoubleBottom(m) => m.on_candle(candle),
        }
    }
}
