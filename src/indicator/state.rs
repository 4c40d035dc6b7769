//! Indicator states and the visuals they map to

/// The four session phases shown on the indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndicatorState {
    /// Nothing happening, output dark
    #[default]
    Idle,
    /// Session started, waiting for the user to speak
    Listening,
    /// User finished speaking, agent is working
    Thinking,
    /// Agent is replying
    Speaking,
}

impl std::fmt::Display for IndicatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorState::Idle => write!(f, "Idle"),
            IndicatorState::Listening => write!(f, "Listening"),
            IndicatorState::Thinking => write!(f, "Thinking"),
            IndicatorState::Speaking => write!(f, "Speaking"),
        }
    }
}

impl IndicatorState {
    /// Visual applied on entering this state. With `blink` set, Thinking
    /// starts in its blink phase and the blink timer later settles it.
    pub fn entry_output(self, blink: bool) -> Output {
        match self {
            IndicatorState::Idle => Output::Off,
            IndicatorState::Listening => Output::Listening,
            IndicatorState::Thinking if blink => Output::ThinkingBlink,
            IndicatorState::Thinking => Output::Thinking,
            IndicatorState::Speaking => Output::Speaking,
        }
    }
}

/// What a device is asked to display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    #[default]
    Off,
    Listening,
    /// Short dark/dim phase right after entering Thinking
    ThinkingBlink,
    /// Steady Thinking visual
    Thinking,
    Speaking,
}

impl Output {
    /// Single LEDs can only be on or off
    pub fn is_lit(self) -> bool {
        match self {
            Output::Off | Output::ThinkingBlink => false,
            Output::Listening | Output::Thinking | Output::Speaking => true,
        }
    }
}
