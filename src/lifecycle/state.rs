use strum_macros::{AsRefStr, Display, EnumIter};

/// Shutdown progress of a [`ShutdownCoordinator`](super::ShutdownCoordinator)
///
/// States are strictly ordered and only ever move forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ShutdownState {
    Dormant,
    Announced,
    Initiated,
    Preparing,
    Performing,
    Finalizing,
    Complete,
}

impl ShutdownState {
    /// The phase that starts when this state is entered, if any
    pub fn phase(self) -> Option<Phase> {
        match self {
            Self::Preparing => Some(Phase::Prepare),
            Self::Performing => Some(Phase::Perform),
            Self::Finalizing => Some(Phase::Finalize),
            _ => None,
        }
    }
}

/// A group of hooks or actions run together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Startup,
    Prepare,
    Perform,
    Finalize,
}

impl Phase {
    /// Shutdown state entered when this phase begins; `None` for startup
    pub fn shutdown_state(self) -> Option<ShutdownState> {
        match self {
            Self::Startup => None,
            Self::Prepare => Some(ShutdownState::Preparing),
            Self::Perform => Some(ShutdownState::Performing),
            Self::Finalize => Some(ShutdownState::Finalizing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_states_strictly_ordered() {
        let states: Vec<_> = ShutdownState::iter().collect();
        assert_eq!(states.len(), 7);
        assert!(states.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(states.first(), Some(&ShutdownState::Dormant));
        assert_eq!(states.last(), Some(&ShutdownState::Complete));
    }

    #[test]
    fn test_phase_state_mapping_round_trips() {
        for phase in Phase::iter() {
            if let Some(state) = phase.shutdown_state() {
                assert_eq!(state.phase(), Some(phase));
            }
        }
        assert_eq!(ShutdownState::Initiated.phase(), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ShutdownState::Preparing.to_string(), "PREPARING");
        assert_eq!(Phase::Finalize.to_string(), "finalize");
        assert_eq!(Phase::Perform.as_ref(), "perform");
    }
}
