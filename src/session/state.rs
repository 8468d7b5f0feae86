use std::fmt;

/// Lifecycle of one device connection.
///
/// ```text
/// Unauthenticated --register--> Authorizing --ok--> Registered --SetActivityTimeout--> Active
///                                           \--fail--> Rejected
/// any --error | breach | dispose--> Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unauthenticated,
    Authorizing,
    Registered,
    Active,
    Rejected,
    Disposed,
}

impl SessionState {
    /// Registered or Active: the device may receive commands.
    pub fn is_registered(self) -> bool {
        matches!(self, SessionState::Registered | SessionState::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Rejected | SessionState::Disposed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Unauthenticated, Authorizing) => true,
            (Authorizing, Registered | Rejected) => true,
            (Registered, Active) | (Active, Active) => true,
            (Disposed, _) => false,
            (_, Disposed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_path() {
        use SessionState::*;
        assert!(Unauthenticated.can_transition_to(Authorizing));
        assert!(Authorizing.can_transition_to(Registered));
        assert!(Registered.can_transition_to(Active));
        assert!(!Unauthenticated.can_transition_to(Active));
        assert!(!Rejected.can_transition_to(Registered));
    }

    #[test]
    fn disposed_is_final() {
        use SessionState::*;
        for s in [Unauthenticated, Authorizing, Registered, Active, Rejected] {
            assert!(s.can_transition_to(Disposed));
            assert!(!Disposed.can_transition_to(s));
        }
        assert!(!Disposed.can_transition_to(Disposed));
    }
}
