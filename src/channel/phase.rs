use core::fmt;

/// Lifecycle phase of a channel session.
///
/// The phase belongs to the session, not to the signed state: two sessions
/// holding the same state can be in different phases while the ledger catches
/// up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Proposal accepted, initial state being signed and funded.
    Proposed,
    /// Funded, off-chain updates possible.
    Open,
    /// Local close started, registering on the ledger.
    Finalizing,
    /// A state is registered on the ledger (by us or the peer).
    Registered,
    /// Concluded on the ledger and funds withdrawn.
    Settled,
    Closed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("illegal phase transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: Phase,
    pub to: Phase,
}

impl Phase {
    /// Allowed edges:
    /// - Proposed → Open (funded)
    /// - Open → Finalizing (close with a non-final state)
    /// - Open → Registered (peer registered a dispute)
    /// - Open → Settled (close with a final state, no registration)
    /// - Finalizing → Registered (registration confirmed)
    /// - Finalizing → Open (registration failed)
    /// - Registered → Settled (concluded and withdrawn)
    /// - Settled → Closed
    pub fn can_transition(self, to: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, to),
            (Proposed, Open)
                | (Open, Finalizing)
                | (Open, Registered)
                | (Open, Settled)
                | (Finalizing, Registered)
                | (Finalizing, Open)
                | (Registered, Settled)
                | (Settled, Closed)
        )
    }

    /// Move to `to` if the edge exists, leaves `self` untouched otherwise.
    pub fn transition(&mut self, to: Phase) -> Result<(), IllegalTransition> {
        if !self.can_transition(to) {
            return Err(IllegalTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    /// Off-chain updates are only possible while open.
    pub fn accepts_updates(self) -> bool {
        self == Phase::Open
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposed => write!(f, "Proposed"),
            Self::Open => write!(f, "Open"),
            Self::Finalizing => write!(f, "Finalizing"),
            Self::Registered => write!(f, "Registered"),
            Self::Settled => write!(f, "Settled"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
