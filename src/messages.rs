use std::fmt;

/// Outcome of one round: a configured label, or nothing answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocationDecision {
    Located(String),
    NotFound,
}

impl LocationDecision {
    pub fn label(&self) -> Option<&str> {
        match self {
            LocationDecision::Located(label) => Some(label),
            LocationDecision::NotFound => None,
        }
    }
}

impl fmt::Display for LocationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationDecision::Located(label) => write!(f, "{label}"),
            LocationDecision::NotFound => write!(f, "not found"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    NowLocated(String),
    StillIn(String),
    MovedTo { from: String, to: String },
    BecameInaccessible { from: String },
    StillInaccessible,
}

impl Transition {
    pub fn between(previous: &LocationDecision, current: &LocationDecision) -> Self {
        use LocationDecision::*;

        match (previous, current) {
            (Located(from), Located(to)) if from == to => Transition::StillIn(to.clone()),
            (Located(from), Located(to)) => Transition::MovedTo {
                from: from.clone(),
                to: to.clone(),
            },
            (Located(from), NotFound) => Transition::BecameInaccessible { from: from.clone() },
            (NotFound, Located(to)) => Transition::NowLocated(to.clone()),
            (NotFound, NotFound) => Transition::StillInaccessible,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(
            self,
            Transition::StillIn(_) | Transition::StillInaccessible
        )
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::NowLocated(to) => write!(f, "now located in {to}"),
            Transition::StillIn(label) => write!(f, "still in {label}"),
            Transition::MovedTo { to, .. } => write!(f, "moved to {to}"),
            Transition::BecameInaccessible { .. } => write!(f, "became inaccessible"),
            Transition::StillInaccessible => write!(f, "still inaccessible"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PresenceEvent {
    pub device: String,
    pub previous: LocationDecision,
    pub current: LocationDecision,
    pub transition: Transition,
}

impl PresenceEvent {
    pub fn new(device: &str, previous: LocationDecision, current: LocationDecision) -> Self {
        let transition = Transition::between(&previous, &current);
        PresenceEvent {
            device: device.to_string(),
            previous,
            current,
            transition,
        }
    }

    pub fn message(&self) -> String {
        self.transition.to_string()
    }
}

/// Asks the poll loop to start its next round without waiting out the period.
#[derive(Clone, Debug)]
pub struct ScanRequest;
