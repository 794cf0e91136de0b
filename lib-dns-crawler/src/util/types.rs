use std::fmt;

/// How a resolution task finished.  This is carried in
/// `Recur::outcome`, inherited by the enclosing chase, and written
/// (for failures) as the `error: <kind>` line in crawler output.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Outcome {
    /// An authoritative answer was found.
    Okay,
    /// The authoritative zone signalled NXDOMAIN.
    NotExist,
    /// Every attempt against every server timed out.
    Unreachable,
    /// A server answered REFUSED or NOTIMP.
    Refused,
    /// A server gave neither an answer nor a usable delegation.
    Lame,
    /// A delegation led back to an already-visited zone.
    CircularZone,
    /// The delegation chain exceeded the depth limit.
    TooDeep,
    /// A reply could not be decoded.
    Malformed,
}

impl Outcome {
    pub fn is_okay(self) -> bool {
        self == Outcome::Okay
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Okay => write!(f, "okay"),
            Outcome::NotExist => write!(f, "not-exist"),
            Outcome::Unreachable => write!(f, "unreachable"),
            Outcome::Refused => write!(f, "refused"),
            Outcome::Lame => write!(f, "lame"),
            Outcome::CircularZone => write!(f, "circular-zone"),
            Outcome::TooDeep => write!(f, "too-deep"),
            Outcome::Malformed => write!(f, "malformed"),
        }
    }
}

/// The sticky error of a task tree.  An invariant violation indicates
/// a bug in the resolver, not bad network input, and aborts the whole
/// root task.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TermError {
    Internal(String),
}

impl TermError {
    /// The kind word used in `error: <kind>` output lines.
    pub fn kind(&self) -> &'static str {
        match self {
            TermError::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for TermError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TermError::Internal(msg) => write!(f, "internal error (bug): {msg}"),
        }
    }
}

impl std::error::Error for TermError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_words() {
        assert_eq!("okay", Outcome::Okay.to_string());
        assert_eq!("not-exist", Outcome::NotExist.to_string());
        assert_eq!("circular-zone", Outcome::CircularZone.to_string());
    }

    #[test]
    fn term_error_kind() {
        assert_eq!("internal", TermError::Internal("x".to_string()).kind());
    }
}
