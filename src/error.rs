use crate::data::{ClassId, PeriodIndex, RoomIndex};
use std::fmt;

/// Two assignments occupy the same room at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConflictError {
    pub id_a: ClassId,
    pub id_b: ClassId,
    pub room: RoomIndex,
}

impl ConflictError {
    pub fn new(id_a: ClassId, id_b: ClassId, room: RoomIndex) -> Self {
        Self { id_a, id_b, room }
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "classes {} and {} overlap in room {}",
            self.id_a, self.id_b, self.room
        )
    }
}

impl std::error::Error for ConflictError {}

/// Why a candidate timetable was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Conflict(ConflictError),
    OutOfGrid {
        id: ClassId,
        room: RoomIndex,
        period: PeriodIndex,
        duration: usize,
    },
    EmptyDuration(ClassId),
    DuplicateId(ClassId),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Conflict(e) => write!(f, "{}", e),
            ValidationError::OutOfGrid {
                id,
                room,
                period,
                duration,
            } => write!(
                f,
                "class {} at room {} periods [{}, {}) lies outside the grid",
                id,
                room,
                period,
                period + duration
            ),
            ValidationError::EmptyDuration(id) => write!(f, "class {} has zero duration", id),
            ValidationError::DuplicateId(id) => write!(f, "class {} is placed twice", id),
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ValidationError::Conflict(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConflictError> for ValidationError {
    fn from(e: ConflictError) -> Self {
        ValidationError::Conflict(e)
    }
}

/// Errors from edits against the current timetable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Validation(ValidationError),
    UnknownAssignmentId(ClassId),
    NoReferenceData,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Validation(e) => write!(f, "{}", e),
            SessionError::UnknownAssignmentId(id) => {
                write!(f, "no assignment with id {} in the current timetable", id)
            }
            SessionError::NoReferenceData => write!(f, "no reference data has been installed"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for SessionError {
    fn from(e: ValidationError) -> Self {
        SessionError::Validation(e)
    }
}

/// Failures reported by an optimizer backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizerError {
    Unavailable(String),
    NoFeasibleSlot(ClassId),
    Timeout,
}

impl fmt::Display for OptimizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerError::Unavailable(msg) => write!(f, "optimizer unavailable: {}", msg),
            OptimizerError::NoFeasibleSlot(id) => {
                write!(f, "no free slot left for class {}", id)
            }
            OptimizerError::Timeout => write!(f, "optimizer did not answer in time"),
        }
    }
}

impl std::error::Error for OptimizerError {}

/// Errors from driving a generation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    StepInFlight,
    NotAwaiting,
    Optimizer(OptimizerError),
    Rejected(ValidationError),
    LockViolated(ClassId),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::StepInFlight => write!(f, "a generation step is already in flight"),
            ProtocolError::NotAwaiting => write!(f, "no generation step is in flight"),
            ProtocolError::Optimizer(e) => write!(f, "{}", e),
            ProtocolError::Rejected(e) => write!(f, "candidate rejected: {}", e),
            ProtocolError::LockViolated(id) => {
                write!(f, "candidate moved or dropped locked class {}", id)
            }
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Optimizer(e) => Some(e),
            ProtocolError::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OptimizerError> for ProtocolError {
    fn from(e: OptimizerError) -> Self {
        ProtocolError::Optimizer(e)
    }
}

impl From<ValidationError> for ProtocolError {
    fn from(e: ValidationError) -> Self {
        ProtocolError::Rejected(e)
    }
}
