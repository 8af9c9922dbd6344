/// Errors produced by tensors, layers, losses and optimizers.
///
/// Every variant is raised at the point of detection, before any buffer is
/// mutated, and propagated unchanged through the layer chain.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Operand shapes violate an operation's precondition.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A layer or optimizer was configured with unusable hyperparameters.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// A call-order precondition was violated (e.g. backward before forward).
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Malformed persisted model or dataset.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, Error>;
