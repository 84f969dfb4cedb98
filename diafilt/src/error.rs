use crate::interior_point_method::SolverFailure;

/// Main error type
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// A component was configured with inconsistent or invalid values.
    #[error("invalid configuration of {component}: {reason}")]
    Configuration {
        /// Component that rejected its configuration.
        component: &'static str,
        /// Description of the violated requirement.
        reason: String,
    },
    /// A bound interval has its lower limit above its upper limit.
    #[error("interval {name} is empty with lower {lower} > upper {upper}")]
    EmptyInterval {
        /// Name of the interval.
        name: &'static str,
        /// Lower limit.
        lower: f64,
        /// Upper limit.
        upper: f64,
    },
    /// The process model was evaluated outside of its valid domain.
    #[error("process model evaluated outside its domain at volume {volume} and product {product}")]
    ModelDomain {
        /// Retentate volume at evaluation.
        volume: f64,
        /// Product concentration at evaluation.
        product: f64,
    },
    /// A one-shot optimal control problem could not be solved.
    #[error("solver failure: {0}")]
    Solver(#[from] SolverFailure),
    /// A scenario distribution parameter is malformed.
    #[error("invalid scenario distribution for {parameter}: {reason}")]
    Sampling {
        /// Distribution parameter.
        parameter: &'static str,
        /// Description of the violated requirement.
        reason: String,
    },
}

/// Main result type
pub type Result<T> = std::result::Result<T, Error>;
