// Named-axis covariance algebra and covariance-structured ensemble generation

#![doc = include_str!("../README.md")]

pub mod binary_codec;
pub mod covariance;
pub mod diagnostics;
pub mod draw;
pub mod ensemble;
pub mod error;
pub mod linalg_backends;
pub mod matrix_io;
pub mod named_matrix;
pub mod observation_ensemble;
pub mod parameter_ensemble;
pub mod rsvd;
pub mod sampling;
pub mod scenario;
pub mod sparse;
pub mod transform;

pub use crate::binary_codec::{BinaryLayout, LabeledEntries};
pub use crate::covariance::CovarianceMatrix;
pub use crate::diagnostics::{DiagnosticsSink, DrawMethod, DrawReport, GroupDrawDetail};
pub use crate::draw::{DrawRequest, DrawnRealizations, RandomDrawEngine};
pub use crate::ensemble::Ensemble;
pub use crate::error::{NameLookupError, ThreadSafeStdError};
pub use crate::named_matrix::{MatrixKind, NamedMatrix};
pub use crate::observation_ensemble::ObservationEnsemble;
pub use crate::parameter_ensemble::ParameterEnsemble;
pub use crate::rsvd::RsvdConfig;
pub use crate::sampling::SamplingContext;
pub use crate::scenario::{
    ControlScenario, EnsembleOptions, ObservationRecord, ParameterRecord, PriorInformationRecord, RunManager,
    TransformKind, ValueProvider,
};
pub use crate::transform::{ParameterTransforms, TransformStatus};
