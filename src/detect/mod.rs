mod contours;
mod detector;
mod model;
mod morphology;
mod ops;

pub use detector::{DetectError, Detector};
pub use model::{
    make_estimator, AcceleratedEstimator, BaselineEstimator, ForegroundEstimator, ModelParams,
    ProcessingMode,
};
