// Pipeline processing: reply recovery, coercion, normalization and validation

pub mod coerce;
pub mod normalize;
pub mod recovery;
pub mod validate;
