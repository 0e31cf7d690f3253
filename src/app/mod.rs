pub mod normalize_use_case;
pub mod ports;
pub mod validate_use_case;
