mod fabric_error;

pub use fabric_error::{FabricError, FabricErrorKind};

pub type Result<T, E = FabricError> = std::result::Result<T, E>;
