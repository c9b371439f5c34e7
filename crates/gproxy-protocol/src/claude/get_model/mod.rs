pub mod request;
pub mod response;
pub mod types;

pub use request::{GetModelHeaders, GetModelPath, GetModelRequest};
pub use response::GetModelResponse;
pub use types::ModelInfo;
