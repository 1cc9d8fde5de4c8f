pub mod detection;
pub mod errors;
pub mod model;
pub mod source;
pub mod stream;
