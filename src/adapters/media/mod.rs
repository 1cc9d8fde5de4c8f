pub mod runner;
pub mod video;
pub mod webcam;
