pub mod environments;
pub mod jobs;
