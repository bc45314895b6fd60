pub mod analysis;
pub mod media;
pub mod user;
