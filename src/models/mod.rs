pub mod assignment;
pub mod chair;
pub mod location;
pub mod ride;
pub mod user;
