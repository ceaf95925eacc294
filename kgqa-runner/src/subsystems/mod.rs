pub mod backends;
pub mod baseline;
pub mod generate;
pub mod report;
pub mod verify;
