pub mod admin;
pub mod assignments;
pub mod system;
