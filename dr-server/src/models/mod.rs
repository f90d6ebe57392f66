pub mod history;
pub mod recovery_point;
