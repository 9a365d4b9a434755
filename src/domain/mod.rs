pub mod conflict;
pub mod models;
pub mod negotiation;
pub mod notifications;
pub mod slots;
pub mod students;
pub mod time_range;
