pub mod messaging;
pub mod preferences;
pub mod providers;
pub mod recommendations;
