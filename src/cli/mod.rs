pub mod convert;
pub mod rate;
pub mod setup;
pub mod ui;
