pub mod convert;
pub mod history;
pub mod rates;
pub mod refresh;
pub mod setup;
pub mod ui;
