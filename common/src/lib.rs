pub mod config;
pub mod countdown;
pub mod form;
pub mod mode;

pub use config::{ConfigError, Configuration, TargetDate};
pub use countdown::{CountdownEngine, CountdownFrame};
pub use form::ProvisioningSubmission;
pub use mode::{BootInputs, BootMode};
