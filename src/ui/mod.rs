pub mod icons;
pub mod progress;

pub use progress::{RemediationUI, print_summary};
