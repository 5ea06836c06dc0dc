pub mod extraction;
pub mod importer;
pub mod pipeline;
pub mod progress;
pub mod time_selector;
