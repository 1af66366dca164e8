pub mod config;
pub mod llm;
pub mod locator;
pub mod logger;
pub mod machine;
pub mod report;
pub mod state;
pub mod testgen;
