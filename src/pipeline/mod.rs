pub mod configurator;
pub mod registry;
pub mod source;
pub mod visualization;
