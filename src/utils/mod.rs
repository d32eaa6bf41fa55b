pub mod model_inspector;
pub mod paths;
