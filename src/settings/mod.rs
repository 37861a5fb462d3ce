pub(crate) mod settings_model;

pub use settings_model::Settings;
