pub mod conversation;
pub mod normalizer;
pub mod presenter;
pub mod settings;
