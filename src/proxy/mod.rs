pub mod classifier;
pub mod cors;
pub mod engine;
pub mod playlist;
pub mod relay;
pub mod upstream;
pub mod user_agent;
pub mod validator;

pub use engine::HlsProxy;
