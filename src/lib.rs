pub mod config;
pub mod error;
pub mod renderer;

pub use error::RenderError;
pub use renderer::Renderer;
