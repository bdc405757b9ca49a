use thiserror::Error;

/// Errors surfaced by the rendering subsystem.
///
/// The first group is fatal: a scene load cannot continue past a failed
/// texture decode or shader compile, and the underlying diagnostic is
/// carried verbatim. The second group is the programmer-error class —
/// out-of-range frames, unregistered uniforms — which tests are expected
/// to catch long before a user ever sees them.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to decode image '{source_label}': {source}")]
    ImageDecode {
        source_label: String,
        #[source]
        source: image::ImageError,
    },

    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    DeviceRequest(String),

    #[error("GPU allocation failed for '{0}'")]
    GpuAllocation(String),

    #[error("shader '{label}' failed to compile:\n{log}")]
    ShaderCompile { label: String, log: String },

    #[error("pipeline '{label}' failed to link:\n{log}")]
    PipelineLink { label: String, log: String },

    #[error("uniform '{0}' is not declared in the layout")]
    UnknownUniform(String),

    #[error("uniform '{name}' is declared as {declared}, not {requested}")]
    UniformTypeMismatch {
        name: String,
        declared: &'static str,
        requested: &'static str,
    },

    #[error("frame {frame} out of range for a {frame_count}-frame animation")]
    InvalidFrame { frame: u32, frame_count: u32 },

    #[error("set_frame requires a rectangular (6-index) model, got {index_count} indices")]
    NonRectangularModel { index_count: u32 },

    #[error("animation states cover {state_total} frames but the sheet has {frame_count}")]
    StateFrameMismatch { state_total: u32, frame_count: u32 },

    #[error("animation needs at least one frame")]
    EmptyAnimation,

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}
