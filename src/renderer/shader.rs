use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::RenderError;

// ── Guarded compilation ──────────────────────────────────────────────────────

/// Compile a WGSL module, surfacing validation failures as a fatal
/// [`RenderError::ShaderCompile`] with the naga diagnostic attached verbatim.
/// Non-error compilation messages are logged and do not fail the build.
pub fn compile_shader(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> Result<wgpu::ShaderModule, RenderError> {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    if let Some(err) = pollster::block_on(scope.pop()) {
        return Err(RenderError::ShaderCompile {
            label: label.to_string(),
            log: err.to_string(),
        });
    }

    // Some drivers emit spurious warnings here; report, never abort.
    let info = pollster::block_on(module.get_compilation_info());
    for msg in &info.messages {
        log::warn!("shader '{label}': {}", msg.message);
    }
    Ok(module)
}

/// Run a pipeline-building closure inside a validation error scope so a bad
/// layout surfaces as a fatal [`RenderError::PipelineLink`] instead of an
/// uncaptured device error.
pub fn link_pipeline<T>(
    device: &wgpu::Device,
    label: &str,
    build: impl FnOnce(&wgpu::Device) -> T,
) -> Result<T, RenderError> {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = build(device);
    if let Some(err) = pollster::block_on(scope.pop()) {
        return Err(RenderError::PipelineLink {
            label: label.to_string(),
            log: err.to_string(),
        });
    }
    Ok(pipeline)
}

// ── Typed uniform registry ───────────────────────────────────────────────────
//
// Uniform fields are declared once per layout and resolved by name into
// typed handles up front; all later writes go through the handle, so an
// unregistered name or a float-for-int mix-up cannot reach the GPU layer.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformType {
    F32,
    I32,
    Vec4,
}

impl UniformType {
    fn size(self) -> usize {
        match self {
            UniformType::F32 | UniformType::I32 => 4,
            UniformType::Vec4 => 16,
        }
    }

    fn align(self) -> usize {
        match self {
            UniformType::F32 | UniformType::I32 => 4,
            UniformType::Vec4 => 16,
        }
    }

    fn name(self) -> &'static str {
        match self {
            UniformType::F32 => "f32",
            UniformType::I32 => "i32",
            UniformType::Vec4 => "vec4",
        }
    }
}

/// Handle to a registered `f32` uniform field.
#[derive(Clone, Copy, Debug)]
pub struct F32Uniform(usize);
/// Handle to a registered `i32` uniform field.
#[derive(Clone, Copy, Debug)]
pub struct I32Uniform(usize);
/// Handle to a registered `vec4<f32>` uniform field.
#[derive(Clone, Copy, Debug)]
pub struct Vec4Uniform(usize);

/// Field offsets for a uniform struct, following WGSL's uniform address
/// space rules (scalars align to 4, vec4 to 16, struct size rounds up to 16).
///
/// The declaration order must match the WGSL struct field order — the field
/// names are the binding contract with the shader source.
pub struct UniformLayout {
    fields: HashMap<String, (usize, UniformType)>,
    size: usize,
}

impl UniformLayout {
    pub fn new(fields: &[(&str, UniformType)]) -> Self {
        let mut map = HashMap::new();
        let mut offset = 0usize;
        for (name, ty) in fields {
            offset = offset.next_multiple_of(ty.align());
            map.insert((*name).to_string(), (offset, *ty));
            offset += ty.size();
        }
        Self {
            fields: map,
            size: offset.next_multiple_of(16),
        }
    }

    /// Total byte size of the uniform struct (16-byte rounded).
    pub fn size(&self) -> usize {
        self.size
    }

    fn resolve(&self, name: &str, ty: UniformType) -> Result<usize, RenderError> {
        match self.fields.get(name) {
            None => Err(RenderError::UnknownUniform(name.to_string())),
            Some((_, declared)) if *declared != ty => Err(RenderError::UniformTypeMismatch {
                name: name.to_string(),
                declared: declared.name(),
                requested: ty.name(),
            }),
            Some((offset, _)) => Ok(*offset),
        }
    }

    pub fn register_f32(&self, name: &str) -> Result<F32Uniform, RenderError> {
        self.resolve(name, UniformType::F32).map(F32Uniform)
    }

    pub fn register_i32(&self, name: &str) -> Result<I32Uniform, RenderError> {
        self.resolve(name, UniformType::I32).map(I32Uniform)
    }

    pub fn register_vec4(&self, name: &str) -> Result<Vec4Uniform, RenderError> {
        self.resolve(name, UniformType::Vec4).map(Vec4Uniform)
    }
}

/// CPU staging area plus the GPU buffer for one uniform struct.
pub struct UniformBlock {
    data: Vec<u8>,
    buffer: wgpu::Buffer,
}

impl UniformBlock {
    pub fn new(device: &wgpu::Device, layout: &UniformLayout, label: &str) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: layout.size() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            data: vec![0u8; layout.size()],
            buffer,
        }
    }

    pub fn set_f32(&mut self, handle: F32Uniform, value: f32) {
        self.data[handle.0..handle.0 + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_i32(&mut self, handle: I32Uniform, value: i32) {
        self.data[handle.0..handle.0 + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_vec4(&mut self, handle: Vec4Uniform, value: [f32; 4]) {
        self.data[handle.0..handle.0 + 16].copy_from_slice(bytemuck::cast_slice(&value));
    }

    /// Push the staged bytes to the GPU. Call after the setters, before the
    /// draw that reads the block.
    pub fn upload(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.buffer, 0, &self.data);
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    #[cfg(test)]
    pub(crate) fn staged_layout_test(layout: &UniformLayout) -> Vec<u8> {
        vec![0u8; layout.size()]
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn material_layout() -> UniformLayout {
        UniformLayout::new(&[
            ("color", UniformType::Vec4),
            ("is_textured", UniformType::I32),
            ("blend", UniformType::I32),
            ("use_lights", UniformType::I32),
        ])
    }

    #[test]
    fn scalar_fields_pack_tightly_after_vec4() {
        let layout = material_layout();
        assert_eq!(layout.register_vec4("color").unwrap().0, 0);
        assert_eq!(layout.register_i32("is_textured").unwrap().0, 16);
        assert_eq!(layout.register_i32("blend").unwrap().0, 20);
        assert_eq!(layout.register_i32("use_lights").unwrap().0, 24);
    }

    #[test]
    fn struct_size_rounds_to_sixteen() {
        let layout = material_layout();
        // 16 + 3*4 = 28 → rounds up to 32.
        assert_eq!(layout.size(), 32);
    }

    #[test]
    fn vec4_after_scalar_skips_to_alignment() {
        let layout = UniformLayout::new(&[
            ("sun_presence", UniformType::F32),
            ("glow", UniformType::Vec4),
        ]);
        assert_eq!(layout.register_vec4("glow").unwrap().0, 16);
        assert_eq!(layout.size(), 32);
    }

    #[test]
    fn unknown_name_is_rejected_at_registration() {
        let layout = material_layout();
        assert!(matches!(
            layout.register_f32("tint"),
            Err(RenderError::UnknownUniform(_))
        ));
    }

    #[test]
    fn wrong_type_is_rejected_at_registration() {
        let layout = material_layout();
        assert!(matches!(
            layout.register_f32("blend"),
            Err(RenderError::UniformTypeMismatch { .. })
        ));
    }

    #[test]
    fn handles_expose_no_string_lookup_at_set_time() {
        // Setting goes through byte offsets only; this compiles and stages
        // without any name resolution.
        let layout = material_layout();
        let color = layout.register_vec4("color").unwrap();
        let mut data = UniformBlock::staged_layout_test(&layout);
        let value = [1.0f32, 0.0, 0.0, 1.0];
        data[color.0..color.0 + 16].copy_from_slice(bytemuck::cast_slice(&value));
        assert_eq!(&data[0..4], &1.0f32.to_le_bytes());
    }
}
