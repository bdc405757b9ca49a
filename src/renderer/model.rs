use std::cell::Cell;

use wgpu::util::DeviceExt;

use super::animation::frame_tex_coords;
use crate::error::RenderError;

/// Indices for a quad built from 4 shared vertices (two triangles).
pub const QUAD_INDICES: [u16; 6] = [0, 2, 1, 1, 2, 3];

/// Full-texture UVs matching the `Texture::model_coords` vertex order.
pub const QUAD_TEX_COORDS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];

/// Width and height of the bounding box of a position list.
pub fn bounding_size(positions: &[[f32; 2]]) -> (f32, f32) {
    let mut min = [f32::INFINITY; 2];
    let mut max = [f32::NEG_INFINITY; 2];
    for p in positions {
        min[0] = min[0].min(p[0]);
        min[1] = min[1].min(p[1]);
        max[0] = max[0].max(p[0]);
        max[1] = max[1].max(p[1]);
    }
    if positions.is_empty() {
        return (0.0, 0.0);
    }
    (max[0] - min[0], max[1] - min[1])
}

// ── Model ────────────────────────────────────────────────────────────────────

/// Indexed 2D geometry: a position buffer, a tex-coord buffer, and an index
/// buffer. Indices share vertices, so a quad submits 4 vertices, not 6.
///
/// The tex-coord buffer is the only buffer that mutates after construction
/// (sprite-sheet frame switching via [`Model::set_frame`]).
pub struct Model {
    position_buffer: wgpu::Buffer,
    tex_coord_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    pub width: f32,
    pub height: f32,
    released: Cell<bool>,
}

impl Model {
    pub fn new(
        device: &wgpu::Device,
        positions: &[[f32; 2]],
        tex_coords: &[[f32; 2]],
        indices: &[u16],
    ) -> Self {
        debug_assert_eq!(positions.len(), tex_coords.len());
        let (width, height) = bounding_size(positions);

        let position_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("model_positions"),
            contents: bytemuck::cast_slice(positions),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let tex_coord_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("model_texcoords"),
            contents: bytemuck::cast_slice(tex_coords),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("model_indices"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            position_buffer,
            tex_coord_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            width,
            height,
            released: Cell::new(false),
        }
    }

    /// Rectangular model with full-texture UVs.
    pub fn quad(device: &wgpu::Device, positions: [[f32; 2]; 4]) -> Self {
        Self::new(device, &positions, &QUAD_TEX_COORDS, &QUAD_INDICES)
    }

    pub fn is_rectangular(&self) -> bool {
        self.index_count == QUAD_INDICES.len() as u32
    }

    /// Switch to sprite-sheet frame `frame`, rewriting the tex-coord buffer
    /// contents in place (same buffer object, new data).
    ///
    /// Only rectangular models can frame-switch; anything else fails with
    /// `NonRectangularModel`.
    pub fn set_frame(
        &self,
        queue: &wgpu::Queue,
        frame: u32,
        frame_count: u32,
        flip: bool,
    ) -> Result<(), RenderError> {
        if !self.is_rectangular() {
            return Err(RenderError::NonRectangularModel {
                index_count: self.index_count,
            });
        }
        if frame >= frame_count {
            return Err(RenderError::InvalidFrame { frame, frame_count });
        }
        let coords = frame_tex_coords(frame_count, frame, flip);
        queue.write_buffer(&self.tex_coord_buffer, 0, bytemuck::cast_slice(&coords));
        Ok(())
    }

    /// Issue one indexed draw with this model's own tex coords.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        self.draw_with_tex_coords(pass, &self.tex_coord_buffer);
    }

    /// Issue one indexed draw with a substituted tex-coord buffer (a cached
    /// per-frame buffer from the tex-coord cache).
    pub fn draw_with_tex_coords(&self, pass: &mut wgpu::RenderPass<'_>, tex_coords: &wgpu::Buffer) {
        pass.set_vertex_buffer(0, self.position_buffer.slice(..));
        pass.set_vertex_buffer(1, tex_coords.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..self.index_count, 0, 0..1);
    }

    /// Release all three buffers. Exactly-once: later calls log and return.
    pub fn cleanup(&self) {
        if self.released.replace(true) {
            log::warn!("model cleaned up twice; ignoring");
            return;
        }
        self.position_buffer.destroy();
        self.tex_coord_buffer.destroy();
        self.index_buffer.destroy();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
