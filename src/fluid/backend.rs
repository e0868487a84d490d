//! Render backend abstraction.
//!
//! The solver only ever talks to a [`RenderBackend`]: it allocates render targets,
//! compiles a fixed set of shaders, links them into programs and issues full-target
//! draws. Everything is addressed through small copyable ids so the effect can own
//! plain data and the backend owns the actual resources.

use bevy::math::{UVec2, Vec2, Vec3, Vec4};

use super::error::FluidError;

/// Keyword enabling the manual bilinear path of the advection shader.
pub const MANUAL_FILTERING: &str = "MANUAL_FILTERING";
/// Keyword enabling the pseudo-lighting path of the display shader.
pub const SHADING: &str = "SHADING";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Channel count of a texture, as used for both storage and sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    R,
    Rg,
    Rgba,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::R => 1,
            ChannelLayout::Rg => 2,
            ChannelLayout::Rgba => 4,
        }
    }
}

/// Per-channel storage precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexelType {
    HalfFloat,
    Float,
    UnsignedByte,
}

/// `(internal format, sampling format, type)` triple describing a render target texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureFormat {
    pub internal: ChannelLayout,
    pub sampling: ChannelLayout,
    pub texel: TexelType,
}

impl TextureFormat {
    /// Last-resort format every backend must be able to render to.
    pub const DEFAULT: TextureFormat = TextureFormat::new(ChannelLayout::Rgba, TexelType::UnsignedByte);

    pub const fn new(layout: ChannelLayout, texel: TexelType) -> Self {
        Self { internal: layout, sampling: layout, texel }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filtering {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filtering: Filtering,
}

impl TargetDesc {
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// The fixed shader set of the effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    BaseVertex,
    Copy,
    Clear,
    Splat,
    Advection,
    Divergence,
    Curl,
    Vorticity,
    Pressure,
    GradientSubtract,
    Display,
}

impl ShaderKind {
    /// Fragment shaders in registry order.
    pub const FRAGMENTS: [ShaderKind; 10] = [
        ShaderKind::Copy,
        ShaderKind::Clear,
        ShaderKind::Splat,
        ShaderKind::Advection,
        ShaderKind::Divergence,
        ShaderKind::Curl,
        ShaderKind::Vorticity,
        ShaderKind::Pressure,
        ShaderKind::GradientSubtract,
        ShaderKind::Display,
    ];

    pub fn stage(self) -> ShaderStage {
        match self {
            ShaderKind::BaseVertex => ShaderStage::Vertex,
            _ => ShaderStage::Fragment,
        }
    }

    /// Uniforms the shader reads, given its compile-time keywords.
    pub fn uniforms(self, keywords: &[&'static str]) -> Vec<&'static str> {
        let has = |k: &str| keywords.iter().any(|kw| *kw == k);
        match self {
            ShaderKind::BaseVertex => vec!["texel_size"],
            ShaderKind::Copy => vec!["u_texture"],
            ShaderKind::Clear => vec!["u_texture", "value"],
            ShaderKind::Splat => vec!["u_target", "aspect_ratio", "color", "point", "radius"],
            ShaderKind::Advection => {
                let mut names = vec!["u_velocity", "u_source", "texel_size", "dt", "dissipation"];
                if has(MANUAL_FILTERING) {
                    names.push("dye_texel_size");
                }
                names
            }
            ShaderKind::Divergence | ShaderKind::Curl => vec!["u_velocity", "texel_size"],
            ShaderKind::Vorticity => vec!["u_velocity", "u_curl", "curl", "dt", "texel_size"],
            ShaderKind::Pressure => vec!["u_pressure", "u_divergence", "texel_size"],
            ShaderKind::GradientSubtract => vec!["u_pressure", "u_velocity", "texel_size"],
            ShaderKind::Display => {
                if has(SHADING) {
                    vec!["u_texture", "texel_size"]
                } else {
                    vec!["u_texture"]
                }
            }
        }
    }

    /// Keywords the shader understands.
    pub fn accepts_keyword(self, keyword: &str) -> bool {
        matches!(
            (self, keyword),
            (ShaderKind::Advection, MANUAL_FILTERING) | (ShaderKind::Display, SHADING)
        )
    }

    /// Binding slot of a sampled texture: its position among the shader's `u_` uniforms.
    pub fn texture_slot(self, name: &str) -> Option<usize> {
        self.uniforms(&[MANUAL_FILTERING, SHADING])
            .into_iter()
            .filter(|n| n.starts_with("u_"))
            .position(|n| n == name)
    }
}

/// Uniform names of a vertex/fragment pair, fragment uniforms first.
pub fn link_uniforms(vertex: &ShaderSource, fragment: &ShaderSource) -> Result<Vec<&'static str>, FluidError> {
    if vertex.kind.stage() != ShaderStage::Vertex || fragment.kind.stage() != ShaderStage::Fragment {
        return Err(FluidError::ProgramLink { program: fragment.kind, log: "shader stages do not match".into() });
    }
    let mut uniforms = fragment.kind.uniforms(&fragment.keywords);
    for name in vertex.kind.uniforms(&vertex.keywords) {
        if !uniforms.contains(&name) {
            uniforms.push(name);
        }
    }
    Ok(uniforms)
}

/// What to compile: one of the fixed shaders plus its compile-time keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub kind: ShaderKind,
    pub keywords: Vec<&'static str>,
}

impl ShaderSource {
    pub fn new(kind: ShaderKind) -> Self {
        Self { kind, keywords: Vec::new() }
    }

    pub fn with_keyword(mut self, keyword: &'static str) -> Self {
        self.keywords.push(keyword);
        self
    }

    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|k| *k == keyword)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Texture(TargetId),
}

/// Blend state of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blend {
    Disabled,
    /// `src * src.a + dst * (1 - src.a)`
    Alpha,
    /// `src + dst * (1 - src.a)`
    Premultiplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawTarget {
    /// The backend's drawing buffer (the visible canvas).
    Screen,
    Target(TargetId),
}

/// A single full-target draw of a linked program.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    pub target: DrawTarget,
    pub uniforms: &'a [(UniformLocation, UniformValue)],
    pub blend: Blend,
    /// Clear colour applied to the target before drawing.
    pub clear: Option<Vec4>,
}

/// What the platform can render to and sample from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub half_float: bool,
    pub float: bool,
    pub single_channel: bool,
    pub two_channel: bool,
    /// Hardware linear filtering of floating point textures.
    pub linear_filtering: bool,
}

impl Capabilities {
    pub const fn full() -> Self {
        Self { half_float: true, float: true, single_channel: true, two_channel: true, linear_filtering: true }
    }

    /// Precision the effect should ask for first.
    pub fn preferred_texel(&self) -> TexelType {
        if self.half_float {
            TexelType::HalfFloat
        } else if self.float {
            TexelType::Float
        } else {
            TexelType::UnsignedByte
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::full()
    }
}

/// Live resources by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub textures: usize,
    pub framebuffers: usize,
    pub shaders: usize,
    pub programs: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.textures + self.framebuffers + self.shaders + self.programs
    }
}

/// Cumulative allocations and releases since a backend was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceTotals {
    pub allocated: ResourceCounts,
    pub released: ResourceCounts,
}

/// Minimal GPU-style API the fluid effect is written against.
pub trait RenderBackend {
    fn capabilities(&self) -> Capabilities;

    /// Size of the drawing buffer in physical pixels.
    fn drawing_buffer_size(&self) -> UVec2;
    fn set_drawing_buffer_size(&mut self, size: UVec2);

    /// Probe whether a target with `format` would be framebuffer-complete.
    /// Probing must not leave any resource allocated.
    fn supports_render_format(&mut self, format: TextureFormat) -> bool;

    /// Allocate a texture plus framebuffer, cleared to zero.
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId, FluidError>;
    fn release_target(&mut self, id: TargetId);

    fn compile_shader(&mut self, source: &ShaderSource) -> Result<ShaderId, FluidError>;
    fn release_shader(&mut self, id: ShaderId);

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, FluidError>;
    fn release_program(&mut self, id: ProgramId);

    /// Active uniforms of a linked program with their locations.
    fn active_uniforms(&self, program: ProgramId) -> Result<Vec<(String, UniformLocation)>, FluidError>;

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), FluidError>;

    /// Read back a target (or the drawing buffer) bottom row first.
    fn read_pixels(&self, target: DrawTarget) -> Result<Vec<Vec4>, FluidError>;
}

impl<B: RenderBackend + ?Sized> RenderBackend for &mut B {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn drawing_buffer_size(&self) -> UVec2 {
        (**self).drawing_buffer_size()
    }

    fn set_drawing_buffer_size(&mut self, size: UVec2) {
        (**self).set_drawing_buffer_size(size)
    }

    fn supports_render_format(&mut self, format: TextureFormat) -> bool {
        (**self).supports_render_format(format)
    }

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId, FluidError> {
        (**self).create_target(desc)
    }

    fn release_target(&mut self, id: TargetId) {
        (**self).release_target(id)
    }

    fn compile_shader(&mut self, source: &ShaderSource) -> Result<ShaderId, FluidError> {
        (**self).compile_shader(source)
    }

    fn release_shader(&mut self, id: ShaderId) {
        (**self).release_shader(id)
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, FluidError> {
        (**self).link_program(vertex, fragment)
    }

    fn release_program(&mut self, id: ProgramId) {
        (**self).release_program(id)
    }

    fn active_uniforms(&self, program: ProgramId) -> Result<Vec<(String, UniformLocation)>, FluidError> {
        (**self).active_uniforms(program)
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), FluidError> {
        (**self).draw(call)
    }

    fn read_pixels(&self, target: DrawTarget) -> Result<Vec<Vec4>, FluidError> {
        (**self).read_pixels(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_shader_specific() {
        assert!(ShaderKind::Advection.accepts_keyword(MANUAL_FILTERING));
        assert!(!ShaderKind::Copy.accepts_keyword(SHADING));
    }

    #[test]
    fn texture_slots_follow_sampler_order() {
        assert_eq!(ShaderKind::Advection.texture_slot("u_velocity"), Some(0));
        assert_eq!(ShaderKind::Advection.texture_slot("u_source"), Some(1));
        assert_eq!(ShaderKind::GradientSubtract.texture_slot("u_velocity"), Some(1));
        assert_eq!(ShaderKind::Splat.texture_slot("u_target"), Some(0));
        assert_eq!(ShaderKind::Splat.texture_slot("radius"), None);
    }

    #[test]
    fn linking_merges_vertex_uniforms_once() {
        let vertex = ShaderSource::new(ShaderKind::BaseVertex);
        let advection = ShaderSource::new(ShaderKind::Advection);
        let names = link_uniforms(&vertex, &advection).unwrap();
        assert_eq!(names.iter().filter(|n| **n == "texel_size").count(), 1);

        let display = ShaderSource::new(ShaderKind::Display);
        assert_eq!(link_uniforms(&vertex, &display).unwrap(), vec!["u_texture", "texel_size"]);
        assert!(matches!(link_uniforms(&display, &vertex), Err(FluidError::ProgramLink { .. })));
    }
}
