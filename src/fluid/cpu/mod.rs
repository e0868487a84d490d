//! Software render backend.
//!
//! Executes every fragment program on the CPU with GPU-like semantics: texel-centre
//! UVs, clamp-to-edge sampling, per-format quantisation and fixed-function blending.
//! It also keeps allocation/release counters so tests can check resource hygiene.

mod kernels;
mod texture;

use std::collections::HashMap;

use bevy::prelude::*;

pub use texture::Texture;

use super::backend::{
    link_uniforms, Blend, Capabilities, ChannelLayout, DrawCall, DrawTarget, Filtering, ProgramId, RenderBackend,
    ResourceCounts, ResourceTotals, ShaderId, ShaderKind, ShaderSource, TargetDesc, TargetId, TexelType,
    TextureFormat, UniformLocation, UniformValue,
};
use super::error::FluidError;
use kernels::{Fragment, Inputs};

#[derive(Debug, Clone)]
struct LinkedProgram {
    kind: ShaderKind,
    keywords: Vec<&'static str>,
    uniforms: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct CpuBackend {
    capabilities: Capabilities,
    canvas: Texture,
    targets: HashMap<TargetId, Texture>,
    shaders: HashMap<ShaderId, ShaderSource>,
    programs: HashMap<ProgramId, LinkedProgram>,
    next_id: u32,
    totals: ResourceTotals,
    draws: u64,
    failing_shader: Option<ShaderKind>,
    target_budget: Option<u32>,
}

fn canvas_desc(size: UVec2) -> TargetDesc {
    TargetDesc {
        width: size.x.max(1),
        height: size.y.max(1),
        format: TextureFormat::DEFAULT,
        filtering: Filtering::Nearest,
    }
}

impl CpuBackend {
    pub fn new(canvas: UVec2) -> Self {
        Self::with_capabilities(canvas, Capabilities::full())
    }

    pub fn with_capabilities(canvas: UVec2, capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            canvas: Texture::new(&canvas_desc(canvas)),
            targets: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            next_id: 1,
            totals: ResourceTotals::default(),
            draws: 0,
            failing_shader: None,
            target_budget: None,
        }
    }

    /// Make compilation of `kind` fail, to exercise error paths.
    pub fn fail_shader(mut self, kind: ShaderKind) -> Self {
        self.failing_shader = Some(kind);
        self
    }

    /// Allow only `budget` more target allocations (`None` lifts the limit).
    pub fn limit_target_allocations(&mut self, budget: Option<u32>) {
        self.target_budget = budget;
    }

    pub fn live(&self) -> ResourceCounts {
        ResourceCounts {
            textures: self.targets.len(),
            framebuffers: self.targets.len(),
            shaders: self.shaders.len(),
            programs: self.programs.len(),
        }
    }

    pub fn totals(&self) -> ResourceTotals {
        self.totals
    }

    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    /// Direct access to a target's texels, for inspection.
    pub fn texture(&self, id: TargetId) -> Option<&Texture> {
        self.targets.get(&id)
    }

    pub fn texture_mut(&mut self, id: TargetId) -> Option<&mut Texture> {
        self.targets.get_mut(&id)
    }

    pub fn canvas(&self) -> &Texture {
        &self.canvas
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn renderable(&self, format: TextureFormat) -> bool {
        let texel = match format.texel {
            TexelType::HalfFloat => self.capabilities.half_float,
            TexelType::Float => self.capabilities.float,
            TexelType::UnsignedByte => true,
        };
        let layout = match format.internal {
            ChannelLayout::R => self.capabilities.single_channel,
            ChannelLayout::Rg => self.capabilities.two_channel,
            ChannelLayout::Rgba => true,
        };
        texel && layout
    }

    fn target_texture(&self, target: DrawTarget) -> Result<&Texture, FluidError> {
        match target {
            DrawTarget::Screen => Ok(&self.canvas),
            DrawTarget::Target(id) => self.targets.get(&id).ok_or(FluidError::UnknownTarget(id)),
        }
    }

    fn target_texture_mut(&mut self, target: DrawTarget) -> Result<&mut Texture, FluidError> {
        match target {
            DrawTarget::Screen => Ok(&mut self.canvas),
            DrawTarget::Target(id) => self.targets.get_mut(&id).ok_or(FluidError::UnknownTarget(id)),
        }
    }
}

fn blend(mode: Blend, src: Vec4, dst: Vec4) -> Vec4 {
    match mode {
        Blend::Disabled => src,
        Blend::Alpha => src * src.w + dst * (1.0 - src.w),
        Blend::Premultiplied => src + dst * (1.0 - src.w),
    }
}

impl RenderBackend for CpuBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn drawing_buffer_size(&self) -> UVec2 {
        self.canvas.size()
    }

    fn set_drawing_buffer_size(&mut self, size: UVec2) {
        if self.canvas.size() != size {
            self.canvas = Texture::new(&canvas_desc(size));
        }
    }

    fn supports_render_format(&mut self, format: TextureFormat) -> bool {
        self.renderable(format)
    }

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId, FluidError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(FluidError::ContextUnavailable(format!(
                "zero-sized target {}x{}",
                desc.width, desc.height
            )));
        }
        if !self.renderable(desc.format) {
            return Err(FluidError::ContextUnavailable(format!("{:?} is not renderable", desc.format)));
        }
        if let Some(budget) = self.target_budget.as_mut() {
            if *budget == 0 {
                return Err(FluidError::ContextUnavailable("out of target memory".into()));
            }
            *budget -= 1;
        }
        let id = TargetId(self.next_id());
        self.targets.insert(id, Texture::new(desc));
        self.totals.allocated.textures += 1;
        self.totals.allocated.framebuffers += 1;
        Ok(id)
    }

    fn release_target(&mut self, id: TargetId) {
        if self.targets.remove(&id).is_some() {
            self.totals.released.textures += 1;
            self.totals.released.framebuffers += 1;
        } else {
            warn!(target: "fluid::cpu", "release of unknown target {:?}", id);
        }
    }

    fn compile_shader(&mut self, source: &ShaderSource) -> Result<ShaderId, FluidError> {
        if self.failing_shader == Some(source.kind) {
            return Err(FluidError::ShaderCompile { shader: source.kind, log: "compilation disabled".into() });
        }
        if let Some(keyword) = source.keywords.iter().find(|k| !source.kind.accepts_keyword(k)) {
            return Err(FluidError::ShaderCompile {
                shader: source.kind,
                log: format!("unknown keyword {keyword}"),
            });
        }
        let id = ShaderId(self.next_id());
        self.shaders.insert(id, source.clone());
        self.totals.allocated.shaders += 1;
        Ok(id)
    }

    fn release_shader(&mut self, id: ShaderId) {
        if self.shaders.remove(&id).is_some() {
            self.totals.released.shaders += 1;
        } else {
            warn!(target: "fluid::cpu", "release of unknown shader {:?}", id);
        }
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, FluidError> {
        let vs = self.shaders.get(&vertex).ok_or(FluidError::UnknownShader(vertex))?;
        let fs = self.shaders.get(&fragment).ok_or(FluidError::UnknownShader(fragment))?;
        let uniforms = link_uniforms(vs, fs)?;
        let program = LinkedProgram { kind: fs.kind, keywords: fs.keywords.clone(), uniforms };
        let id = ProgramId(self.next_id());
        self.programs.insert(id, program);
        self.totals.allocated.programs += 1;
        Ok(id)
    }

    fn release_program(&mut self, id: ProgramId) {
        if self.programs.remove(&id).is_some() {
            self.totals.released.programs += 1;
        } else {
            warn!(target: "fluid::cpu", "release of unknown program {:?}", id);
        }
    }

    fn active_uniforms(&self, program: ProgramId) -> Result<Vec<(String, UniformLocation)>, FluidError> {
        let linked = self.programs.get(&program).ok_or(FluidError::UnknownProgram(program))?;
        Ok(linked
            .uniforms
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), UniformLocation(i as u32)))
            .collect())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), FluidError> {
        let linked = self.programs.get(&call.program).ok_or(FluidError::UnknownProgram(call.program))?;
        let mut values = HashMap::new();
        for (location, value) in call.uniforms {
            let name = linked
                .uniforms
                .get(location.0 as usize)
                .copied()
                .ok_or(FluidError::UnknownProgram(call.program))?;
            if let (UniformValue::Texture(id), DrawTarget::Target(target)) = (value, call.target) {
                if *id == target {
                    return Err(FluidError::FeedbackLoop(target));
                }
            }
            values.insert(name, *value);
        }

        let shaded = {
            let dst = self.target_texture(call.target)?;
            let inputs = Inputs::new(values, &self.targets);
            let fragment = Fragment::prepare(linked.kind, &linked.keywords, &inputs)?;
            let (w, h) = (dst.width, dst.height);
            let size = Vec2::new(w as f32, h as f32);
            let mut out = Vec::with_capacity((w * h) as usize);
            for y in 0..h {
                for x in 0..w {
                    let uv = (Vec2::new(x as f32, y as f32) + 0.5) / size;
                    out.push(fragment.shade(uv));
                }
            }
            out
        };

        let dst = self.target_texture_mut(call.target)?;
        if let Some(clear) = call.clear {
            dst.fill(clear);
        }
        let blended = match call.blend {
            Blend::Disabled => shaded,
            mode => shaded
                .into_iter()
                .zip(dst.texels())
                .map(|(src, dst)| blend(mode, src, *dst))
                .collect(),
        };
        dst.store_all(blended);
        self.draws += 1;
        Ok(())
    }

    fn read_pixels(&self, target: DrawTarget) -> Result<Vec<Vec4>, FluidError> {
        Ok(self.target_texture(target)?.texels().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(w: u32, h: u32) -> TargetDesc {
        TargetDesc {
            width: w,
            height: h,
            format: TextureFormat::new(ChannelLayout::Rgba, TexelType::Float),
            filtering: Filtering::Nearest,
        }
    }

    #[test]
    fn probing_allocates_nothing() {
        let mut backend = CpuBackend::new(UVec2::new(4, 4));
        assert!(backend.supports_render_format(TextureFormat::DEFAULT));
        assert_eq!(backend.totals(), ResourceTotals::default());
    }

    #[test]
    fn missing_capabilities_reject_formats() {
        let caps = Capabilities { half_float: false, single_channel: false, ..Capabilities::full() };
        let mut backend = CpuBackend::with_capabilities(UVec2::new(4, 4), caps);
        assert!(!backend.supports_render_format(TextureFormat::new(ChannelLayout::Rgba, TexelType::HalfFloat)));
        assert!(!backend.supports_render_format(TextureFormat::new(ChannelLayout::R, TexelType::Float)));
        assert!(backend.supports_render_format(TextureFormat::new(ChannelLayout::Rg, TexelType::Float)));
    }

    #[test]
    fn target_lifecycle_is_counted() {
        let mut backend = CpuBackend::new(UVec2::new(4, 4));
        let id = backend.create_target(&desc(2, 2)).unwrap();
        assert_eq!(backend.live().textures, 1);
        backend.release_target(id);
        assert_eq!(backend.live(), ResourceCounts::default());
        assert_eq!(backend.totals().allocated, backend.totals().released);
    }

    #[test]
    fn zero_sized_target_is_refused() {
        let mut backend = CpuBackend::new(UVec2::new(4, 4));
        assert!(matches!(backend.create_target(&desc(0, 3)), Err(FluidError::ContextUnavailable(_))));
    }

    #[test]
    fn sampling_the_draw_target_is_a_feedback_loop() {
        let mut backend = CpuBackend::new(UVec2::new(4, 4));
        let vs = backend.compile_shader(&ShaderSource::new(ShaderKind::BaseVertex)).unwrap();
        let fs = backend.compile_shader(&ShaderSource::new(ShaderKind::Copy)).unwrap();
        let program = backend.link_program(vs, fs).unwrap();
        let location = backend.active_uniforms(program).unwrap()[0].1;
        let id = backend.create_target(&desc(2, 2)).unwrap();
        let uniforms = [(location, UniformValue::Texture(id))];
        let call = DrawCall { program, target: DrawTarget::Target(id), uniforms: &uniforms, blend: Blend::Disabled, clear: None };
        assert_eq!(backend.draw(&call), Err(FluidError::FeedbackLoop(id)));
    }

    #[test]
    fn premultiplied_blend_keeps_destination_under_transparent_source() {
        let dst = Vec4::new(0.2, 0.2, 0.2, 1.0);
        assert_eq!(blend(Blend::Premultiplied, Vec4::ZERO, dst), dst);
        assert_eq!(blend(Blend::Alpha, Vec4::new(1.0, 0.0, 0.0, 1.0), dst), Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn unknown_keyword_fails_compilation() {
        let mut backend = CpuBackend::new(UVec2::new(4, 4));
        let source = ShaderSource::new(ShaderKind::Copy).with_keyword("SHADING");
        assert!(matches!(backend.compile_shader(&source), Err(FluidError::ShaderCompile { .. })));
        assert_eq!(backend.live().shaders, 0);
    }
}
