//! GPU render backend.
//!
//! Targets are `Image` assets with render-attachment usage. Draws are recorded in the
//! main world as [`FluidDraw`]s and replayed by [`FluidRenderPlugin`] as fullscreen
//! render passes over `shaders/splash_fluid.wgsl`, in the order they were issued.

pub mod pipeline;

use std::collections::HashMap;

use bevy::asset::{AssetHandleProvider, RenderAssetUsages};
use bevy::image::ImageSampler;
use bevy::prelude::*;
use bevy::render::render_resource::{
    Extent3d, ShaderType, TextureDimension, TextureFormat as ImageFormat, TextureUsages,
};
use bevy::render::settings::WgpuFeatures;

pub use pipeline::{FluidRenderPlugin, GpuFrameOutbox};

use super::backend::{
    link_uniforms, Blend, Capabilities, ChannelLayout, DrawCall, DrawTarget, Filtering, ProgramId, RenderBackend,
    ResourceCounts, ResourceTotals, ShaderId, ShaderKind, ShaderSource, TargetDesc, TargetId, TexelType,
    TextureFormat, UniformLocation, UniformValue, MANUAL_FILTERING, SHADING,
};
use super::error::FluidError;
use super::render::CapturedImage;

/// Format draws into the canvas are rendered with. The canvas itself is sRGB, so the
/// stored bytes equal the shader output and the sprite decodes them for display.
pub const CANVAS_VIEW_FORMAT: ImageFormat = ImageFormat::Rgba8Unorm;

/// Scalar uniforms shared by every pass, mirrored by `PassUniforms` in the shader.
#[derive(ShaderType, Debug, Clone, Copy, Default, PartialEq)]
pub struct PassUniforms {
    pub texel_size: Vec2,
    pub dye_texel_size: Vec2,
    pub point: Vec2,
    pub aspect_ratio: f32,
    pub radius: f32,
    pub color: Vec3,
    pub dt: f32,
    pub dissipation: f32,
    pub curl: f32,
    pub value: f32,
}

impl PassUniforms {
    pub fn set(&mut self, name: &'static str, value: UniformValue) -> Result<(), FluidError> {
        match (name, value) {
            ("texel_size", UniformValue::Vec2(v)) => self.texel_size = v,
            ("dye_texel_size", UniformValue::Vec2(v)) => self.dye_texel_size = v,
            ("point", UniformValue::Vec2(v)) => self.point = v,
            ("aspect_ratio", UniformValue::Float(v)) => self.aspect_ratio = v,
            ("radius", UniformValue::Float(v)) => self.radius = v,
            ("color", UniformValue::Vec3(v)) => self.color = v,
            ("dt", UniformValue::Float(v)) => self.dt = v,
            ("dissipation", UniformValue::Float(v)) => self.dissipation = v,
            ("curl", UniformValue::Float(v)) => self.curl = v,
            ("value", UniformValue::Float(v)) => self.value = v,
            _ => return Err(FluidError::UniformType { name }),
        }
        Ok(())
    }
}

/// Everything that selects a distinct render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub kind: ShaderKind,
    pub manual_filtering: bool,
    pub shading: bool,
    pub format: ImageFormat,
    pub blend: Blend,
}

/// One recorded fullscreen pass.
#[derive(Debug, Clone)]
pub struct FluidDraw {
    pub key: PipelineKey,
    pub target: Handle<Image>,
    /// Sampled textures by binding slot; an unused second slot repeats the first.
    pub textures: [Handle<Image>; 2],
    pub uniforms: PassUniforms,
    pub clear: Option<Vec4>,
}

pub fn image_format(format: TextureFormat) -> ImageFormat {
    match (format.texel, format.internal) {
        (TexelType::HalfFloat, ChannelLayout::R) => ImageFormat::R16Float,
        (TexelType::HalfFloat, ChannelLayout::Rg) => ImageFormat::Rg16Float,
        (TexelType::HalfFloat, ChannelLayout::Rgba) => ImageFormat::Rgba16Float,
        (TexelType::Float, ChannelLayout::R) => ImageFormat::R32Float,
        (TexelType::Float, ChannelLayout::Rg) => ImageFormat::Rg32Float,
        (TexelType::Float, ChannelLayout::Rgba) => ImageFormat::Rgba32Float,
        (TexelType::UnsignedByte, ChannelLayout::R) => ImageFormat::R8Unorm,
        (TexelType::UnsignedByte, ChannelLayout::Rg) => ImageFormat::Rg8Unorm,
        (TexelType::UnsignedByte, ChannelLayout::Rgba) => ImageFormat::Rgba8Unorm,
    }
}

/// Half floats are always renderable and filterable on WebGPU; 32-bit floats are
/// only sampled when the device can filter them.
pub fn gpu_capabilities(features: WgpuFeatures) -> Capabilities {
    Capabilities {
        float: features.contains(WgpuFeatures::FLOAT32_FILTERABLE),
        ..Capabilities::full()
    }
}

fn extent(size: UVec2) -> Extent3d {
    Extent3d { width: size.x.max(1), height: size.y.max(1), depth_or_array_layers: 1 }
}

/// The visible drawing buffer.
pub fn canvas_image(size: UVec2) -> Image {
    let mut image = Image::new_uninit(
        extent(size),
        TextureDimension::D2,
        ImageFormat::Rgba8UnormSrgb,
        RenderAssetUsages::default(),
    );
    image.texture_descriptor.usage = TextureUsages::TEXTURE_BINDING
        | TextureUsages::RENDER_ATTACHMENT
        | TextureUsages::COPY_SRC
        | TextureUsages::COPY_DST;
    image.texture_descriptor.view_formats = &[CANVAS_VIEW_FORMAT];
    image
}

pub fn target_image(desc: &TargetDesc) -> Image {
    let mut image = Image::new_uninit(
        extent(desc.size()),
        TextureDimension::D2,
        image_format(desc.format),
        RenderAssetUsages::default(),
    );
    image.texture_descriptor.usage =
        TextureUsages::TEXTURE_BINDING | TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC;
    image.sampler = match desc.filtering {
        Filtering::Linear => ImageSampler::linear(),
        Filtering::Nearest => ImageSampler::nearest(),
    };
    image
}

/// Strip the row padding of a texture readback (rows are top first).
pub fn readback_to_image(bytes: &[u8], size: UVec2) -> Result<CapturedImage, FluidError> {
    let (width, height) = (size.x as usize, size.y as usize);
    let row = width * 4;
    if height == 0 || width == 0 {
        return Err(FluidError::Capture(format!("empty readback {}x{}", size.x, size.y)));
    }
    let stride = bytes.len() / height;
    if stride < row {
        return Err(FluidError::Capture(format!("readback of {} bytes is too short for {}x{}", bytes.len(), size.x, size.y)));
    }
    let rgba = bytes.chunks(stride).take(height).flat_map(|r| &r[..row]).copied().collect();
    Ok(CapturedImage { width: size.x, height: size.y, rgba })
}

struct LinkedProgram {
    kind: ShaderKind,
    keywords: Vec<&'static str>,
    uniforms: Vec<&'static str>,
}

/// Records draws against `Image` targets; [`FluidRenderPlugin`] executes them.
pub struct GpuBackend {
    capabilities: Capabilities,
    canvas: Handle<Image>,
    canvas_size: UVec2,
    handles: AssetHandleProvider,
    targets: HashMap<TargetId, (TargetDesc, Handle<Image>)>,
    new_images: Vec<(Handle<Image>, Image)>,
    shaders: HashMap<ShaderId, ShaderSource>,
    programs: HashMap<ProgramId, LinkedProgram>,
    frame: Vec<FluidDraw>,
    next_id: u32,
    totals: ResourceTotals,
    draws: u64,
}

impl GpuBackend {
    /// `handles` must come from `Assets<Image>` so recorded targets can be inserted there.
    pub fn new(canvas: Handle<Image>, canvas_size: UVec2, handles: AssetHandleProvider, capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            canvas,
            canvas_size: canvas_size.max(UVec2::ONE),
            handles,
            targets: HashMap::new(),
            new_images: Vec::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            frame: Vec::new(),
            next_id: 1,
            totals: ResourceTotals::default(),
            draws: 0,
        }
    }

    /// A backend with no asset storage behind it, for recording without a renderer.
    pub fn headless(canvas_size: UVec2) -> Self {
        let handles = Assets::<Image>::default().get_handle_provider();
        Self::new(Handle::default(), canvas_size, handles, Capabilities::full())
    }

    pub fn canvas(&self) -> &Handle<Image> {
        &self.canvas
    }

    pub fn target_image(&self, id: TargetId) -> Option<&Handle<Image>> {
        self.targets.get(&id).map(|(_, image)| image)
    }

    /// Images created since the last call, to be inserted into `Assets<Image>`.
    pub fn take_new_images(&mut self) -> Vec<(Handle<Image>, Image)> {
        std::mem::take(&mut self.new_images)
    }

    /// Draws recorded since the last call, in issue order.
    pub fn take_frame(&mut self) -> Vec<FluidDraw> {
        std::mem::take(&mut self.frame)
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
}

impl RenderBackend for GpuBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn drawing_buffer_size(&self) -> UVec2 {
        self.canvas_size
    }

    fn set_drawing_buffer_size(&mut self, size: UVec2) {
        self.canvas_size = size.max(UVec2::ONE);
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
        let handle = self.handles.reserve_handle().typed::<Image>();
        self.new_images.push((handle.clone(), target_image(desc)));
        let id = TargetId(self.next_id());
        self.targets.insert(id, (*desc, handle));
        self.totals.allocated.textures += 1;
        self.totals.allocated.framebuffers += 1;
        debug!(target: "fluid::gpu", "target {:?} {}x{} {:?}", id, desc.width, desc.height, image_format(desc.format));
        Ok(id)
    }

    fn release_target(&mut self, id: TargetId) {
        // The image is freed once recorded draws and readbacks drop their handles.
        if self.targets.remove(&id).is_some() {
            self.totals.released.textures += 1;
            self.totals.released.framebuffers += 1;
        } else {
            warn!(target: "fluid::gpu", "release of unknown target {:?}", id);
        }
    }

    fn compile_shader(&mut self, source: &ShaderSource) -> Result<ShaderId, FluidError> {
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
            warn!(target: "fluid::gpu", "release of unknown shader {:?}", id);
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
            warn!(target: "fluid::gpu", "release of unknown program {:?}", id);
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
        let mut uniforms = PassUniforms::default();
        let mut textures: [Option<Handle<Image>>; 2] = [None, None];
        for (location, value) in call.uniforms {
            let name = linked
                .uniforms
                .get(location.0 as usize)
                .copied()
                .ok_or(FluidError::UnknownProgram(call.program))?;
            match value {
                UniformValue::Texture(id) => {
                    if call.target == DrawTarget::Target(*id) {
                        return Err(FluidError::FeedbackLoop(*id));
                    }
                    let (_, image) = self.targets.get(id).ok_or(FluidError::UnknownTarget(*id))?;
                    let slot = linked.kind.texture_slot(name).ok_or(FluidError::UniformType { name })?;
                    textures[slot] = Some(image.clone());
                }
                value => uniforms.set(name, *value)?,
            }
        }
        // Unset scalars read as zero; every sampler must be bound.
        for name in linked.uniforms.iter().filter(|n| n.starts_with("u_")) {
            let bound = linked.kind.texture_slot(name).and_then(|slot| textures[slot].as_ref());
            if bound.is_none() {
                return Err(FluidError::UniformType { name });
            }
        }
        let [Some(first), second] = textures else {
            return Err(FluidError::ProgramLink { program: linked.kind, log: "program samples no texture".into() });
        };
        let second = second.unwrap_or_else(|| first.clone());

        let (target, format) = match call.target {
            DrawTarget::Screen => (self.canvas.clone(), CANVAS_VIEW_FORMAT),
            DrawTarget::Target(id) => {
                let (desc, image) = self.targets.get(&id).ok_or(FluidError::UnknownTarget(id))?;
                (image.clone(), image_format(desc.format))
            }
        };
        let has = |k: &str| linked.keywords.iter().any(|kw| *kw == k);
        let key = PipelineKey {
            kind: linked.kind,
            manual_filtering: has(MANUAL_FILTERING),
            shading: has(SHADING),
            format,
            blend: call.blend,
        };
        self.frame.push(FluidDraw { key, target, textures: [first, second], uniforms, clear: call.clear });
        self.draws += 1;
        Ok(())
    }

    fn read_pixels(&self, _target: DrawTarget) -> Result<Vec<Vec4>, FluidError> {
        Err(FluidError::Capture("GPU targets are read back asynchronously".into()))
    }
}
