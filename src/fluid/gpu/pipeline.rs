//! Render-world execution of recorded fluid draws.

use std::collections::{HashMap, VecDeque};

use bevy::prelude::*;
use bevy::render::render_asset::RenderAssets;
use bevy::render::render_resource::binding_types::{sampler, texture_2d, uniform_buffer};
use bevy::render::render_resource::{
    BindGroupEntries, BindGroupLayout, BindGroupLayoutEntries, BlendComponent, BlendFactor, BlendOperation,
    BlendState, CachedRenderPipelineId, ColorTargetState, ColorWrites, CommandEncoderDescriptor,
    DynamicUniformBuffer, FragmentState, LoadOp, MultisampleState, Operations, PipelineCache, PrimitiveState,
    RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor,
    SamplerBindingType, ShaderDefVal, ShaderStages, StoreOp, TextureSampleType, TextureViewDescriptor,
    VertexState,
};
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bevy::render::texture::GpuImage;
use bevy::render::{Extract, ExtractSchedule, Render, RenderApp, RenderSet};

use super::{FluidDraw, PassUniforms, PipelineKey};
use crate::fluid::backend::{Blend, ShaderKind, MANUAL_FILTERING, SHADING};

pub const SHADER_PATH: &str = "shaders/splash_fluid.wgsl";

/// Draws waiting on pipelines or images are dropped oldest first beyond this.
const MAX_PENDING_DRAWS: usize = 4096;

/// Main-world hand-off of the draws recorded this frame.
#[derive(Resource, Default)]
pub struct GpuFrameOutbox {
    pub draws: Vec<FluidDraw>,
}

/// Render-world backlog; draws run strictly in issue order.
#[derive(Resource, Default)]
pub struct FluidDrawQueue {
    pending: VecDeque<FluidDraw>,
}

#[derive(Resource, Default)]
pub struct FluidUniforms(DynamicUniformBuffer<PassUniforms>);

#[derive(Resource)]
pub struct FluidPipelines {
    pub layout: BindGroupLayout,
    shader: Handle<Shader>,
    cached: HashMap<PipelineKey, CachedRenderPipelineId>,
}

pub struct FluidRenderPlugin;

impl Plugin for FluidRenderPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<GpuFrameOutbox>();
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        render_app
            .init_resource::<FluidDrawQueue>()
            .init_resource::<FluidUniforms>()
            .add_systems(ExtractSchedule, extract_fluid_draws)
            // Draws run in Prepare so the canvas is current before the sprite samples it.
            .add_systems(
                Render,
                (queue_fluid_pipelines, run_fluid_draws).chain().in_set(RenderSet::Prepare),
            );
    }

    fn finish(&self, app: &mut App) {
        if let Some(render_app) = app.get_sub_app_mut(RenderApp) {
            render_app.init_resource::<FluidPipelines>();
        }
    }
}

impl FromWorld for FluidPipelines {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();
        let layout = render_device.create_bind_group_layout(
            "splash-fluid-layout",
            &BindGroupLayoutEntries::sequential(
                ShaderStages::VERTEX_FRAGMENT,
                (
                    uniform_buffer::<PassUniforms>(true),
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    sampler(SamplerBindingType::Filtering),
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    sampler(SamplerBindingType::Filtering),
                ),
            ),
        );
        let shader = world.resource::<AssetServer>().load(SHADER_PATH);
        Self { layout, shader, cached: HashMap::new() }
    }
}

impl FluidPipelines {
    fn queue(&mut self, cache: &PipelineCache, key: PipelineKey) {
        if self.cached.contains_key(&key) {
            return;
        }
        let id = cache.queue_render_pipeline(self.descriptor(key));
        info!(target: "fluid::gpu", "queued pipeline {:?} {:?} {:?}", key.kind, key.format, key.blend);
        self.cached.insert(key, id);
    }

    fn get<'a>(&self, cache: &'a PipelineCache, key: &PipelineKey) -> Option<&'a RenderPipeline> {
        self.cached.get(key).and_then(|id| cache.get_render_pipeline(*id))
    }

    fn descriptor(&self, key: PipelineKey) -> RenderPipelineDescriptor {
        let shader_defs = shader_defs(&key);
        RenderPipelineDescriptor {
            label: Some(format!("splash_fluid_{:?}", key.kind).into()),
            layout: vec![self.layout.clone()],
            push_constant_ranges: vec![],
            vertex: VertexState {
                shader: self.shader.clone(),
                shader_defs: shader_defs.clone(),
                entry_point: "vs_base".into(),
                buffers: vec![],
            },
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                shader: self.shader.clone(),
                shader_defs,
                entry_point: fragment_entry(key.kind).into(),
                targets: vec![Some(ColorTargetState {
                    format: key.format,
                    blend: blend_state(key.blend),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            zero_initialize_workgroup_memory: false,
        }
    }
}

pub fn fragment_entry(kind: ShaderKind) -> &'static str {
    match kind {
        ShaderKind::BaseVertex => "vs_base",
        ShaderKind::Copy => "fs_copy",
        ShaderKind::Clear => "fs_clear",
        ShaderKind::Splat => "fs_splat",
        ShaderKind::Advection => "fs_advection",
        ShaderKind::Divergence => "fs_divergence",
        ShaderKind::Curl => "fs_curl",
        ShaderKind::Vorticity => "fs_vorticity",
        ShaderKind::Pressure => "fs_pressure",
        ShaderKind::GradientSubtract => "fs_gradient_subtract",
        ShaderKind::Display => "fs_display",
    }
}

pub fn shader_defs(key: &PipelineKey) -> Vec<ShaderDefVal> {
    let mut defs = Vec::new();
    if key.manual_filtering {
        defs.push(MANUAL_FILTERING.into());
    }
    if key.shading {
        defs.push(SHADING.into());
    }
    defs
}

pub fn blend_state(blend: Blend) -> Option<BlendState> {
    match blend {
        Blend::Disabled => None,
        Blend::Alpha => {
            let component = BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            };
            Some(BlendState { color: component, alpha: component })
        }
        Blend::Premultiplied => Some(BlendState::PREMULTIPLIED_ALPHA_BLENDING),
    }
}

fn extract_fluid_draws(outbox: Extract<Res<GpuFrameOutbox>>, mut queue: ResMut<FluidDrawQueue>) {
    queue.pending.extend(outbox.draws.iter().cloned());
    let excess = queue.pending.len().saturating_sub(MAX_PENDING_DRAWS);
    if excess > 0 {
        warn!(target: "fluid::gpu", "dropping {excess} fluid draws the renderer could not keep up with");
        queue.pending.drain(..excess);
    }
}

fn queue_fluid_pipelines(
    mut pipelines: ResMut<FluidPipelines>,
    pipeline_cache: Res<PipelineCache>,
    queue: Res<FluidDrawQueue>,
) {
    for draw in &queue.pending {
        pipelines.queue(&pipeline_cache, draw.key);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_fluid_draws(
    mut queue: ResMut<FluidDrawQueue>,
    pipelines: Res<FluidPipelines>,
    pipeline_cache: Res<PipelineCache>,
    gpu_images: Res<RenderAssets<GpuImage>>,
    mut uniforms: ResMut<FluidUniforms>,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
) {
    // A draw can only run once everything it touches exists; later draws wait behind it.
    let ready = queue
        .pending
        .iter()
        .take_while(|draw| {
            pipelines.get(&pipeline_cache, &draw.key).is_some()
                && gpu_images.get(&draw.target).is_some()
                && draw.textures.iter().all(|t| gpu_images.get(t).is_some())
        })
        .count();
    if ready == 0 {
        if !queue.pending.is_empty() {
            debug!(target: "fluid::gpu", "{} draws waiting on pipelines or images", queue.pending.len());
        }
        return;
    }
    let batch: Vec<FluidDraw> = queue.pending.drain(..ready).collect();

    uniforms.0.clear();
    let offsets: Vec<u32> = batch.iter().map(|draw| uniforms.0.push(&draw.uniforms)).collect();
    uniforms.0.write_buffer(&render_device, &render_queue);
    let Some(binding) = uniforms.0.binding() else {
        return;
    };

    let mut encoder = render_device.create_command_encoder(&CommandEncoderDescriptor { label: Some("splash-fluid-encoder") });
    for (draw, offset) in batch.iter().zip(offsets) {
        let (Some(pipeline), Some(target), Some(first), Some(second)) = (
            pipelines.get(&pipeline_cache, &draw.key),
            gpu_images.get(&draw.target),
            gpu_images.get(&draw.textures[0]),
            gpu_images.get(&draw.textures[1]),
        ) else {
            continue;
        };
        let bind_group = render_device.create_bind_group(
            "splash-fluid-bind-group",
            &pipelines.layout,
            &BindGroupEntries::sequential((
                binding.clone(),
                &first.texture_view,
                &first.sampler,
                &second.texture_view,
                &second.sampler,
            )),
        );
        let view = if target.texture_format == draw.key.format {
            target.texture_view.clone()
        } else {
            target.texture.create_view(&TextureViewDescriptor { format: Some(draw.key.format), ..default() })
        };
        let load = match draw.clear {
            Some(c) => LoadOp::Clear(LinearRgba::new(c.x, c.y, c.z, c.w).into()),
            None => LoadOp::Load,
        };
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some(fragment_entry(draw.key.kind)),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: Operations { load, store: StoreOp::Store },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[offset]);
        pass.draw(0..3, 0..1);
    }
    render_queue.submit(std::iter::once(encoder.finish()));
    trace!(target: "fluid::gpu", "submitted {} fluid draws", batch.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::render::render_resource::TextureFormat;

    fn key(kind: ShaderKind, manual_filtering: bool, shading: bool) -> PipelineKey {
        PipelineKey { kind, manual_filtering, shading, format: TextureFormat::Rgba16Float, blend: Blend::Disabled }
    }

    #[test]
    fn every_fragment_has_its_own_entry_point() {
        let mut entries: Vec<_> = ShaderKind::FRAGMENTS.iter().map(|k| fragment_entry(*k)).collect();
        assert!(entries.iter().all(|e| e.starts_with("fs_")));
        entries.sort();
        entries.dedup();
        assert_eq!(entries.len(), ShaderKind::FRAGMENTS.len());
    }

    #[test]
    fn keywords_become_shader_defs() {
        assert!(shader_defs(&key(ShaderKind::Copy, false, false)).is_empty());
        assert_eq!(
            shader_defs(&key(ShaderKind::Advection, true, false)),
            vec![ShaderDefVal::Bool(MANUAL_FILTERING.into(), true)]
        );
        assert_eq!(shader_defs(&key(ShaderKind::Display, false, true)), vec![ShaderDefVal::Bool(SHADING.into(), true)]);
    }

    #[test]
    fn blend_modes_map_to_fixed_function_state() {
        assert_eq!(blend_state(Blend::Disabled), None);
        let alpha = blend_state(Blend::Alpha).unwrap();
        assert_eq!(alpha.color.src_factor, BlendFactor::SrcAlpha);
        assert_eq!(alpha.alpha.dst_factor, BlendFactor::OneMinusSrcAlpha);
        let premultiplied = blend_state(Blend::Premultiplied).unwrap();
        assert_eq!(premultiplied.color.src_factor, BlendFactor::One);
        assert_eq!(premultiplied.color.dst_factor, BlendFactor::OneMinusSrcAlpha);
    }
}
