//! Display composite of the dye field, to the canvas or to an offscreen capture.

use bevy::prelude::*;

use super::backend::{
    Blend, ChannelLayout, DrawTarget, Filtering, RenderBackend, TargetDesc, TargetId, TexelType, TextureFormat, UniformValue,
};
use super::error::FluidError;
use super::programs::ProgramRegistry;
use super::targets::{DoubleTarget, RenderTarget};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayParams {
    pub back_color: Vec3,
    pub transparent: bool,
    pub paused: bool,
}

impl DisplayParams {
    /// Straight alpha over the page while animating transparently, premultiplied otherwise.
    pub fn blend(&self) -> Blend {
        if self.transparent && !self.paused {
            Blend::Alpha
        } else {
            Blend::Premultiplied
        }
    }

    pub fn clear_color(&self) -> Vec4 {
        self.back_color.extend(if self.transparent { 0.0 } else { 1.0 })
    }
}

/// Draw the dye's current read buffer into `target` of `size` pixels.
pub fn render<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    dye: &DoubleTarget,
    target: DrawTarget,
    size: UVec2,
    params: &DisplayParams,
) -> Result<(), FluidError> {
    let mut values = vec![("u_texture", dye.read().sampler())];
    if programs.options.shading {
        let size = size.max(UVec2::ONE).as_vec2();
        values.push(("texel_size", UniformValue::Vec2(Vec2::ONE / size)));
    }
    programs
        .display
        .draw(backend, target, &values, params.blend(), Some(params.clear_color()))
}

/// An offscreen rendering of the dye as 8-bit RGBA, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Flip bottom-up texels into top-down RGBA8 rows.
pub fn texels_to_rgba8(texels: &[Vec4], size: UVec2) -> Vec<u8> {
    let (w, h) = (size.x as usize, size.y as usize);
    let mut rgba = Vec::with_capacity(w * h * 4);
    for row in (0..h).rev() {
        for texel in &texels[row * w..(row + 1) * w] {
            let bytes: [u8; 4] = [to_byte(texel.x), to_byte(texel.y), to_byte(texel.z), to_byte(texel.w)];
            rgba.extend_from_slice(&bytes);
        }
    }
    rgba
}

fn capture_desc(size: UVec2) -> TargetDesc {
    TargetDesc {
        width: size.x.max(1),
        height: size.y.max(1),
        format: TextureFormat::new(ChannelLayout::Rgba, TexelType::UnsignedByte),
        filtering: Filtering::Nearest,
    }
}

/// Render the dye into a temporary RGBA8 target of `size` and hand it to `export`
/// before the target is released.
pub fn render_capture<B: RenderBackend + ?Sized, R>(
    backend: &mut B,
    programs: &ProgramRegistry,
    dye: &DoubleTarget,
    size: UVec2,
    params: &DisplayParams,
    export: impl FnOnce(&B, TargetId) -> Result<R, FluidError>,
) -> Result<R, FluidError> {
    let desc = capture_desc(size);
    let target = RenderTarget::create(backend, desc)?;
    let result = render(backend, programs, dye, target.as_draw_target(), desc.size(), params)
        .and_then(|_| export(backend, target.id));
    target.release(backend);
    result.map_err(|e| match e {
        FluidError::Capture(_) => e,
        e => FluidError::Capture(e.to_string()),
    })
}

/// Render the dye offscreen and read it back synchronously.
pub fn capture<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    dye: &DoubleTarget,
    size: UVec2,
    params: &DisplayParams,
) -> Result<CapturedImage, FluidError> {
    let desc = capture_desc(size);
    let texels = render_capture(backend, programs, dye, size, params, |backend, id| {
        backend.read_pixels(DrawTarget::Target(id))
    })?;
    debug!(target: "fluid::render", "captured {}x{}", desc.width, desc.height);
    Ok(CapturedImage { width: desc.width, height: desc.height, rgba: texels_to_rgba8(&texels, desc.size()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(transparent: bool, paused: bool) -> DisplayParams {
        DisplayParams { back_color: Vec3::new(0.1, 0.2, 0.3), transparent, paused }
    }

    #[test]
    fn transparent_animation_uses_straight_alpha() {
        assert_eq!(params(true, false).blend(), Blend::Alpha);
        assert_eq!(params(true, true).blend(), Blend::Premultiplied);
        assert_eq!(params(false, false).blend(), Blend::Premultiplied);
    }

    #[test]
    fn opaque_background_has_full_alpha() {
        assert_eq!(params(false, false).clear_color().w, 1.0);
        assert_eq!(params(true, false).clear_color().w, 0.0);
    }

    #[test]
    fn readback_rows_are_flipped() {
        let texels = [Vec4::ZERO, Vec4::ONE];
        let rgba = texels_to_rgba8(&texels, UVec2::new(1, 2));
        assert_eq!(rgba, vec![255, 255, 255, 255, 0, 0, 0, 0]);
    }
}
