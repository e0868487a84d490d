//! Texel storage with GPU-like quantisation and sampling.

use bevy::math::{UVec2, Vec2, Vec4};
use half::f16;

use crate::fluid::backend::{ChannelLayout, Filtering, TargetDesc, TexelType, TextureFormat};

/// One texture (and its framebuffer), stored bottom row first.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filtering: Filtering,
    texels: Vec<Vec4>,
}

fn quantize_channel(v: f32, texel: TexelType) -> f32 {
    match texel {
        TexelType::Float => v,
        TexelType::HalfFloat => f16::from_f32(v).to_f32(),
        TexelType::UnsignedByte => (v.clamp(0.0, 1.0) * 255.0).round() / 255.0,
    }
}

impl Texture {
    pub fn new(desc: &TargetDesc) -> Self {
        let mut texture = Self {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            filtering: desc.filtering,
            texels: Vec::new(),
        };
        texture.texels = vec![texture.quantize(Vec4::ZERO); (desc.width * desc.height) as usize];
        texture
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Round to the storage precision and drop channels the layout lacks
    /// (missing colour channels read back as 0, missing alpha as 1).
    pub fn quantize(&self, v: Vec4) -> Vec4 {
        let texel = self.format.texel;
        let q = Vec4::new(
            quantize_channel(v.x, texel),
            quantize_channel(v.y, texel),
            quantize_channel(v.z, texel),
            quantize_channel(v.w, texel),
        );
        match self.format.internal {
            ChannelLayout::R => Vec4::new(q.x, 0.0, 0.0, 1.0),
            ChannelLayout::Rg => Vec4::new(q.x, q.y, 0.0, 1.0),
            ChannelLayout::Rgba => q,
        }
    }

    pub fn texels(&self) -> &[Vec4] {
        &self.texels
    }

    pub fn fill(&mut self, value: Vec4) {
        let value = self.quantize(value);
        self.texels.iter_mut().for_each(|t| *t = value);
    }

    /// Store a whole frame of (unquantised) values.
    pub fn store_all(&mut self, values: Vec<Vec4>) {
        debug_assert_eq!(values.len(), self.texels.len());
        self.texels = values.into_iter().map(|v| self.quantize(v)).collect();
    }

    /// Texel at integer coordinates, clamped to the edge.
    pub fn fetch(&self, x: i32, y: i32) -> Vec4 {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.texels[(y * self.width + x) as usize]
    }

    /// Sample at a normalized coordinate with the texture's own filter.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let size = self.size().as_vec2();
        match self.filtering {
            Filtering::Nearest => {
                let p = (uv * size).floor();
                self.fetch(p.x as i32, p.y as i32)
            }
            Filtering::Linear => {
                let st = uv * size - 0.5;
                let i = st.floor();
                let f = st - i;
                let (x, y) = (i.x as i32, i.y as i32);
                let a = self.fetch(x, y);
                let b = self.fetch(x + 1, y);
                let c = self.fetch(x, y + 1);
                let d = self.fetch(x + 1, y + 1);
                a.lerp(b, f.x).lerp(c.lerp(d, f.x), f.y)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(layout: ChannelLayout, texel: TexelType, filtering: Filtering) -> TargetDesc {
        TargetDesc { width: 2, height: 1, format: TextureFormat::new(layout, texel), filtering }
    }

    #[test]
    fn single_channel_drops_green_and_reads_opaque() {
        let tex = Texture::new(&desc(ChannelLayout::R, TexelType::Float, Filtering::Nearest));
        assert_eq!(tex.quantize(Vec4::new(0.5, 0.7, 0.9, 0.1)), Vec4::new(0.5, 0.0, 0.0, 1.0));
    }

    #[test]
    fn bytes_clamp_and_round() {
        let tex = Texture::new(&desc(ChannelLayout::Rgba, TexelType::UnsignedByte, Filtering::Nearest));
        let q = tex.quantize(Vec4::new(-1.0, 2.0, 0.5, 1.0));
        assert_eq!(q.x, 0.0);
        assert_eq!(q.y, 1.0);
        assert!((q.z - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn half_float_loses_precision() {
        let tex = Texture::new(&desc(ChannelLayout::Rgba, TexelType::HalfFloat, Filtering::Nearest));
        let q = tex.quantize(Vec4::splat(1000.1));
        assert_eq!(q.x, 1000.0);
    }

    #[test]
    fn linear_sampling_blends_between_texel_centres() {
        let mut tex = Texture::new(&desc(ChannelLayout::Rgba, TexelType::Float, Filtering::Linear));
        tex.store_all(vec![Vec4::ZERO, Vec4::ONE]);
        assert_eq!(tex.sample(Vec2::new(0.5, 0.5)), Vec4::splat(0.5));
        assert_eq!(tex.sample(Vec2::new(0.25, 0.5)), Vec4::ZERO);
        assert_eq!(tex.sample(Vec2::new(-3.0, 0.5)), Vec4::ZERO, "clamp to edge");
    }

    #[test]
    fn nearest_sampling_picks_containing_texel() {
        let mut tex = Texture::new(&desc(ChannelLayout::Rgba, TexelType::Float, Filtering::Nearest));
        tex.store_all(vec![Vec4::ZERO, Vec4::ONE]);
        assert_eq!(tex.sample(Vec2::new(0.49, 0.5)), Vec4::ZERO);
        assert_eq!(tex.sample(Vec2::new(0.51, 0.5)), Vec4::ONE);
        assert_eq!(tex.sample(Vec2::new(7.0, 0.5)), Vec4::ONE);
    }
}
