//! Render-target format fallback policy.
//!
//! Candidates are tried in a fixed order: precision outer (half float, float, byte),
//! channel layout inner (R, RG, RGBA). The first framebuffer-complete candidate wins;
//! if nothing is renderable the effect degrades to plain RGBA8.

use bevy::prelude::*;

use super::backend::{ChannelLayout, RenderBackend, TexelType, TextureFormat};

const LAYOUT_CHAIN: [ChannelLayout; 3] = [ChannelLayout::R, ChannelLayout::Rg, ChannelLayout::Rgba];
const TEXEL_CHAIN: [TexelType; 3] = [TexelType::HalfFloat, TexelType::Float, TexelType::UnsignedByte];

/// Ordered candidate list for a requested layout and precision.
pub fn format_candidates(layout: ChannelLayout, preferred: TexelType) -> Vec<TextureFormat> {
    let layout_start = LAYOUT_CHAIN.iter().position(|l| *l == layout).unwrap_or(0);
    let texel_start = TEXEL_CHAIN.iter().position(|t| *t == preferred).unwrap_or(0);
    TEXEL_CHAIN[texel_start..]
        .iter()
        .flat_map(|texel| {
            LAYOUT_CHAIN[layout_start..]
                .iter()
                .map(move |layout| TextureFormat::new(*layout, *texel))
        })
        .collect()
}

/// Probe candidates in order and return the first renderable one.
pub fn resolve_format<B: RenderBackend + ?Sized>(
    backend: &mut B,
    layout: ChannelLayout,
    preferred: TexelType,
) -> TextureFormat {
    for candidate in format_candidates(layout, preferred) {
        if backend.supports_render_format(candidate) {
            if candidate.internal != layout || candidate.texel != preferred {
                debug!(target: "fluid::formats", "{:?}/{:?} unsupported, using {:?}", layout, preferred, candidate);
            }
            return candidate;
        }
    }
    warn!(target: "fluid::formats", "no renderable format for {:?}; falling back to RGBA8", layout);
    TextureFormat::DEFAULT
}

/// Formats resolved once per context for the three field shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedFormats {
    pub rgba: TextureFormat,
    pub rg: TextureFormat,
    pub r: TextureFormat,
}

impl SupportedFormats {
    pub fn resolve<B: RenderBackend + ?Sized>(backend: &mut B) -> Self {
        let preferred = backend.capabilities().preferred_texel();
        if preferred != TexelType::HalfFloat {
            warn!(target: "fluid::formats", "half float textures unavailable, preferring {:?}", preferred);
        }
        Self {
            rgba: resolve_format(backend, ChannelLayout::Rgba, preferred),
            rg: resolve_format(backend, ChannelLayout::Rg, preferred),
            r: resolve_format(backend, ChannelLayout::R, preferred),
        }
    }
}
