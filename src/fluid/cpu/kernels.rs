//! Fragment programs of the software backend.
//!
//! Each kernel is evaluated once per destination texel at its centre UV, with the
//! four neighbour coordinates the base vertex stage would have produced.

use std::collections::HashMap;

use bevy::math::{Vec2, Vec3, Vec4, Vec4Swizzles};

use super::texture::Texture;
use crate::fluid::backend::{ShaderKind, TargetId, UniformValue, MANUAL_FILTERING, SHADING};
use crate::fluid::error::FluidError;
use crate::fluid::stepper::{dissipate, VELOCITY_LIMIT};

/// Uniform values bound for one draw, resolved against the backend's textures.
pub struct Inputs<'a> {
    values: HashMap<&'static str, UniformValue>,
    textures: &'a HashMap<TargetId, Texture>,
}

impl<'a> Inputs<'a> {
    pub fn new(values: HashMap<&'static str, UniformValue>, textures: &'a HashMap<TargetId, Texture>) -> Self {
        Self { values, textures }
    }

    // Unset scalar uniforms read as zero.
    fn float(&self, name: &'static str) -> Result<f32, FluidError> {
        match self.values.get(name) {
            None => Ok(0.0),
            Some(UniformValue::Float(v)) => Ok(*v),
            Some(_) => Err(FluidError::UniformType { name }),
        }
    }

    fn vec2(&self, name: &'static str) -> Result<Vec2, FluidError> {
        match self.values.get(name) {
            None => Ok(Vec2::ZERO),
            Some(UniformValue::Vec2(v)) => Ok(*v),
            Some(_) => Err(FluidError::UniformType { name }),
        }
    }

    fn vec3(&self, name: &'static str) -> Result<Vec3, FluidError> {
        match self.values.get(name) {
            None => Ok(Vec3::ZERO),
            Some(UniformValue::Vec3(v)) => Ok(*v),
            Some(_) => Err(FluidError::UniformType { name }),
        }
    }

    fn texture(&self, name: &'static str) -> Result<&'a Texture, FluidError> {
        match self.values.get(name) {
            Some(UniformValue::Texture(id)) => self.textures.get(id).ok_or(FluidError::UnknownTarget(*id)),
            _ => Err(FluidError::UniformType { name }),
        }
    }
}

enum Kernel<'a> {
    Copy { texture: &'a Texture },
    Clear { texture: &'a Texture, value: f32 },
    Splat { target: &'a Texture, aspect: f32, color: Vec3, point: Vec2, radius: f32 },
    Advection {
        velocity: &'a Texture,
        source: &'a Texture,
        dye_texel_size: Option<Vec2>,
        dt: f32,
        dissipation: f32,
    },
    Divergence { velocity: &'a Texture },
    Curl { velocity: &'a Texture },
    Vorticity { velocity: &'a Texture, curl_field: &'a Texture, curl: f32, dt: f32 },
    Pressure { pressure: &'a Texture, divergence: &'a Texture },
    GradientSubtract { pressure: &'a Texture, velocity: &'a Texture },
    Display { texture: &'a Texture, shading: bool },
}

/// A fragment program ready to be evaluated.
pub struct Fragment<'a> {
    kernel: Kernel<'a>,
    texel_size: Vec2,
}

/// Neighbour coordinates of the base vertex stage.
struct Stencil {
    c: Vec2,
    l: Vec2,
    r: Vec2,
    t: Vec2,
    b: Vec2,
}

impl Stencil {
    fn new(uv: Vec2, texel_size: Vec2) -> Self {
        Self {
            c: uv,
            l: uv - Vec2::new(texel_size.x, 0.0),
            r: uv + Vec2::new(texel_size.x, 0.0),
            t: uv + Vec2::new(0.0, texel_size.y),
            b: uv - Vec2::new(0.0, texel_size.y),
        }
    }
}

/// Manual bilinear interpolation through nearest-filtered fetches.
fn bilerp(texture: &Texture, uv: Vec2, tsize: Vec2) -> Vec4 {
    let st = uv / tsize - 0.5;
    let iuv = st.floor();
    let fuv = st - iuv;
    let a = texture.sample((iuv + Vec2::new(0.5, 0.5)) * tsize);
    let b = texture.sample((iuv + Vec2::new(1.5, 0.5)) * tsize);
    let c = texture.sample((iuv + Vec2::new(0.5, 1.5)) * tsize);
    let d = texture.sample((iuv + Vec2::new(1.5, 1.5)) * tsize);
    a.lerp(b, fuv.x).lerp(c.lerp(d, fuv.x), fuv.y)
}

impl<'a> Fragment<'a> {
    pub fn prepare(kind: ShaderKind, keywords: &[&'static str], inputs: &Inputs<'a>) -> Result<Self, FluidError> {
        let has = |k: &str| keywords.iter().any(|kw| *kw == k);
        let kernel = match kind {
            ShaderKind::BaseVertex => {
                return Err(FluidError::ProgramLink { program: kind, log: "vertex shader used as fragment".into() })
            }
            ShaderKind::Copy => Kernel::Copy { texture: inputs.texture("u_texture")? },
            ShaderKind::Clear => Kernel::Clear { texture: inputs.texture("u_texture")?, value: inputs.float("value")? },
            ShaderKind::Splat => Kernel::Splat {
                target: inputs.texture("u_target")?,
                aspect: inputs.float("aspect_ratio")?,
                color: inputs.vec3("color")?,
                point: inputs.vec2("point")?,
                radius: inputs.float("radius")?,
            },
            ShaderKind::Advection => Kernel::Advection {
                velocity: inputs.texture("u_velocity")?,
                source: inputs.texture("u_source")?,
                dye_texel_size: if has(MANUAL_FILTERING) { Some(inputs.vec2("dye_texel_size")?) } else { None },
                dt: inputs.float("dt")?,
                dissipation: inputs.float("dissipation")?,
            },
            ShaderKind::Divergence => Kernel::Divergence { velocity: inputs.texture("u_velocity")? },
            ShaderKind::Curl => Kernel::Curl { velocity: inputs.texture("u_velocity")? },
            ShaderKind::Vorticity => Kernel::Vorticity {
                velocity: inputs.texture("u_velocity")?,
                curl_field: inputs.texture("u_curl")?,
                curl: inputs.float("curl")?,
                dt: inputs.float("dt")?,
            },
            ShaderKind::Pressure => Kernel::Pressure {
                pressure: inputs.texture("u_pressure")?,
                divergence: inputs.texture("u_divergence")?,
            },
            ShaderKind::GradientSubtract => Kernel::GradientSubtract {
                pressure: inputs.texture("u_pressure")?,
                velocity: inputs.texture("u_velocity")?,
            },
            ShaderKind::Display => Kernel::Display { texture: inputs.texture("u_texture")?, shading: has(SHADING) },
        };
        Ok(Self { kernel, texel_size: inputs.vec2("texel_size")? })
    }

    pub fn shade(&self, uv: Vec2) -> Vec4 {
        let s = Stencil::new(uv, self.texel_size);
        match &self.kernel {
            Kernel::Copy { texture } => texture.sample(s.c),
            Kernel::Clear { texture, value } => texture.sample(s.c) * *value,
            Kernel::Splat { target, aspect, color, point, radius } => {
                let mut p = s.c - *point;
                p.x *= aspect;
                let splat = (-p.dot(p) / radius).exp() * *color;
                (target.sample(s.c).xyz() + splat).extend(1.0)
            }
            Kernel::Advection { velocity, source, dye_texel_size, dt, dissipation } => {
                let result = match dye_texel_size {
                    Some(dye_texel_size) => {
                        let v = bilerp(velocity, s.c, self.texel_size).xy();
                        bilerp(source, s.c - *dt * v * self.texel_size, *dye_texel_size)
                    }
                    None => {
                        let v = velocity.sample(s.c).xy();
                        source.sample(s.c - *dt * v * self.texel_size)
                    }
                };
                Vec4::from_array(result.to_array().map(|c| dissipate(c, *dissipation, *dt)))
            }
            Kernel::Divergence { velocity } => {
                let c = velocity.sample(s.c).xy();
                let l = if s.l.x < 0.0 { -c.x } else { velocity.sample(s.l).x };
                let r = if s.r.x > 1.0 { -c.x } else { velocity.sample(s.r).x };
                let t = if s.t.y > 1.0 { -c.y } else { velocity.sample(s.t).y };
                let b = if s.b.y < 0.0 { -c.y } else { velocity.sample(s.b).y };
                Vec4::new(0.5 * (r - l + t - b), 0.0, 0.0, 1.0)
            }
            Kernel::Curl { velocity } => {
                let l = velocity.sample(s.l).y;
                let r = velocity.sample(s.r).y;
                let t = velocity.sample(s.t).x;
                let b = velocity.sample(s.b).x;
                Vec4::new(0.5 * (r - l - t + b), 0.0, 0.0, 1.0)
            }
            Kernel::Vorticity { velocity, curl_field, curl, dt } => {
                let l = curl_field.sample(s.l).x;
                let r = curl_field.sample(s.r).x;
                let t = curl_field.sample(s.t).x;
                let b = curl_field.sample(s.b).x;
                let c = curl_field.sample(s.c).x;
                let mut force = 0.5 * Vec2::new(t.abs() - b.abs(), r.abs() - l.abs());
                force /= force.length() + 0.0001;
                force *= curl * c;
                force.y = -force.y;
                let v = velocity.sample(s.c).xy() + force * *dt;
                v.clamp(Vec2::splat(-VELOCITY_LIMIT), Vec2::splat(VELOCITY_LIMIT)).extend(0.0).extend(1.0)
            }
            Kernel::Pressure { pressure, divergence } => {
                let l = pressure.sample(s.l).x;
                let r = pressure.sample(s.r).x;
                let t = pressure.sample(s.t).x;
                let b = pressure.sample(s.b).x;
                let div = divergence.sample(s.c).x;
                Vec4::new((l + r + b + t - div) * 0.25, 0.0, 0.0, 1.0)
            }
            Kernel::GradientSubtract { pressure, velocity } => {
                let l = pressure.sample(s.l).x;
                let r = pressure.sample(s.r).x;
                let t = pressure.sample(s.t).x;
                let b = pressure.sample(s.b).x;
                let v = velocity.sample(s.c).xy() - Vec2::new(r - l, t - b);
                v.extend(0.0).extend(1.0)
            }
            Kernel::Display { texture, shading } => {
                let mut c = texture.sample(s.c).xyz();
                if *shading {
                    let dx = texture.sample(s.r).xyz().length() - texture.sample(s.l).xyz().length();
                    let dy = texture.sample(s.t).xyz().length() - texture.sample(s.b).xyz().length();
                    let n = Vec3::new(dx, dy, self.texel_size.length()).normalize_or_zero();
                    let diffuse = (n.dot(Vec3::Z) + 0.7).clamp(0.7, 1.0);
                    c *= diffuse;
                }
                c.extend(c.max_element())
            }
        }
    }
}
