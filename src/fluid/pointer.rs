//! Pointer (mouse / touch) state and its translation into texture space.

use bevy::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerId {
    Mouse,
    Touch(u64),
}

/// One contact. Coordinates are normalized texture coordinates (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointer {
    pub id: PointerId,
    pub texcoord: Vec2,
    pub prev_texcoord: Vec2,
    pub delta: Vec2,
    pub down: bool,
    pub moved: bool,
    pub color: Vec3,
}

impl Pointer {
    fn new(id: PointerId) -> Self {
        Self {
            id,
            texcoord: Vec2::ZERO,
            prev_texcoord: Vec2::ZERO,
            delta: Vec2::ZERO,
            down: false,
            moved: false,
            color: Vec3::ZERO,
        }
    }
}

/// A directional splat owed to the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingSplat {
    pub point: Vec2,
    /// Aspect-corrected texcoord delta; scaled by the splat force when applied.
    pub delta: Vec2,
    pub color: Vec3,
}

pub fn aspect_ratio(canvas: UVec2) -> f32 {
    if canvas.y == 0 {
        return 1.0;
    }
    canvas.x as f32 / canvas.y as f32
}

/// Pixel position (origin top-left) to texture coordinate (origin bottom-left).
pub fn to_texcoord(position: Vec2, canvas: UVec2) -> Vec2 {
    let size = canvas.max(UVec2::ONE).as_vec2();
    Vec2::new(position.x / size.x, 1.0 - position.y / size.y)
}

/// Make equal pixel distances produce equal deltas on both axes.
pub fn correct_delta(delta: Vec2, aspect: f32) -> Vec2 {
    let mut d = delta;
    if aspect < 1.0 {
        d.x *= aspect;
    }
    if aspect > 1.0 {
        d.y /= aspect;
    }
    d
}

#[derive(Debug, Clone, Default)]
pub struct PointerSet {
    pointers: Vec<Pointer>,
}

impl PointerSet {
    pub fn get(&self, id: PointerId) -> Option<&Pointer> {
        self.pointers.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pointer> {
        self.pointers.iter()
    }

    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    fn entry(&mut self, id: PointerId) -> &mut Pointer {
        let index = match self.pointers.iter().position(|p| p.id == id) {
            Some(index) => index,
            None => {
                self.pointers.push(Pointer::new(id));
                self.pointers.len() - 1
            }
        };
        &mut self.pointers[index]
    }

    /// Register (or re-arm) a contact at `position`.
    pub fn press(&mut self, id: PointerId, position: Vec2, canvas: UVec2, color: Vec3) -> Pointer {
        let pointer = self.entry(id);
        pointer.down = true;
        pointer.moved = false;
        pointer.texcoord = to_texcoord(position, canvas);
        pointer.prev_texcoord = pointer.texcoord;
        pointer.delta = Vec2::ZERO;
        pointer.color = color;
        *pointer
    }

    /// Track a move. Mouse moves only count while the button is held; touch moves
    /// always do. Returns whether the pointer now owes a splat.
    pub fn move_to(&mut self, id: PointerId, position: Vec2, canvas: UVec2) -> bool {
        let held = self.get(id).map(|p| p.down).unwrap_or(false);
        if matches!(id, PointerId::Mouse) && !held {
            return false;
        }
        let aspect = aspect_ratio(canvas);
        let pointer = self.entry(id);
        pointer.prev_texcoord = pointer.texcoord;
        pointer.texcoord = to_texcoord(position, canvas);
        pointer.delta = correct_delta(pointer.texcoord - pointer.prev_texcoord, aspect);
        pointer.moved = pointer.delta.x.abs() > 0.0 || pointer.delta.y.abs() > 0.0;
        pointer.moved
    }

    /// End a contact: the mouse pointer is kept but released, touches are discarded.
    pub fn release(&mut self, id: PointerId) {
        match id {
            PointerId::Mouse => {
                if let Some(p) = self.pointers.iter_mut().find(|p| p.id == id) {
                    p.down = false;
                }
            }
            PointerId::Touch(_) => self.pointers.retain(|p| p.id != id),
        }
    }

    /// Consume every "moved" flag, yielding the splats they owe.
    pub fn drain_moved(&mut self) -> Vec<PendingSplat> {
        self.pointers
            .iter_mut()
            .filter(|p| p.moved)
            .map(|p| {
                p.moved = false;
                PendingSplat { point: p.texcoord, delta: p.delta, color: p.color }
            })
            .collect()
    }

    pub fn recolor(&mut self, mut next: impl FnMut() -> Vec3) {
        for pointer in &mut self.pointers {
            pointer.color = next();
        }
    }

    pub fn clear(&mut self) {
        self.pointers.clear();
    }
}
