//! Passthrough plane geometry

/// Strip order: bottom-left, bottom-right, top-left, top-right.
pub const QUAD_UVS: [f32; 8] = [
    0.0, 1.0, //
    1.0, 1.0, //
    0.0, 0.0, //
    1.0, 0.0,
];

/// Square centered at the origin, drawn as a 4-vertex triangle strip.
#[derive(Debug, Clone, PartialEq)]
pub struct PassthroughQuad {
    size: f32,
    vertices: [f32; 8],
}

impl PassthroughQuad {
    pub const DEFAULT_SIZE: f32 = 0.5;

    pub fn new(size: f32) -> Self {
        let mut quad = Self {
            size,
            vertices: [0.0; 8],
        };
        quad.rebuild();
        quad
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    /// `size` is the half-extent of the square.
    pub fn set_size(&mut self, size: f32) {
        if size == self.size {
            return;
        }
        self.size = size;
        self.rebuild();
    }

    pub fn vertices(&self) -> &[f32; 8] {
        &self.vertices
    }

    pub fn uvs(&self) -> &'static [f32; 8] {
        &QUAD_UVS
    }

    fn rebuild(&mut self) {
        let s = self.size;
        self.vertices = [
            -s, -s, // bottom left
            s, -s, // bottom right
            -s, s, // top left
            s, s, // top right
        ];
    }
}

impl Default for PassthroughQuad {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE)
    }
}
