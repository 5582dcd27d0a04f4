//! The five per-panel pixel layers.
//!
//! Each layer owns its own [`PixelBuffer`]. Moving pixels between layers
//! always copies, so mutating one layer can never show through another.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, PixelBuffer};

/// Logical layer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    /// The installed input image. A load or an alignment writes here;
    /// the render layer is rebuilt from it when the panel is dirty.
    Control,
    /// Annotation overlay (control-point markers), sized like `Data`.
    Markup,
    /// The visible window onto `Render`.
    Data,
    /// Full-resolution source of truth.
    Render,
    /// Static background, sized to the configured canvas.
    Base,
}

impl LayerKind {
    /// Every layer.
    pub const ALL: [Self; 5] = [
        Self::Control,
        Self::Markup,
        Self::Data,
        Self::Render,
        Self::Base,
    ];

    const fn index(self) -> usize {
        match self {
            Self::Control => 0,
            Self::Markup => 1,
            Self::Data => 2,
            Self::Render => 3,
            Self::Base => 4,
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Control => "control",
            Self::Markup => "markup",
            Self::Data => "data",
            Self::Render => "render",
            Self::Base => "base",
        };
        f.write_str(name)
    }
}

/// Opaque white background for the base layer.
pub const BASE_FILL: [u8; 4] = [255, 255, 255, 255];

/// One buffer per [`LayerKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerStack {
    layers: [PixelBuffer; 5],
}

impl LayerStack {
    /// A stack with a filled `base_dims` background and empty image
    /// layers.
    #[must_use]
    pub fn new(base_dims: Dimensions) -> Self {
        let mut stack = Self {
            layers: std::array::from_fn(|_| PixelBuffer::new(0, 0)),
        };
        stack.reset_base(base_dims);
        stack
    }

    /// Borrow a layer.
    #[must_use]
    pub const fn get(&self, kind: LayerKind) -> &PixelBuffer {
        &self.layers[kind.index()]
    }

    /// Mutably borrow a layer.
    pub const fn get_mut(&mut self, kind: LayerKind) -> &mut PixelBuffer {
        &mut self.layers[kind.index()]
    }

    /// Current size of a layer.
    #[must_use]
    pub const fn dims(&self, kind: LayerKind) -> Dimensions {
        self.get(kind).dimensions()
    }

    /// Install `buffer` as `kind`, returning the previous contents.
    pub fn replace(&mut self, kind: LayerKind, buffer: PixelBuffer) -> PixelBuffer {
        std::mem::replace(self.get_mut(kind), buffer)
    }

    /// Copy layer `from` into layer `to`.
    pub fn copy_layer(&mut self, from: LayerKind, to: LayerKind) {
        if from != to {
            let copy = self.get(from).clone();
            self.replace(to, copy);
        }
    }

    /// Replace `kind` with a transparent buffer of `dims`.
    pub fn clear_to(&mut self, kind: LayerKind, dims: Dimensions) {
        self.replace(kind, PixelBuffer::new(dims.width, dims.height));
    }

    /// Refill the background at `dims`.
    pub fn reset_base(&mut self, dims: Dimensions) {
        self.replace(
            LayerKind::Base,
            PixelBuffer::filled(dims.width, dims.height, BASE_FILL),
        );
    }

    /// Drop every image layer, keeping only the background.
    pub fn clear_images(&mut self) {
        for kind in LayerKind::ALL {
            if kind != LayerKind::Base {
                self.clear_to(kind, Dimensions::default());
            }
        }
    }
}
