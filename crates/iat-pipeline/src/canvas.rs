//! Layered canvas pipeline: the per-panel load state machine and the
//! operations it permits.
//!
//! ```text
//!   Empty ──begin_load──▶ Loading ──finish_load(Ok)──▶ Loaded ◀─┐
//!     ▲                      │                            │     │ redraw / reset / erase /
//!     │                      └──finish_load(Err)──▶ Error │     │ draw / pan / save / magnify
//!     └────────── any layer operation ─────────────────┘    └─────┘
//! ```
//!
//! The render layer is the single source of truth for a panel. Every
//! mutation goes through a `&mut self` method here, so two in-flight
//! operations can never touch it at once.

use image::Rgba;
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::control_points::ControlPointManager;
use crate::coords::Viewport;
use crate::encode::{self, SaveFormat};
use crate::layers::{LayerKind, LayerStack};
use crate::types::{Dimensions, IatError, PixelBuffer, Point};

/// Marker color for unselected control points.
const MARKER_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Marker color for the selected control point.
const SELECTED_COLOR: Rgba<u8> = Rgba([0, 200, 255, 255]);

/// Loader state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoadState {
    /// No image.
    Empty,
    /// A load is in flight. Only the completion carrying the same
    /// generation may finish it.
    Loading {
        /// Generation of the in-flight request.
        generation: u64,
    },
    /// An image is installed and layer operations are permitted.
    Loaded,
    /// The last load failed. The next layer operation reports this
    /// error once and returns the canvas to [`Empty`](Self::Empty).
    Error(IatError),
}

/// Whole-pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelOffset {
    /// Columns from the left.
    pub x: u32,
    /// Rows from the top.
    pub y: u32,
}

impl PixelOffset {
    /// Offset of `(x, y)` pixels.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// The same position as a [`Point`].
    #[must_use]
    pub fn to_point(self) -> Point {
        Point::new(f64::from(self.x), f64::from(self.y))
    }
}

/// Panel geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Geometry {
    /// Canvas (base layer) size.
    pub base_dims: Dimensions,
    /// Visible window size, never larger than `base_dims` or
    /// `render_dims`.
    pub data_dims: Dimensions,
    /// Native size of the loaded image.
    pub source_dims: Dimensions,
    /// Size of the render layer.
    pub render_dims: Dimensions,
    /// Render-layer position shown at the window's top-left corner.
    pub offset: PixelOffset,
    /// Canvas position of the window's top-left corner.
    pub origin: PixelOffset,
}

impl Geometry {
    fn empty(base_dims: Dimensions) -> Self {
        Self {
            base_dims,
            ..Self::default()
        }
    }

    /// Shrink the window to fit, pull the offset back inside the render
    /// layer and center the window on the canvas.
    fn clamp(&mut self) {
        self.data_dims = self.render_dims.min(self.base_dims);
        self.offset.x = self.offset.x.min(self.render_dims.width - self.data_dims.width);
        self.offset.y = self.offset.y.min(self.render_dims.height - self.data_dims.height);
        self.origin = PixelOffset::new(
            (self.base_dims.width - self.data_dims.width) / 2,
            (self.base_dims.height - self.data_dims.height) / 2,
        );
    }

    /// Canvas/image mapping for the current window.
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.origin.to_point(), self.offset.to_point())
    }
}

/// A layer operation, dispatched by [`Canvas::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PanelOp {
    /// Repaint the visible window, reloading a dirty render layer first.
    Redraw,
    /// Restore the default window and drop every control point.
    Reset,
    /// Clear the annotation overlay.
    Erase,
    /// Repaint control-point markers onto the overlay.
    Draw,
    /// Encode the render layer.
    Save {
        /// Output container.
        format: SaveFormat,
        /// `0.0..=1.0`, used by JPEG.
        quality: f64,
    },
}

/// What a [`PanelOp`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutput {
    /// Layers were updated in place.
    Done,
    /// Encoded bytes from [`PanelOp::Save`].
    Encoded(Vec<u8>),
}

/// Layer stack plus loader state machine for one panel.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    state: LoadState,
    layers: LayerStack,
    geometry: Geometry,
    dirty: bool,
}

impl Canvas {
    /// An empty canvas with a `base_dims` background.
    #[must_use]
    pub fn new(base_dims: Dimensions) -> Self {
        Self {
            state: LoadState::Empty,
            layers: LayerStack::new(base_dims),
            geometry: Geometry::empty(base_dims),
            dirty: false,
        }
    }

    /// Current load state.
    #[must_use]
    pub const fn state(&self) -> &LoadState {
        &self.state
    }

    /// `true` in the `Loaded` state.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self.state, LoadState::Loaded)
    }

    /// Current geometry.
    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// `true` when the render layer is stale with respect to the
    /// installed input.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// All five layers.
    #[must_use]
    pub const fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// The full-resolution render layer.
    #[must_use]
    pub const fn render(&self) -> &PixelBuffer {
        self.layers.get(LayerKind::Render)
    }

    // ───────────────────────── Load transitions ─────────────────────────

    /// Enter `Loading` for request `generation`.
    ///
    /// Allowed from every state except `Loading`; a load from `Loaded`
    /// or `Error` replaces the current image when it completes.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::LoadInFlight`] if a load is already running.
    pub fn begin_load(&mut self, generation: u64) -> Result<(), IatError> {
        if matches!(self.state, LoadState::Loading { .. }) {
            return Err(IatError::LoadInFlight);
        }
        tracing::debug!(generation, "canvas loading");
        self.state = LoadState::Loading { generation };
        Ok(())
    }

    /// Generation of the in-flight load, if any.
    #[must_use]
    pub const fn loading_generation(&self) -> Option<u64> {
        match self.state {
            LoadState::Loading { generation } => Some(generation),
            _ => None,
        }
    }

    /// Complete the in-flight load.
    ///
    /// On success the decoded buffer becomes both the input and the
    /// render layer and the window is repainted. On failure every image
    /// layer is discarded and the canvas enters `Error`.
    ///
    /// # Errors
    ///
    /// Returns the load error unchanged.
    /// Returns [`IatError::EmptyInput`] for a zero-sized buffer.
    pub fn finish_load(&mut self, result: Result<PixelBuffer, IatError>) -> Result<(), IatError> {
        let buffer = result.and_then(|b| {
            if b.dimensions().is_empty() {
                Err(IatError::EmptyInput)
            } else {
                Ok(b)
            }
        });
        match buffer {
            Ok(buffer) => {
                let dims = buffer.dimensions();
                self.layers.replace(LayerKind::Control, buffer);
                self.layers.copy_layer(LayerKind::Control, LayerKind::Render);
                self.geometry = Geometry {
                    source_dims: dims,
                    render_dims: dims,
                    ..Geometry::empty(self.geometry.base_dims)
                };
                self.geometry.clamp();
                self.dirty = false;
                self.state = LoadState::Loaded;
                self.repaint();
                self.layers.clear_to(LayerKind::Markup, self.geometry.data_dims);
                tracing::debug!(
                    width = dims.width,
                    height = dims.height,
                    data_width = self.geometry.data_dims.width,
                    data_height = self.geometry.data_dims.height,
                    "canvas loaded"
                );
                Ok(())
            }
            Err(err) => Err(self.fail_load(err)),
        }
    }

    /// Discard every image layer and enter `Error`. Returns `err` for
    /// the caller to surface.
    pub fn fail_load(&mut self, err: IatError) -> IatError {
        self.discard();
        tracing::debug!(%err, "canvas load failed");
        self.state = LoadState::Error(err.clone());
        err
    }

    /// Drop every image layer and return to `Empty`.
    pub fn clear(&mut self) {
        self.discard();
        self.state = LoadState::Empty;
    }

    fn discard(&mut self) {
        self.layers.clear_images();
        self.geometry = Geometry::empty(self.geometry.base_dims);
        self.dirty = false;
    }

    /// Gate for layer operations.
    pub(crate) fn ensure_loaded(&mut self) -> Result<(), IatError> {
        match std::mem::replace(&mut self.state, LoadState::Empty) {
            LoadState::Loaded => {
                self.state = LoadState::Loaded;
                Ok(())
            }
            LoadState::Empty => Err(IatError::EmptyInput),
            LoadState::Loading { generation } => {
                self.state = LoadState::Loading { generation };
                Err(IatError::LoadInFlight)
            }
            LoadState::Error(err) => {
                tracing::debug!(%err, "canvas error reported, now empty");
                Err(err)
            }
        }
    }

    // ───────────────────────── Layer operations ─────────────────────────

    /// Dispatch a [`PanelOp`].
    ///
    /// `points` supplies the markers for [`PanelOp::Draw`] and is
    /// cleared by [`PanelOp::Reset`]. `hit_radius` sizes the markers.
    ///
    /// # Errors
    ///
    /// See the individual operations.
    pub fn apply(
        &mut self,
        op: PanelOp,
        points: &mut ControlPointManager,
        hit_radius: f64,
    ) -> Result<OpOutput, IatError> {
        match op {
            PanelOp::Redraw => self.redraw()?,
            PanelOp::Reset => {
                self.reset()?;
                points.clear();
            }
            PanelOp::Erase => self.erase()?,
            PanelOp::Draw => self.draw(points, hit_radius)?,
            PanelOp::Save { format, quality } => {
                return self.save(format, quality).map(OpOutput::Encoded);
            }
        }
        Ok(OpOutput::Done)
    }

    /// Repaint the window from the render layer, reloading the render
    /// layer from the input first if it is stale.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::EmptyInput`] with no image loaded,
    /// [`IatError::LoadInFlight`] while loading, or the stored error in
    /// the `Error` state.
    pub fn redraw(&mut self) -> Result<(), IatError> {
        self.ensure_loaded()?;
        self.refresh_render();
        self.repaint();
        Ok(())
    }

    /// Restore the default window: zero offset, data dims clamped to the
    /// canvas, overlay cleared.
    ///
    /// # Errors
    ///
    /// As for [`redraw`](Self::redraw).
    pub fn reset(&mut self) -> Result<(), IatError> {
        self.ensure_loaded()?;
        self.refresh_render();
        self.geometry.offset = PixelOffset::default();
        self.geometry.clamp();
        self.repaint();
        self.layers.clear_to(LayerKind::Markup, self.geometry.data_dims);
        Ok(())
    }

    /// Clear the annotation overlay, leaving image layers untouched.
    ///
    /// # Errors
    ///
    /// As for [`redraw`](Self::redraw).
    pub fn erase(&mut self) -> Result<(), IatError> {
        self.ensure_loaded()?;
        self.layers.clear_to(LayerKind::Markup, self.geometry.data_dims);
        Ok(())
    }

    /// Repaint the overlay with a cross and a hollow square of
    /// half-width `hit_radius` at every control point inside the window.
    ///
    /// # Errors
    ///
    /// As for [`redraw`](Self::redraw).
    pub fn draw(&mut self, points: &ControlPointManager, hit_radius: f64) -> Result<(), IatError> {
        self.ensure_loaded()?;
        let dims = self.geometry.data_dims;
        let offset = self.geometry.offset.to_point();
        let mut overlay = PixelBuffer::new(dims.width, dims.height).into_rgba_image();

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let side = (2.0 * hit_radius).round().max(1.0) as u32;
        let half = i32::try_from(side / 2).unwrap_or(i32::MAX);

        let reach = f64::from(half);
        let (max_x, max_y) = (
            f64::from(dims.width) + reach,
            f64::from(dims.height) + reach,
        );

        for (i, p) in points.points().iter().enumerate() {
            let (wx, wy) = ((p.x - offset.x).round(), (p.y - offset.y).round());
            // Markers whose square misses the window are not drawn; this
            // also keeps the casts below in range.
            if !(-reach..=max_x).contains(&wx) || !(-reach..=max_y).contains(&wy) {
                continue;
            }
            let color = if points.selected() == Some(i) {
                SELECTED_COLOR
            } else {
                MARKER_COLOR
            };
            #[allow(clippy::cast_possible_truncation)]
            let (x, y) = (wx as i32, wy as i32);
            draw_cross_mut(&mut overlay, color, x, y);
            draw_hollow_rect_mut(
                &mut overlay,
                Rect::at(x.saturating_sub(half), y.saturating_sub(half)).of_size(side, side),
                color,
            );
        }

        self.layers
            .replace(LayerKind::Markup, PixelBuffer::from(overlay));
        Ok(())
    }

    /// Encode the render layer.
    ///
    /// # Errors
    ///
    /// As for [`redraw`](Self::redraw), plus the [`encode::encode`]
    /// errors.
    pub fn save(&mut self, format: SaveFormat, quality: f64) -> Result<Vec<u8>, IatError> {
        self.ensure_loaded()?;
        self.refresh_render();
        encode::encode(self.render(), format, quality)
    }

    /// Scroll the window by `(dx, dy)` render pixels, clamped so it
    /// stays inside the render layer.
    ///
    /// # Errors
    ///
    /// As for [`redraw`](Self::redraw).
    pub fn pan(&mut self, dx: i64, dy: i64) -> Result<(), IatError> {
        self.ensure_loaded()?;
        let shift = |v: u32, d: i64| {
            u32::try_from((i64::from(v) + d).max(0)).unwrap_or(u32::MAX)
        };
        self.geometry.offset = PixelOffset::new(
            shift(self.geometry.offset.x, dx),
            shift(self.geometry.offset.y, dy),
        );
        self.geometry.clamp();
        self.repaint();
        Ok(())
    }

    /// Flatten base, window and overlay into one canvas-sized buffer.
    ///
    /// An empty canvas composes to the bare background.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::LoadInFlight`] while loading, or the stored
    /// error in the `Error` state.
    pub fn compose(&mut self) -> Result<PixelBuffer, IatError> {
        match self.ensure_loaded() {
            Ok(()) | Err(IatError::EmptyInput) => {}
            Err(err) => return Err(err),
        }
        let mut out = self.layers.get(LayerKind::Base).clone().into_rgba_image();
        let (x, y) = (
            i64::from(self.geometry.origin.x),
            i64::from(self.geometry.origin.y),
        );
        for kind in [LayerKind::Data, LayerKind::Markup] {
            let layer = self.layers.get(kind);
            if !layer.dimensions().is_empty() {
                image::imageops::overlay(&mut out, &layer.clone().into_rgba_image(), x, y);
            }
        }
        Ok(PixelBuffer::from(out))
    }

    /// A `size` patch of the render layer centred on image point
    /// `center`, enlarged `zoom` times with nearest-neighbour sampling.
    ///
    /// # Errors
    ///
    /// As for [`redraw`](Self::redraw), plus
    /// [`IatError::InvalidConfig`] for a non-positive `zoom`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn magnify(
        &mut self,
        center: Point,
        zoom: f64,
        size: Dimensions,
    ) -> Result<PixelBuffer, IatError> {
        self.ensure_loaded()?;
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(IatError::InvalidConfig(format!(
                "zoom must be positive, got {zoom}"
            )));
        }
        let render = self.render();
        let (rw, rh) = (f64::from(render.width()), f64::from(render.height()));
        let half_w = f64::from(size.width) / 2.0;
        let half_h = f64::from(size.height) / 2.0;

        let mut out = PixelBuffer::new(size.width, size.height);
        for j in 0..size.height {
            let v = ((f64::from(j) - half_h) / zoom + center.y).floor();
            for i in 0..size.width {
                let u = ((f64::from(i) - half_w) / zoom + center.x).floor();
                if u >= 0.0 && v >= 0.0 && u < rw && v < rh {
                    if let Some(px) = render.pixel(u as u32, v as u32) {
                        out.put_pixel(i, j, px);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Install `buffer` as the panel's input and mark the render layer
    /// stale. The next redraw, reset or save picks it up.
    ///
    /// # Errors
    ///
    /// As for [`redraw`](Self::redraw), plus [`IatError::EmptyInput`]
    /// for a zero-sized buffer.
    pub fn install_input(&mut self, buffer: PixelBuffer) -> Result<(), IatError> {
        self.ensure_loaded()?;
        if buffer.dimensions().is_empty() {
            return Err(IatError::EmptyInput);
        }
        self.layers.replace(LayerKind::Control, buffer);
        self.dirty = true;
        Ok(())
    }

    // ───────────────────────── Internals ─────────────────────────

    fn refresh_render(&mut self) {
        if !self.dirty {
            return;
        }
        self.layers.copy_layer(LayerKind::Control, LayerKind::Render);
        self.geometry.render_dims = self.layers.dims(LayerKind::Render);
        self.geometry.clamp();
        if self.layers.dims(LayerKind::Markup) != self.geometry.data_dims {
            self.layers.clear_to(LayerKind::Markup, self.geometry.data_dims);
        }
        self.dirty = false;
        tracing::debug!("render layer reloaded from input");
    }

    fn repaint(&mut self) {
        let g = self.geometry;
        let window = self
            .layers
            .get(LayerKind::Render)
            .crop(g.offset.x, g.offset.y, g.data_dims);
        self.layers.replace(LayerKind::Data, window);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Pixel `(x, y)` is `[x, y, 0, 255]`.
    fn gradient(width: u32, height: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                buf.put_pixel(
                    x,
                    y,
                    [u8::try_from(x % 256).unwrap(), u8::try_from(y % 256).unwrap(), 0, 255],
                );
            }
        }
        buf
    }

    fn loaded(base: Dimensions, image: PixelBuffer) -> Canvas {
        let mut canvas = Canvas::new(base);
        canvas.begin_load(1).unwrap();
        canvas.finish_load(Ok(image)).unwrap();
        canvas
    }

    #[test]
    fn load_sets_geometry_and_paints_window() {
        let canvas = loaded(Dimensions::new(20, 10), gradient(30, 8));
        let g = canvas.geometry();
        assert_eq!(canvas.state(), &LoadState::Loaded);
        assert_eq!(g.source_dims, Dimensions::new(30, 8));
        assert_eq!(g.render_dims, Dimensions::new(30, 8));
        assert_eq!(g.data_dims, Dimensions::new(20, 8));
        assert_eq!(g.origin, PixelOffset::new(0, 1));
        let data = canvas.layers().get(LayerKind::Data);
        assert_eq!(data.dimensions(), Dimensions::new(20, 8));
        assert_eq!(data.pixel(19, 7), Some([19, 7, 0, 255]));
        assert_eq!(
            canvas.layers().dims(LayerKind::Markup),
            Dimensions::new(20, 8)
        );
    }

    #[test]
    fn second_load_while_loading_is_rejected() {
        let mut canvas = Canvas::new(Dimensions::new(10, 10));
        canvas.begin_load(1).unwrap();
        assert_eq!(canvas.begin_load(2), Err(IatError::LoadInFlight));
        assert_eq!(canvas.loading_generation(), Some(1));
        assert_eq!(canvas.redraw(), Err(IatError::LoadInFlight));
        assert_eq!(canvas.loading_generation(), Some(1));
    }

    #[test]
    fn reload_from_loaded_replaces_image() {
        let mut canvas = loaded(Dimensions::new(10, 10), gradient(4, 4));
        canvas.begin_load(2).unwrap();
        canvas.finish_load(Ok(gradient(6, 5))).unwrap();
        assert_eq!(canvas.geometry().source_dims, Dimensions::new(6, 5));
    }

    #[test]
    fn failed_load_reports_once_then_empty() {
        let mut canvas = loaded(Dimensions::new(10, 10), gradient(4, 4));
        canvas.begin_load(2).unwrap();
        let err = canvas.finish_load(Err(IatError::CompressionUnsupported(5)));
        assert_eq!(err, Err(IatError::CompressionUnsupported(5)));
        assert_eq!(
            canvas.state(),
            &LoadState::Error(IatError::CompressionUnsupported(5))
        );
        assert!(canvas.render().dimensions().is_empty());

        assert_eq!(canvas.erase(), Err(IatError::CompressionUnsupported(5)));
        assert_eq!(canvas.state(), &LoadState::Empty);
        assert_eq!(canvas.erase(), Err(IatError::EmptyInput));
    }

    #[test]
    fn zero_sized_image_fails_load() {
        let mut canvas = Canvas::new(Dimensions::new(10, 10));
        canvas.begin_load(1).unwrap();
        assert_eq!(
            canvas.finish_load(Ok(PixelBuffer::new(0, 3))),
            Err(IatError::EmptyInput)
        );
    }

    #[test]
    fn operations_on_empty_canvas_fail() {
        let mut canvas = Canvas::new(Dimensions::new(10, 10));
        assert_eq!(canvas.redraw(), Err(IatError::EmptyInput));
        assert_eq!(
            canvas.save(SaveFormat::Png, 1.0),
            Err(IatError::EmptyInput)
        );
        assert_eq!(canvas.state(), &LoadState::Empty);
    }

    #[test]
    fn pan_clamps_to_render_layer() {
        let mut canvas = loaded(Dimensions::new(10, 10), gradient(30, 30));
        canvas.pan(5, 7).unwrap();
        assert_eq!(canvas.geometry().offset, PixelOffset::new(5, 7));
        assert_eq!(
            canvas.layers().get(LayerKind::Data).pixel(0, 0),
            Some([5, 7, 0, 255])
        );
        canvas.pan(100, -100).unwrap();
        assert_eq!(canvas.geometry().offset, PixelOffset::new(20, 0));
    }

    #[test]
    fn reset_restores_default_window_and_clears_points() {
        let mut canvas = loaded(Dimensions::new(10, 10), gradient(30, 30));
        let mut points = ControlPointManager::new(4);
        points.add_or_select(Point::new(3.0, 3.0), 2.0).unwrap();
        canvas.pan(8, 8).unwrap();
        canvas.apply(PanelOp::Reset, &mut points, 2.0).unwrap();
        assert_eq!(canvas.geometry().offset, PixelOffset::default());
        assert!(points.is_empty());
    }

    #[test]
    fn draw_then_erase_touches_only_markup() {
        let mut canvas = loaded(Dimensions::new(40, 40), gradient(40, 40));
        let mut points = ControlPointManager::new(4);
        points.add_or_select(Point::new(10.0, 10.0), 3.0).unwrap();
        points.add_or_select(Point::new(30.0, 20.0), 3.0).unwrap();
        let data_before = canvas.layers().get(LayerKind::Data).clone();

        canvas.apply(PanelOp::Draw, &mut points, 3.0).unwrap();
        let markup = canvas.layers().get(LayerKind::Markup);
        assert_eq!(markup.pixel(10, 10), Some(MARKER_COLOR.0));
        // Selected point is the last one added.
        assert_eq!(markup.pixel(30, 20), Some(SELECTED_COLOR.0));
        assert_eq!(markup.pixel(0, 39), Some(PixelBuffer::TRANSPARENT));

        canvas.apply(PanelOp::Erase, &mut points, 3.0).unwrap();
        assert!(canvas
            .layers()
            .get(LayerKind::Markup)
            .as_raw()
            .iter()
            .all(|&b| b == 0));
        assert_eq!(canvas.layers().get(LayerKind::Data), &data_before);
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn markers_follow_the_window_offset() {
        let mut canvas = loaded(Dimensions::new(10, 10), gradient(30, 30));
        canvas.pan(10, 10).unwrap();
        let mut points = ControlPointManager::new(4);
        points.add_or_select(Point::new(15.0, 14.0), 1.0).unwrap();
        canvas.draw(&points, 1.0).unwrap();
        assert_eq!(
            canvas.layers().get(LayerKind::Markup).pixel(5, 4),
            Some(SELECTED_COLOR.0)
        );
    }

    #[test]
    fn far_off_window_markers_are_skipped() {
        let mut canvas = loaded(Dimensions::new(40, 40), gradient(40, 40));
        let mut points = ControlPointManager::new(4);
        points.add_or_select(Point::new(3.0e9, 10.0), 3.0).unwrap();
        points.add_or_select(Point::new(-5.0e9, -5.0e9), 3.0).unwrap();
        canvas.draw(&points, 3.0).unwrap();
        assert!(canvas
            .layers()
            .get(LayerKind::Markup)
            .as_raw()
            .iter()
            .all(|&b| b == 0));

        // Centre just past the right edge: the square's left side shows.
        points.add_or_select(Point::new(42.0, 20.0), 3.0).unwrap();
        canvas.draw(&points, 3.0).unwrap();
        assert_eq!(
            canvas.layers().get(LayerKind::Markup).pixel(39, 20),
            Some(SELECTED_COLOR.0)
        );
    }

    #[test]
    fn dirty_input_is_picked_up_by_redraw() {
        let mut canvas = loaded(Dimensions::new(10, 10), gradient(8, 8));
        canvas
            .install_input(PixelBuffer::filled(8, 8, [1, 2, 3, 255]))
            .unwrap();
        assert!(canvas.is_dirty());
        // Render layer is untouched until the redraw.
        assert_eq!(canvas.render().pixel(3, 3), Some([3, 3, 0, 255]));

        canvas.apply(PanelOp::Redraw, &mut ControlPointManager::new(4), 1.0).unwrap();
        assert!(!canvas.is_dirty());
        assert_eq!(canvas.render().pixel(3, 3), Some([1, 2, 3, 255]));
        assert_eq!(
            canvas.layers().get(LayerKind::Data).pixel(3, 3),
            Some([1, 2, 3, 255])
        );
    }

    #[test]
    fn save_encodes_render_layer() {
        let mut canvas = loaded(Dimensions::new(4, 4), gradient(9, 7));
        let out = canvas
            .apply(
                PanelOp::Save {
                    format: SaveFormat::Png,
                    quality: 1.0,
                },
                &mut ControlPointManager::new(4),
                1.0,
            )
            .unwrap();
        let OpOutput::Encoded(bytes) = out else {
            unreachable!("save returns bytes");
        };
        let decoded = crate::decode::decode_image(&bytes).unwrap();
        // Full resolution, not the clamped window.
        assert_eq!(decoded.buffer, gradient(9, 7));
    }

    #[test]
    fn compose_layers_window_over_background() {
        let mut canvas = Canvas::new(Dimensions::new(6, 6));
        let blank = canvas.compose().unwrap();
        assert_eq!(blank.pixel(0, 0), Some(crate::layers::BASE_FILL));

        canvas.begin_load(1).unwrap();
        canvas
            .finish_load(Ok(PixelBuffer::filled(2, 2, [9, 8, 7, 255])))
            .unwrap();
        let composed = canvas.compose().unwrap();
        assert_eq!(composed.dimensions(), Dimensions::new(6, 6));
        assert_eq!(canvas.geometry().origin, PixelOffset::new(2, 2));
        assert_eq!(composed.pixel(2, 2), Some([9, 8, 7, 255]));
        assert_eq!(composed.pixel(1, 1), Some(crate::layers::BASE_FILL));
    }

    #[test]
    fn magnify_zooms_around_center() {
        let mut canvas = loaded(Dimensions::new(10, 10), gradient(20, 20));
        let patch = canvas
            .magnify(Point::new(10.0, 10.0), 2.0, Dimensions::new(4, 4))
            .unwrap();
        // Patch pixel (0, 0) samples (10 - 1, 10 - 1).
        assert_eq!(patch.pixel(0, 0), Some([9, 9, 0, 255]));
        assert_eq!(patch.pixel(1, 1), Some([9, 9, 0, 255]));
        assert_eq!(patch.pixel(2, 3), Some([10, 10, 0, 255]));

        let edge = canvas
            .magnify(Point::new(0.0, 0.0), 1.0, Dimensions::new(2, 2))
            .unwrap();
        assert_eq!(edge.pixel(0, 0), Some(PixelBuffer::TRANSPARENT));
        assert_eq!(edge.pixel(1, 1), Some([0, 0, 0, 255]));
    }
}
