//! One image panel: its data model and the controller that drives it.
//!
//! The controller is the only entry point the host needs. It turns
//! pointer events into control-point edits, runs the load protocol
//! against an external [`ByteFetcher`], and forwards layer operations to
//! the [`Canvas`].
//!
//! # Load protocol
//!
//! A load is split in two so the fetch can run outside the controller:
//!
//! 1. [`PanelController::begin_load`] moves the canvas to `Loading` and
//!    hands back a [`LoadTicket`] stamped with a fresh generation.
//! 2. [`PanelController::complete_load`] applies the fetched bytes, but
//!    only if the ticket is still current and the panel has not been
//!    torn down. Anything else is [`LoadOutcome::Stale`] and changes
//!    nothing.
//!
//! [`PanelController::load`] chains both around an awaited fetch.

use std::future::Future;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::canvas::{Canvas, Geometry, OpOutput, PanelOp};
use crate::control_points::{ControlPointManager, Selection};
use crate::decode;
use crate::encode::SaveFormat;
use crate::sniff::ImageFormat;
use crate::types::{Dimensions, IatConfig, IatError, PixelBuffer, Point};

/// Where a panel's image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    /// An archive record, fetched through the host's API.
    Api {
        /// Record identifier.
        id: String,
    },
    /// A file on the local machine.
    LocalFile {
        /// Path to read.
        path: PathBuf,
    },
    /// A remote URL.
    Url(String),
}

/// Bytes returned by a [`ByteFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchedImage {
    /// Raw encoded image.
    pub bytes: Vec<u8>,
    /// Name to report for the image, if the source has one.
    pub filename: Option<String>,
}

/// External I/O collaborator that resolves an [`ImageSource`] to bytes.
///
/// Timeouts and retries are the fetcher's business.
pub trait ByteFetcher {
    /// Fetch the raw bytes for `source`.
    fn fetch(
        &self,
        source: &ImageSource,
    ) -> impl Future<Output = Result<FetchedImage, IatError>>;
}

/// Proof that a load was started. Pass it back to
/// [`PanelController::complete_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a load ticket must be completed or the panel stays Loading"]
pub struct LoadTicket {
    generation: u64,
}

impl LoadTicket {
    /// Generation this ticket was issued for.
    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

/// Result of [`PanelController::complete_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The image is installed.
    Loaded(Dimensions),
    /// The completion was superseded or the panel was torn down.
    Stale,
}

/// Description of the loaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Format sniffed from the bytes.
    pub file_type: ImageFormat,
    /// Name reported by the fetcher.
    pub filename: Option<String>,
    /// Encoded size in bytes.
    pub file_size: usize,
}

/// Pointer input in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    /// Press: select the point under the pointer or add one there.
    Down(Point),
    /// Move with the button held: drag the selected point.
    Drag(Point),
    /// Release: end the drag.
    Up,
    /// Remove the most recently added point.
    DeleteLast,
    /// Remove every point.
    Clear,
}

/// State of one panel.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    /// Host-assigned identity.
    pub id: String,
    /// The loaded file, if any.
    pub descriptor: Option<FileDescriptor>,
    /// Layers and loader state.
    pub canvas: Canvas,
    /// Control points in image coordinates.
    pub control_points: ControlPointManager,
}

impl Panel {
    /// A fresh panel with default geometry.
    #[must_use]
    pub fn new(id: impl Into<String>, config: &IatConfig) -> Self {
        Self {
            id: id.into(),
            descriptor: None,
            canvas: Canvas::new(config.default_dims()),
            control_points: ControlPointManager::new(config.control_point_max),
        }
    }

    /// Geometry of the canvas.
    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        self.canvas.geometry()
    }

    /// `true` if the render layer is stale.
    #[must_use]
    pub const fn dirty(&self) -> bool {
        self.canvas.is_dirty()
    }
}

/// Drives one [`Panel`].
#[derive(Debug, Clone)]
pub struct PanelController {
    panel: Panel,
    config: IatConfig,
    generation: u64,
    alive: bool,
}

impl PanelController {
    /// Create a controller for a new panel.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::InvalidConfig`] if `config` fails
    /// [`IatConfig::validate`].
    pub fn new(id: impl Into<String>, config: IatConfig) -> Result<Self, IatError> {
        config.validate()?;
        Ok(Self {
            panel: Panel::new(id, &config),
            config,
            generation: 0,
            alive: true,
        })
    }

    /// The panel state.
    #[must_use]
    pub const fn panel(&self) -> &Panel {
        &self.panel
    }

    /// Configuration the panel was created with.
    #[must_use]
    pub const fn config(&self) -> &IatConfig {
        &self.config
    }

    /// Control points in index order, in image coordinates.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        self.panel.control_points.points()
    }

    /// `true` while an image is loaded.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.panel.canvas.is_loaded()
    }

    /// `false` once [`teardown`](Self::teardown) has run.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    /// Native size of the loaded image.
    #[must_use]
    pub const fn source_dims(&self) -> Dimensions {
        self.panel.canvas.geometry().source_dims
    }

    /// The full-resolution render layer.
    #[must_use]
    pub const fn render(&self) -> &PixelBuffer {
        self.panel.canvas.render()
    }

    // ───────────────────────── Loading ─────────────────────────

    /// Start a load.
    ///
    /// A torn-down panel is remounted by this call.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::LoadInFlight`] if a load is already running.
    pub fn begin_load(&mut self) -> Result<LoadTicket, IatError> {
        let generation = self.generation + 1;
        self.panel.canvas.begin_load(generation)?;
        self.generation = generation;
        self.alive = true;
        tracing::debug!(panel = %self.panel.id, generation, "load started");
        Ok(LoadTicket { generation })
    }

    /// Apply the result of the fetch started by `ticket`.
    ///
    /// A successful completion decodes the bytes, checks the format
    /// against [`IatConfig::allowed_formats`], installs the image and
    /// drops the previous image's control points.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, any [`decode::decode_image`] error, or
    /// [`IatError::Format`] for a format outside `allowed_formats`. The
    /// panel is then in the `Error` state.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<FetchedImage, IatError>,
    ) -> Result<LoadOutcome, IatError> {
        if !self.alive || self.panel.canvas.loading_generation() != Some(ticket.generation) {
            tracing::warn!(
                panel = %self.panel.id,
                generation = ticket.generation,
                current = self.generation,
                alive = self.alive,
                "ignoring stale load completion"
            );
            return Ok(LoadOutcome::Stale);
        }

        self.panel.control_points.clear();
        match result.and_then(|fetched| self.decode_allowed(fetched)) {
            Ok((descriptor, buffer)) => {
                let dims = buffer.dimensions();
                self.panel.canvas.finish_load(Ok(buffer))?;
                tracing::debug!(
                    panel = %self.panel.id,
                    format = %descriptor.file_type,
                    width = dims.width,
                    height = dims.height,
                    "load complete"
                );
                self.panel.descriptor = Some(descriptor);
                Ok(LoadOutcome::Loaded(dims))
            }
            Err(err) => {
                self.panel.descriptor = None;
                tracing::debug!(panel = %self.panel.id, %err, "load failed");
                Err(self.panel.canvas.fail_load(err))
            }
        }
    }

    fn decode_allowed(
        &self,
        fetched: FetchedImage,
    ) -> Result<(FileDescriptor, PixelBuffer), IatError> {
        let decoded = decode::decode_image(&fetched.bytes)?;
        let mime = decoded.format.mime_type();
        if !self.config.allows(mime) {
            return Err(IatError::Format(format!(
                "{} ({mime}) is not an allowed format",
                decoded.format
            )));
        }
        Ok((
            FileDescriptor {
                file_type: decoded.format,
                filename: fetched.filename,
                file_size: fetched.bytes.len(),
            },
            decoded.buffer,
        ))
    }

    /// Fetch `source` with `fetcher` and install the result.
    ///
    /// # Errors
    ///
    /// As for [`begin_load`](Self::begin_load) and
    /// [`complete_load`](Self::complete_load).
    pub async fn load<F: ByteFetcher>(
        &mut self,
        fetcher: &F,
        source: &ImageSource,
    ) -> Result<LoadOutcome, IatError> {
        let ticket = self.begin_load()?;
        let fetched = fetcher.fetch(source).await;
        self.complete_load(ticket, fetched)
    }

    /// Unmount the panel. Images, points and the descriptor are
    /// dropped, and any outstanding [`LoadTicket`] becomes stale.
    pub fn teardown(&mut self) {
        self.alive = false;
        self.generation += 1;
        self.panel.canvas.clear();
        self.panel.control_points.clear();
        self.panel.descriptor = None;
        tracing::debug!(panel = %self.panel.id, "panel torn down");
    }

    // ───────────────────────── Interaction ─────────────────────────

    /// Handle a pointer event and repaint the markers.
    ///
    /// Returns the selection for [`PointerEvent::Down`], `None`
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::MaxControlPointsReached`] when a press misses
    /// every point on a full panel, and [`IatError::NonFinitePoint`] for
    /// a NaN or infinite position. Returns the canvas gate errors when
    /// no image is loaded.
    pub fn handle_pointer(&mut self, event: PointerEvent) -> Result<Option<Selection>, IatError> {
        self.panel.canvas.ensure_loaded()?;
        let viewport = self.panel.geometry().viewport();
        let hit_radius = viewport.canvas_distance_to_image(self.config.hit_radius);
        let points = &mut self.panel.control_points;

        let selection = match event {
            PointerEvent::Down(at) => {
                Some(points.add_or_select(viewport.canvas_to_image(at), hit_radius)?)
            }
            PointerEvent::Drag(at) => {
                if !points.move_selected(viewport.canvas_to_image(at)) {
                    return Ok(None);
                }
                None
            }
            PointerEvent::Up => {
                points.release();
                None
            }
            PointerEvent::DeleteLast => {
                points.delete_last();
                None
            }
            PointerEvent::Clear => {
                points.clear();
                None
            }
        };
        self.panel.canvas.draw(&self.panel.control_points, hit_radius)?;
        Ok(selection)
    }

    /// Add or select a control point at an image-space position.
    ///
    /// # Errors
    ///
    /// As for [`handle_pointer`](Self::handle_pointer).
    pub fn place_point(&mut self, at: Point) -> Result<Selection, IatError> {
        self.panel.canvas.ensure_loaded()?;
        let selection = self
            .panel
            .control_points
            .add_or_select(at, self.config.hit_radius)?;
        self.panel
            .canvas
            .draw(&self.panel.control_points, self.config.hit_radius)?;
        Ok(selection)
    }

    /// Run a layer operation.
    ///
    /// # Errors
    ///
    /// See [`Canvas::apply`].
    pub fn apply(&mut self, op: PanelOp) -> Result<OpOutput, IatError> {
        let hit_radius = self
            .panel
            .geometry()
            .viewport()
            .canvas_distance_to_image(self.config.hit_radius);
        self.panel
            .canvas
            .apply(op, &mut self.panel.control_points, hit_radius)
    }

    /// Encode the render layer.
    ///
    /// # Errors
    ///
    /// See [`Canvas::save`].
    pub fn save(&mut self, format: SaveFormat, quality: f64) -> Result<Vec<u8>, IatError> {
        self.panel.canvas.save(format, quality)
    }

    /// Scroll the visible window.
    ///
    /// # Errors
    ///
    /// See [`Canvas::pan`].
    pub fn pan(&mut self, dx: i64, dy: i64) -> Result<(), IatError> {
        self.panel.canvas.pan(dx, dy)?;
        self.apply(PanelOp::Draw).map(|_| ())
    }

    /// Flatten the panel for display.
    ///
    /// # Errors
    ///
    /// See [`Canvas::compose`].
    pub fn compose(&mut self) -> Result<PixelBuffer, IatError> {
        self.panel.canvas.compose()
    }

    /// Magnifier patch of `size` around canvas position `at`, zoomed by
    /// [`IatConfig::magnify_zoom`].
    ///
    /// # Errors
    ///
    /// See [`Canvas::magnify`].
    pub fn magnify(&mut self, at: Point, size: Dimensions) -> Result<PixelBuffer, IatError> {
        let center = self.panel.geometry().viewport().canvas_to_image(at);
        self.panel
            .canvas
            .magnify(center, self.config.magnify_zoom, size)
    }

    /// Install a transformed image as this panel's input and remap the
    /// control points. The render layer is refreshed on the next redraw.
    ///
    /// # Errors
    ///
    /// See [`Canvas::install_input`].
    pub fn install_transformed(
        &mut self,
        buffer: PixelBuffer,
        points: impl IntoIterator<Item = Point>,
    ) -> Result<(), IatError> {
        self.panel.canvas.install_input(buffer)?;
        self.panel.control_points.replace_all(points);
        Ok(())
    }
}
