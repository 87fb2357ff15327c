//! Inspection session
//!
//! One session owns all mutable inspection state: the active program, the
//! calibrated template reference, the freeze flag, and the calibration mode.
//! Calibration actions are the only writers; the tick pipeline reads the
//! state it is handed and never mutates it. Calibration input arrives as
//! `SessionCommand`s over a channel and is drained between ticks, so no
//! mutation can interleave a running tick.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, TryRecvError};
use image::GrayImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::capture::{FrameSource, FrozenSource};
use crate::geometry::{DragRect, NormRect, PixelRect};
use crate::pipeline::{run_tick, InspectionResult, Verdict};
use crate::program::{golden, Program, Roi, TemplateParams, TemplateReference};
use crate::storage::{self, ProgramLoadError};
use crate::vision::{Symbology, VisionStack};

/// Smallest usable selection edge, in pixels.
pub const MIN_SELECTION: u32 = 8;

/// What kind of ROI a selection should become, with its type-specific
/// calibration inputs.
#[derive(Debug, Clone)]
pub enum RoiSpec {
    Template { ok_threshold: f32 },
    Barcode { symbologies: Vec<Symbology>, expected_text: String },
}

/// Current calibration mode. Selecting modes carry the in-progress drag
/// rectangle; they gate interactive input but never pause the tick cycle.
#[derive(Debug, Clone)]
pub enum CalibrationMode {
    Idle,
    SelectingTemplate { drag: Option<DragRect> },
    SelectingRoi { spec: RoiSpec, drag: Option<DragRect> },
}

/// Execution state derived from the session contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// No template calibrated.
    Idle,
    /// Template and descriptors ready, zero ROIs.
    TemplateSet,
    /// At least one ROI configured.
    Ready,
    /// Continuous tick cycle active.
    Running,
}

/// Calibration input that could not be applied. Reported synchronously; the
/// session state is unchanged.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("selection is {w}x{h} px, need at least 8x8")]
    SelectionTooSmall { w: u32, h: u32 },
    #[error("no template defined")]
    NoTemplate,
    #[error("no active program")]
    NoProgram,
    #[error("freeze the frame before selecting a template")]
    NotFrozen,
    #[error("no selection in progress")]
    NoSelection,
    #[error("reference image is {got_w}x{got_h}, program expects {want_w}x{want_h}")]
    ReferenceSizeMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
    #[error("frame source failed: {0}")]
    FrameSource(String),
    #[error("golden snapshot encoding failed: {0}")]
    Golden(String),
}

/// Calibration and control input, serialized with the tick loop.
#[derive(Debug)]
pub enum SessionCommand {
    Freeze(bool),
    BeginTemplateSelection,
    BeginRoiSelection(RoiSpec),
    UpdateSelection(DragRect),
    FinishSelection,
    CancelSelection,
    SaveProgram(PathBuf),
    LoadProgram(PathBuf),
    SetRunning(bool),
    Shutdown,
}

/// The single owner of all inspection state.
pub struct InspectionSession {
    source: FrozenSource,
    stack: VisionStack,
    program: Option<Program>,
    template: Option<TemplateReference>,
    /// Where the template crop sits in frame coordinates; the origin for
    /// frame-space ROI selections.
    template_box: Option<PixelRect>,
    mode: CalibrationMode,
    running: bool,
}

impl InspectionSession {
    pub fn new(source: Box<dyn FrameSource>, stack: VisionStack) -> Self {
        Self {
            source: FrozenSource::new(source),
            stack,
            program: None,
            template: None,
            template_box: None,
            mode: CalibrationMode::Idle,
            running: false,
        }
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn mode(&self) -> &CalibrationMode {
        &self.mode
    }

    pub fn is_frozen(&self) -> bool {
        self.source.is_frozen()
    }

    pub fn freeze(&mut self, frozen: bool) {
        self.source.set_frozen(frozen);
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn state(&self) -> ExecState {
        match (&self.template, &self.program) {
            (None, _) | (_, None) => ExecState::Idle,
            (Some(_), Some(p)) if p.rois.is_empty() => ExecState::TemplateSet,
            _ if self.running => ExecState::Running,
            _ => ExecState::Ready,
        }
    }

    /// Enter template selection. Requires a frozen frame so the selection is
    /// made against a still image.
    pub fn begin_template_selection(&mut self) -> Result<(), CalibrationError> {
        if !self.source.is_frozen() {
            return Err(CalibrationError::NotFrozen);
        }
        self.mode = CalibrationMode::SelectingTemplate { drag: None };
        Ok(())
    }

    /// Enter ROI selection. Requires a calibrated template.
    pub fn begin_roi_selection(&mut self, spec: RoiSpec) -> Result<(), CalibrationError> {
        if self.template.is_none() {
            return Err(CalibrationError::NoTemplate);
        }
        self.mode = CalibrationMode::SelectingRoi { spec, drag: None };
        Ok(())
    }

    /// Track the in-progress drag rectangle. Ignored outside selection modes.
    pub fn update_selection(&mut self, rect: DragRect) {
        match &mut self.mode {
            CalibrationMode::Idle => {}
            CalibrationMode::SelectingTemplate { drag }
            | CalibrationMode::SelectingRoi { drag, .. } => *drag = Some(rect),
        }
    }

    pub fn cancel_selection(&mut self) {
        self.mode = CalibrationMode::Idle;
    }

    /// Commit the current drag according to the calibration mode. The mode
    /// always returns to `Idle`, whether or not the selection was usable.
    pub fn finish_selection(&mut self) -> Result<(), CalibrationError> {
        let mode = std::mem::replace(&mut self.mode, CalibrationMode::Idle);
        match mode {
            CalibrationMode::Idle => Err(CalibrationError::NoSelection),
            CalibrationMode::SelectingTemplate { drag } => {
                let rect = drag.ok_or(CalibrationError::NoSelection)?;
                let frame = self
                    .source
                    .current()
                    .map_err(|e| CalibrationError::FrameSource(e.to_string()))?;
                self.define_template(&frame.image, rect)
            }
            CalibrationMode::SelectingRoi { spec, drag } => {
                let rect = drag.ok_or(CalibrationError::NoSelection)?;
                self.add_roi(rect, spec).map(|_| ())
            }
        }
    }

    /// Calibrate a new template from a frame crop. Replaces the template
    /// reference atomically and starts a fresh program; redefining the
    /// template discards previously configured ROIs.
    pub fn define_template(
        &mut self,
        frame: &GrayImage,
        rect: DragRect,
    ) -> Result<(), CalibrationError> {
        let (fw, fh) = frame.dimensions();
        let pixel = rect
            .to_pixel_rect()
            .clip_to(fw, fh)
            .unwrap_or(PixelRect::new(0, 0, 0, 0));
        if pixel.w < MIN_SELECTION || pixel.h < MIN_SELECTION {
            return Err(CalibrationError::SelectionTooSmall {
                w: pixel.w,
                h: pixel.h,
            });
        }

        let crop = image::imageops::crop_imm(frame, pixel.x, pixel.y, pixel.w, pixel.h).to_image();
        let params = TemplateParams::for_size(pixel.w, pixel.h);
        let reference =
            TemplateReference::calibrate(crop, self.stack.extractor.as_ref(), params.nfeatures);
        info!(
            w = pixel.w,
            h = pixel.h,
            features = reference.features.len(),
            "template defined"
        );
        if reference.features.is_empty() {
            warn!("template yielded no descriptors; alignment will fail until recalibrated");
        }

        self.template = Some(reference);
        self.template_box = Some(pixel);
        self.program = Some(Program::new(params));
        Ok(())
    }

    /// Add an ROI from a frame-space selection. Returns the new ROI id.
    pub fn add_roi(&mut self, rect: DragRect, spec: RoiSpec) -> Result<String, CalibrationError> {
        let pixel = rect.to_pixel_rect();
        if pixel.w < MIN_SELECTION || pixel.h < MIN_SELECTION {
            return Err(CalibrationError::SelectionTooSmall {
                w: pixel.w,
                h: pixel.h,
            });
        }
        let template = self.template.as_ref().ok_or(CalibrationError::NoTemplate)?;
        let template_box = self.template_box.ok_or(CalibrationError::NoTemplate)?;
        let program = self.program.as_mut().ok_or(CalibrationError::NoProgram)?;

        let rect_norm = NormRect::from_frame_rect(rect, template_box);

        let roi = match spec {
            RoiSpec::Template { ok_threshold } => {
                // Golden snapshot: the template crop at the ROI location,
                // captured now and never refreshed.
                let (tw, th) = template.dimensions();
                let golden_rect = rect_norm
                    .denormalize(tw, th)
                    .clip_to(tw, th)
                    .ok_or(CalibrationError::SelectionTooSmall { w: 0, h: 0 })?;
                let golden_crop = image::imageops::crop_imm(
                    &template.image,
                    golden_rect.x,
                    golden_rect.y,
                    golden_rect.w,
                    golden_rect.h,
                )
                .to_image();
                let payload = golden::encode_golden(&golden_crop)
                    .map_err(|e| CalibrationError::Golden(e.to_string()))?;
                Roi::new_template(rect_norm, ok_threshold, payload)
            }
            RoiSpec::Barcode {
                symbologies,
                expected_text,
            } => Roi::new_barcode(rect_norm, symbologies, expected_text),
        };

        let id = roi.id.clone();
        info!(roi = %id, kind = ?roi.kind, "ROI added");
        program.rois.push(roi);
        Ok(id)
    }

    /// Rebuild the template reference from a reference image, for programs
    /// restored from disk (the document carries template parameters and
    /// golden snapshots, not the reference image itself).
    pub fn attach_reference(&mut self, image: GrayImage) -> Result<(), CalibrationError> {
        let program = self.program.as_ref().ok_or(CalibrationError::NoProgram)?;
        let (w, h) = image.dimensions();
        if w != program.template.w || h != program.template.h {
            return Err(CalibrationError::ReferenceSizeMismatch {
                got_w: w,
                got_h: h,
                want_w: program.template.w,
                want_h: program.template.h,
            });
        }
        let reference = TemplateReference::calibrate(
            image,
            self.stack.extractor.as_ref(),
            program.template.nfeatures,
        );
        info!(features = reference.features.len(), "template reference attached");
        self.template = Some(reference);
        self.template_box = Some(PixelRect::new(0, 0, w, h));
        Ok(())
    }

    pub fn save_program_to(&self, path: &Path) -> Result<()> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no active program to save"))?;
        storage::save_program(program, path)
    }

    /// Load a program document, replacing the active program wholesale. On
    /// failure the previously active program is retained unchanged. The
    /// template reference is not touched either way; attach one explicitly
    /// for a freshly loaded program.
    pub fn load_program_from(&mut self, path: &Path) -> Result<(), ProgramLoadError> {
        let program = storage::load_program(path)?;
        self.program = Some(program);
        Ok(())
    }

    /// Run one inspection tick: acquire a frame and drive the pipeline.
    pub async fn tick(&mut self) -> Result<InspectionResult> {
        let frame = self.source.current()?;
        let (Some(program), Some(template)) = (&self.program, &self.template) else {
            return Ok(InspectionResult::not_configured());
        };
        Ok(run_tick(&frame.image, program, template, &self.stack).await)
    }

    /// Apply one command. Returns `false` when the session should shut down.
    pub fn handle_command(&mut self, command: SessionCommand) -> bool {
        let outcome: Result<(), CalibrationError> = match command {
            SessionCommand::Freeze(frozen) => {
                self.freeze(frozen);
                Ok(())
            }
            SessionCommand::BeginTemplateSelection => self.begin_template_selection(),
            SessionCommand::BeginRoiSelection(spec) => self.begin_roi_selection(spec),
            SessionCommand::UpdateSelection(rect) => {
                self.update_selection(rect);
                Ok(())
            }
            SessionCommand::FinishSelection => self.finish_selection(),
            SessionCommand::CancelSelection => {
                self.cancel_selection();
                Ok(())
            }
            SessionCommand::SaveProgram(path) => {
                if let Err(err) = self.save_program_to(&path) {
                    warn!(%err, "program save failed");
                }
                Ok(())
            }
            SessionCommand::LoadProgram(path) => {
                if let Err(err) = self.load_program_from(&path) {
                    warn!(%err, "program load failed, active program retained");
                }
                Ok(())
            }
            SessionCommand::SetRunning(running) => {
                self.set_running(running);
                Ok(())
            }
            SessionCommand::Shutdown => return false,
        };
        if let Err(err) = outcome {
            warn!(%err, "calibration input rejected");
        }
        true
    }

    /// Drive the cooperative tick loop: drain pending commands, run one tick
    /// when in the running state, then wait out the tick period. The next
    /// tick is always scheduled, pass or fail.
    pub async fn run(
        &mut self,
        commands: Receiver<SessionCommand>,
        tick_period: Duration,
        max_ticks: Option<u64>,
    ) -> Result<()> {
        let mut interval = tokio::time::interval(tick_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        if !self.handle_command(command) {
                            info!("session shutdown requested");
                            return Ok(());
                        }
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            if self.state() == ExecState::Running {
                let result = self.tick().await?;
                log_result(&result);
            }

            ticks += 1;
            if let Some(max) = max_ticks {
                if ticks >= max {
                    return Ok(());
                }
            }
            interval.tick().await;
        }
    }
}

fn log_result(result: &InspectionResult) {
    match result.verdict {
        Verdict::Ok => info!(rois = result.roi_verdicts.len(), "OK"),
        Verdict::Ng => {
            if let Some(failure) = &result.alignment_failure {
                info!(%failure, "NG (alignment)");
            } else {
                let failed: Vec<&str> = result
                    .roi_verdicts
                    .iter()
                    .filter(|v| !v.passed)
                    .map(|v| v.roi_id.as_str())
                    .collect();
                info!(?failed, "NG");
            }
        }
        Verdict::NotConfigured => info!("no ROIs configured"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ImageSequenceSource;
    use crate::program::RoiKind;
    use crate::vision::fakes::aligned_stack;
    use image::Luma;

    fn textured(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 11 + y * 17) % 256) as u8]))
    }

    fn session() -> InspectionSession {
        let frame = textured(320, 240);
        let source = ImageSequenceSource::from_images(vec![frame]).unwrap();
        InspectionSession::new(Box::new(source), aligned_stack(20, 1.0, None))
    }

    fn drag(x: f32, y: f32, w: f32, h: f32) -> DragRect {
        DragRect { x, y, w, h }
    }

    fn calibrated_session() -> InspectionSession {
        let mut s = session();
        s.define_template(&textured(320, 240), drag(40.0, 30.0, 100.0, 80.0))
            .unwrap();
        s
    }

    #[test]
    fn starts_idle() {
        let s = session();
        assert_eq!(s.state(), ExecState::Idle);
        assert!(s.program().is_none());
    }

    #[test]
    fn tiny_template_selection_is_rejected() {
        let mut s = session();
        let err = s
            .define_template(&textured(320, 240), drag(0.0, 0.0, 7.0, 20.0))
            .unwrap_err();
        assert!(matches!(err, CalibrationError::SelectionTooSmall { .. }));
        assert_eq!(s.state(), ExecState::Idle);
    }

    #[test]
    fn defining_template_starts_fresh_program() {
        let s = calibrated_session();
        assert_eq!(s.state(), ExecState::TemplateSet);
        let program = s.program().unwrap();
        assert!(program.rois.is_empty());
        assert_eq!(program.template.w, 100);
        assert_eq!(program.template.h, 80);
    }

    #[test]
    fn redefining_template_discards_rois() {
        let mut s = calibrated_session();
        s.add_roi(
            drag(50.0, 40.0, 30.0, 20.0),
            RoiSpec::Template { ok_threshold: 0.85 },
        )
        .unwrap();
        assert_eq!(s.state(), ExecState::Ready);

        s.define_template(&textured(320, 240), drag(10.0, 10.0, 60.0, 60.0))
            .unwrap();
        assert_eq!(s.state(), ExecState::TemplateSet);
        assert!(s.program().unwrap().rois.is_empty());
    }

    #[test]
    fn add_roi_without_template_fails() {
        let mut s = session();
        let err = s
            .add_roi(
                drag(10.0, 10.0, 40.0, 40.0),
                RoiSpec::Template { ok_threshold: 0.85 },
            )
            .unwrap_err();
        assert!(matches!(err, CalibrationError::NoTemplate));
    }

    #[test]
    fn template_roi_captures_golden_snapshot() {
        let mut s = calibrated_session();
        s.add_roi(
            drag(50.0, 40.0, 30.0, 20.0),
            RoiSpec::Template { ok_threshold: 0.85 },
        )
        .unwrap();
        let roi = &s.program().unwrap().rois[0];
        assert_eq!(roi.kind, RoiKind::Template);
        assert!(roi.golden_data.is_some());
        assert_eq!(roi.ok_threshold, Some(0.85));
        // Golden decodes back to the denormalized template crop size.
        let golden = golden::decode_golden(roi.golden_data.as_deref().unwrap()).unwrap();
        let rect = roi.rect_norm.denormalize(100, 80);
        assert_eq!(golden.dimensions(), (rect.w, rect.h));
    }

    #[test]
    fn barcode_roi_keeps_spec_fields() {
        let mut s = calibrated_session();
        s.add_roi(
            drag(50.0, 40.0, 30.0, 20.0),
            RoiSpec::Barcode {
                symbologies: crate::vision::default_symbologies(),
                expected_text: "ABC123".to_string(),
            },
        )
        .unwrap();
        let roi = &s.program().unwrap().rois[0];
        assert_eq!(roi.kind, RoiKind::Barcode);
        assert_eq!(roi.expected_text.as_deref(), Some("ABC123"));
        assert!(roi.golden_data.is_none());
    }

    #[test]
    fn roi_selection_outside_template_is_clamped() {
        let mut s = calibrated_session();
        // Template box is at (40, 30), 100x80; drag past its right edge.
        s.add_roi(
            drag(120.0, 100.0, 100.0, 40.0),
            RoiSpec::Barcode {
                symbologies: Vec::new(),
                expected_text: String::new(),
            },
        )
        .unwrap();
        let roi = &s.program().unwrap().rois[0];
        assert!(roi.rect_norm.x() + roi.rect_norm.w() <= 2.0);
        let rect = roi.rect_norm.denormalize(100, 80);
        assert!(rect.w <= 100);
    }

    #[test]
    fn template_selection_requires_frozen_frame() {
        let mut s = session();
        assert!(matches!(
            s.begin_template_selection(),
            Err(CalibrationError::NotFrozen)
        ));
        s.freeze(true);
        assert!(s.begin_template_selection().is_ok());
    }

    #[test]
    fn selection_flow_defines_template() {
        let mut s = session();
        s.freeze(true);
        s.begin_template_selection().unwrap();
        s.update_selection(drag(40.0, 30.0, 100.0, 80.0));
        s.finish_selection().unwrap();
        assert_eq!(s.state(), ExecState::TemplateSet);
        assert!(matches!(s.mode(), CalibrationMode::Idle));
    }

    #[test]
    fn finishing_without_drag_is_rejected() {
        let mut s = session();
        s.freeze(true);
        s.begin_template_selection().unwrap();
        let err = s.finish_selection().unwrap_err();
        assert!(matches!(err, CalibrationError::NoSelection));
        assert!(matches!(s.mode(), CalibrationMode::Idle));
    }

    #[test]
    fn failed_load_retains_active_program() {
        let mut s = calibrated_session();
        let before = s.program().unwrap().clone();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ \"id\": \"x\" }").unwrap();

        assert!(s.load_program_from(&path).is_err());
        assert_eq!(s.program().unwrap(), &before);
    }

    #[test]
    fn successful_load_replaces_program_wholesale() {
        let mut s = calibrated_session();
        s.add_roi(
            drag(50.0, 40.0, 30.0, 20.0),
            RoiSpec::Template { ok_threshold: 0.85 },
        )
        .unwrap();

        let other = Program::new(TemplateParams::for_size(64, 48));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.json");
        storage::save_program(&other, &path).unwrap();

        s.load_program_from(&path).unwrap();
        let loaded = s.program().unwrap();
        assert_eq!(loaded.id, other.id);
        assert!(loaded.rois.is_empty());
    }

    #[test]
    fn attach_reference_checks_dimensions() {
        let mut s = calibrated_session();
        let err = s.attach_reference(textured(10, 10)).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::ReferenceSizeMismatch { .. }
        ));
        s.attach_reference(textured(100, 80)).unwrap();
    }

    #[test]
    fn state_machine_progression() {
        let mut s = session();
        assert_eq!(s.state(), ExecState::Idle);
        s.define_template(&textured(320, 240), drag(40.0, 30.0, 100.0, 80.0))
            .unwrap();
        assert_eq!(s.state(), ExecState::TemplateSet);
        s.add_roi(
            drag(50.0, 40.0, 30.0, 20.0),
            RoiSpec::Template { ok_threshold: 0.85 },
        )
        .unwrap();
        assert_eq!(s.state(), ExecState::Ready);
        s.set_running(true);
        assert_eq!(s.state(), ExecState::Running);
        s.set_running(false);
        assert_eq!(s.state(), ExecState::Ready);
    }

    #[tokio::test]
    async fn tick_with_passing_region_is_ok() {
        let mut s = calibrated_session();
        s.add_roi(
            drag(50.0, 40.0, 30.0, 20.0),
            RoiSpec::Template { ok_threshold: 0.85 },
        )
        .unwrap();
        let result = s.tick().await.unwrap();
        assert_eq!(result.verdict, Verdict::Ok);
        assert_eq!(result.roi_verdicts.len(), 1);
    }

    #[tokio::test]
    async fn tick_without_template_reports_not_configured() {
        let mut s = session();
        let result = s.tick().await.unwrap();
        assert_eq!(result.verdict, Verdict::NotConfigured);
    }

    #[tokio::test]
    async fn run_loop_processes_commands_and_stops() {
        let mut s = calibrated_session();
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(SessionCommand::SetRunning(true)).unwrap();
        tx.send(SessionCommand::Shutdown).unwrap();
        // Shutdown is drained before the first tick wait completes.
        s.run(rx, Duration::from_millis(1), Some(100)).await.unwrap();
    }

    #[tokio::test]
    async fn run_loop_honors_tick_budget() {
        let mut s = calibrated_session();
        s.add_roi(
            drag(50.0, 40.0, 30.0, 20.0),
            RoiSpec::Template { ok_threshold: 0.85 },
        )
        .unwrap();
        s.set_running(true);
        let (_tx, rx) = crossbeam_channel::unbounded();
        s.run(rx, Duration::from_millis(1), Some(3)).await.unwrap();
    }
}
