//! Composition root: segmentation, detection, matching, projection and recognition
//! wired together, plus the live-session backpressure helpers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{GrayImage, RgbImage, imageops};
use tracing::{debug, info, warn};

use crate::config::{ScannerConfig, SessionConfig};
use crate::detector::{DetectionMode, DetectionResult, DocumentQuadDetector};
use crate::error::ScanError;
use crate::matcher::{MatchStrategy, TemplateCandidate, TemplateMatcher};
use crate::models::{FeatureSet, MatchFailure, MatchOutcome, ProbabilityMap, Template};
use crate::regions::{BarcodeDecoder, OcrEngine, RecognitionSummary, RegionContentRecognizer, RegionProjector};
use crate::utils::warp::warp_perspective;

/// Segmentation model producing a document probability map
pub trait SegmentationModel: Send + Sync {
    /// Run inference on a frame
    fn infer(&self, image: &RgbImage) -> Result<ProbabilityMap, ScanError>;
}

/// Keypoint and descriptor extractor
pub trait FeatureExtractor: Send + Sync {
    /// Extract features from a grayscale image
    fn extract(&self, image: &GrayImage) -> Result<FeatureSet, ScanError>;
}

/// Supplies templates with their regions and persisted features
pub trait TemplateSource: Send + Sync {
    /// Every known template
    fn templates(&self) -> Vec<Template>;

    /// Template by id
    fn template(&self, id: i64) -> Option<Template> {
        self.templates().into_iter().find(|t| t.id == id)
    }

    /// Templates in a category
    fn templates_in_category(&self, category_id: i64) -> Vec<Template> {
        self.templates()
            .into_iter()
            .filter(|t| t.category_id == Some(category_id))
            .collect()
    }

    /// Features of a template, `None` if it has none stored
    fn features(&self, template_id: i64) -> Result<Option<Arc<FeatureSet>>, ScanError>;
}

/// Template source backed by memory
#[derive(Debug, Default)]
pub struct InMemoryTemplateSource {
    templates: Vec<Template>,
    features: HashMap<i64, Arc<FeatureSet>>,
}

impl InMemoryTemplateSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template and its features
    pub fn insert(&mut self, template: Template, features: FeatureSet) {
        self.templates.retain(|t| t.id != template.id);
        self.features.insert(template.id, Arc::new(features));
        self.templates.push(template);
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateSource for InMemoryTemplateSource {
    fn templates(&self) -> Vec<Template> {
        self.templates.clone()
    }

    fn features(&self, template_id: i64) -> Result<Option<Arc<FeatureSet>>, ScanError> {
        Ok(self.features.get(&template_id).cloned())
    }
}

/// Which matching flow to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Match the raw frame through a homography
    Coarse,
    /// Detect, rectify, then match the rectified label
    LabelDetection(DetectionMode),
}

/// Everything one scan produced
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Match outcome with recognized regions
    pub outcome: MatchOutcome,
    /// Document detection, label mode only
    pub detection: Option<DetectionResult>,
    /// Rectified label the regions refer to, label mode only
    pub rectified: Option<RgbImage>,
    /// Recognition counters, when recognition ran
    pub recognition: Option<RecognitionSummary>,
}

impl ScanResult {
    fn failed(failure: MatchFailure, detection: Option<DetectionResult>) -> Self {
        Self {
            outcome: MatchOutcome::failed(failure, None),
            detection,
            rectified: None,
            recognition: None,
        }
    }
}

struct LoadedCandidate {
    template: Template,
    features: Arc<FeatureSet>,
}

/// Runs the full scan for one frame
pub struct MatchingOrchestrator {
    extractor: Arc<dyn FeatureExtractor>,
    templates: Arc<dyn TemplateSource>,
    segmenter: Option<Arc<dyn SegmentationModel>>,
    detector: DocumentQuadDetector,
    matcher: TemplateMatcher,
    projector: RegionProjector,
    recognizer: Option<RegionContentRecognizer>,
}

impl MatchingOrchestrator {
    /// Orchestrator without segmentation or recognition
    pub fn new(
        config: &ScannerConfig,
        extractor: Arc<dyn FeatureExtractor>,
        templates: Arc<dyn TemplateSource>,
    ) -> Self {
        Self {
            extractor,
            templates,
            segmenter: None,
            detector: DocumentQuadDetector::new(config.detector.clone()),
            matcher: TemplateMatcher::new(config.matcher.clone()),
            projector: RegionProjector::new(config.projector.clone()),
            recognizer: None,
        }
    }

    /// Enable label-detection mode
    pub fn with_segmenter(mut self, segmenter: Arc<dyn SegmentationModel>) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    /// Enable region recognition
    pub fn with_recognizer(mut self, recognizer: RegionContentRecognizer) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Enable region recognition with a fresh worker pool
    pub fn with_engines(
        self,
        config: &ScannerConfig,
        ocr: Arc<dyn OcrEngine>,
        barcode: Arc<dyn BarcodeDecoder>,
    ) -> Result<Self, ScanError> {
        let recognizer = RegionContentRecognizer::new(ocr, barcode, config.recognition.clone())?;
        Ok(self.with_recognizer(recognizer))
    }

    /// Quad detector in use
    pub fn detector(&self) -> &DocumentQuadDetector {
        &self.detector
    }

    /// Scan one frame.
    ///
    /// Expected misses come back as an unsuccessful outcome. `Err` is reserved for
    /// collaborator failures and corrupted template features.
    pub fn scan(&self, frame: &RgbImage, mode: ScanMode) -> Result<ScanResult, ScanError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(ScanResult::failed(
                MatchFailure::InvalidInput {
                    reason: "empty frame".into(),
                },
                None,
            ));
        }
        let candidates = self.load_candidates()?;
        if candidates.is_empty() {
            return Ok(ScanResult::failed(MatchFailure::NoTemplates, None));
        }
        match mode {
            ScanMode::Coarse => self.scan_coarse(frame, &candidates),
            ScanMode::LabelDetection(detection_mode) => {
                self.scan_label(frame, detection_mode, &candidates)
            }
        }
    }

    /// Detect the document quad in full-image coordinates
    pub fn detect_document(&self, frame: &RgbImage, mode: DetectionMode) -> Result<DetectionResult, ScanError> {
        let segmenter = self
            .segmenter
            .as_ref()
            .ok_or_else(|| ScanError::config("label detection needs a segmentation model"))?;
        let map = segmenter.infer(frame)?;
        let result = self.detector.detect(&map, mode);
        Ok(result.in_image_space(frame.width(), frame.height()))
    }

    fn load_candidates(&self) -> Result<Vec<LoadedCandidate>, ScanError> {
        let mut loaded = Vec::new();
        for template in self.templates.templates().into_iter().filter(|t| t.enabled) {
            match self.templates.features(template.id)? {
                Some(features) => loaded.push(LoadedCandidate { template, features }),
                None => warn!(template = template.id, "template has no stored features"),
            }
        }
        Ok(loaded)
    }

    fn scan_coarse(&self, frame: &RgbImage, candidates: &[LoadedCandidate]) -> Result<ScanResult, ScanError> {
        // Step 1: Extract frame features
        let gray = imageops::grayscale(frame);
        let features = self.extractor.extract(&gray)?;

        // Step 2: Match against every candidate
        let strategy = MatchStrategy::coarse(self.matcher.config(), frame.width(), frame.height());
        let refs: Vec<TemplateCandidate<'_>> = candidates
            .iter()
            .map(|c| TemplateCandidate {
                template: &c.template,
                features: &c.features,
            })
            .collect();
        let mut outcome = self.matcher.match_best(&features, &refs, &strategy);
        features.release();

        // Step 3: Project and recognize
        let recognition = self.finish(&mut outcome, frame, (frame.width(), frame.height()));
        Ok(ScanResult {
            outcome,
            detection: None,
            rectified: None,
            recognition,
        })
    }

    fn scan_label(
        &self,
        frame: &RgbImage,
        mode: DetectionMode,
        candidates: &[LoadedCandidate],
    ) -> Result<ScanResult, ScanError> {
        // Step 1: Find the label
        let detection = self.detect_document(frame, mode)?;
        let Some(quad) = detection.quad.filter(|_| detection.detected) else {
            return Ok(ScanResult::failed(MatchFailure::NoDocument, Some(detection)));
        };

        // Step 2: Rectify once per reference size, extract, match
        let mut by_size: BTreeMap<(u32, u32), Vec<&LoadedCandidate>> = BTreeMap::new();
        for c in candidates {
            by_size
                .entry((c.template.reference_width, c.template.reference_height))
                .or_default()
                .push(c);
        }

        let mut best: Option<(MatchOutcome, RgbImage)> = None;
        for ((w, h), group) in by_size {
            let Some(rectified) = warp_perspective(frame, quad.corners(), w, h) else {
                debug!(width = w, height = h, "skipping empty reference size");
                continue;
            };
            let features = self.extractor.extract(&imageops::grayscale(&rectified))?;
            let refs: Vec<TemplateCandidate<'_>> = group
                .iter()
                .map(|c| TemplateCandidate {
                    template: &c.template,
                    features: &c.features,
                })
                .collect();
            let outcome =
                self.matcher
                    .match_best(&features, &refs, &MatchStrategy::LabelDetectionRectified);
            features.release();

            let better = match &best {
                None => true,
                Some((b, _)) => outcome.success && (!b.success || outcome.confidence > b.confidence),
            };
            if better {
                best = Some((outcome, rectified));
            }
        }

        let Some((mut outcome, rectified)) = best else {
            return Ok(ScanResult::failed(MatchFailure::NoMatch, Some(detection)));
        };

        // Step 3: Regions use template coordinates on the rectified label
        let size = rectified.dimensions();
        let recognition = self.finish(&mut outcome, &rectified, size);
        Ok(ScanResult {
            outcome,
            detection: Some(detection),
            rectified: Some(rectified),
            recognition,
        })
    }

    fn finish(
        &self,
        outcome: &mut MatchOutcome,
        image: &RgbImage,
        size: (u32, u32),
    ) -> Option<RecognitionSummary> {
        if !outcome.success {
            return None;
        }
        let template = outcome.template.as_ref()?;
        let template_id = template.id;
        let regions: Vec<_> = template.sorted_regions().into_iter().cloned().collect();
        outcome.transformed_regions = self.projector.project(&regions, outcome.transform.as_ref(), size);

        let summary = self
            .recognizer
            .as_ref()
            .map(|r| r.recognize_all(image, &mut outcome.transformed_regions));
        info!(
            template = template_id,
            regions = outcome.transformed_regions.len(),
            recognized = summary.as_ref().map_or(0, |s| s.recognized),
            "scan finished"
        );
        summary
    }
}

/// Single-flight gate with a cooldown between attempts
#[derive(Debug)]
pub struct FrameGate {
    busy: AtomicBool,
    cooldown: Duration,
    last_finished: Mutex<Option<Instant>>,
}

/// Held while a frame is being processed; releasing it starts the cooldown
#[derive(Debug)]
pub struct FrameGuard<'a> {
    gate: &'a FrameGate,
}

impl FrameGate {
    /// Gate with the given cooldown
    pub fn new(cooldown: Duration) -> Self {
        Self {
            busy: AtomicBool::new(false),
            cooldown,
            last_finished: Mutex::new(None),
        }
    }

    /// Claim the gate, or `None` if a frame is in flight or the cooldown is running
    pub fn try_acquire(&self) -> Option<FrameGuard<'_>> {
        let cooling = self
            .last_finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some_and(|t| t.elapsed() < self.cooldown);
        if cooling {
            return None;
        }
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FrameGuard { gate: self })
    }

    /// True while a frame is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        *self
            .gate
            .last_finished
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.gate.busy.store(false, Ordering::Release);
    }
}

/// Counts consecutive misses so guidance is shown only after a sustained streak
#[derive(Debug, Clone)]
pub struct MissTracker {
    consecutive: u32,
    threshold: u32,
}

impl MissTracker {
    /// Tracker that reports after `threshold` misses in a row
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold,
        }
    }

    /// Record an attempt; true when guidance is due
    pub fn record(&mut self, success: bool) -> bool {
        if success {
            self.consecutive = 0;
        } else {
            self.consecutive = self.consecutive.saturating_add(1);
        }
        self.guidance_due()
    }

    /// True once the streak reached the threshold
    pub fn guidance_due(&self) -> bool {
        self.threshold > 0 && self.consecutive >= self.threshold
    }

    /// Current streak
    pub fn misses(&self) -> u32 {
        self.consecutive
    }
}

/// What happened to a submitted frame
#[derive(Debug)]
pub enum FrameDecision {
    /// Another frame was in flight or cooling down
    Dropped,
    /// The frame was scanned
    Processed {
        /// Scan result
        result: Box<ScanResult>,
        /// Whether the miss streak warrants user guidance
        guidance_due: bool,
    },
}

/// Live scanning front: drops frames under backpressure and tracks misses
pub struct LiveScanner {
    orchestrator: Arc<MatchingOrchestrator>,
    gate: FrameGate,
    misses: Mutex<MissTracker>,
    mode: ScanMode,
}

impl LiveScanner {
    /// Live scanner over a shared orchestrator
    pub fn new(orchestrator: Arc<MatchingOrchestrator>, session: &SessionConfig, mode: ScanMode) -> Self {
        Self {
            orchestrator,
            gate: FrameGate::new(Duration::from_millis(session.cooldown_ms)),
            misses: Mutex::new(MissTracker::new(session.miss_guidance_threshold)),
            mode,
        }
    }

    /// Scan the frame unless another is in flight
    pub fn submit(&self, frame: &RgbImage) -> Result<FrameDecision, ScanError> {
        let Some(_guard) = self.gate.try_acquire() else {
            return Ok(FrameDecision::Dropped);
        };
        let result = self.orchestrator.scan(frame, self.mode)?;
        let guidance_due = self
            .misses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(result.outcome.success);
        Ok(FrameDecision::Processed {
            result: Box::new(result),
            guidance_due,
        })
    }

    /// Session gate
    pub fn gate(&self) -> &FrameGate {
        &self.gate
    }
}
