//! Concurrent per-region content recognition.
//!
//! Regions are cropped on the caller's thread, then fanned out to a bounded rayon pool.
//! Inside each task a barcode branch and an OCR branch race on their own threads; the
//! task waits for both up to the region timeout, or returns as soon as a barcode is read.
//! The caller collects results through one channel until every task reported or the
//! batch deadline passed, and writes each region's fields itself.
//!
//! Engines cannot be cancelled. A branch that outlives its region timeout keeps its OS
//! thread until the engine returns, though the pool task that launched it is already
//! free again. [`RegionContentRecognizer::lingering_branches`] reports how many such
//! threads are still alive.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::crop::crop_region;
use crate::config::RecognitionConfig;
use crate::error::ScanError;
use crate::models::{Point, Rect, TransformedRegion};

/// One OCR text line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    /// Recognized text
    pub text: String,
    /// Location inside the crop
    pub bounding_box: Rect,
    /// Engine confidence in [0, 1]
    pub confidence: f32,
}

/// One decoded barcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarcodeResult {
    /// Payload
    pub content: String,
    /// Symbology name, e.g. `CODE_128`
    pub format: String,
    /// Location inside the crop
    pub bounding_box: Option<Rect>,
    /// Corner points inside the crop
    pub corners: Vec<Point>,
}

/// Text recognition engine
pub trait OcrEngine: Send + Sync {
    /// Recognize text lines in an image
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextFragment>, ScanError>;
}

/// Barcode decoding engine
pub trait BarcodeDecoder: Send + Sync {
    /// Decode barcodes in an image captured at `rotation_degrees`
    fn decode(&self, image: &RgbImage, rotation_degrees: i32) -> Result<Vec<BarcodeResult>, ScanError>;
}

/// Merged content for one region
#[derive(Debug, Clone, PartialEq)]
pub struct RegionContent {
    /// Recognized text or barcode payload
    pub content: String,
    /// Barcode symbology, `None` for OCR text
    pub format: Option<String>,
    /// 1.0 for barcodes, mean fragment confidence for OCR
    pub confidence: f32,
}

/// Barcode wins; otherwise OCR fragments are joined with single spaces
pub fn merge_results(
    barcodes: Option<&[BarcodeResult]>,
    fragments: Option<&[TextFragment]>,
) -> Option<RegionContent> {
    if let Some(b) = barcodes
        .unwrap_or_default()
        .iter()
        .find(|b| !b.content.is_empty())
    {
        return Some(RegionContent {
            content: b.content.clone(),
            format: Some(b.format.clone()),
            confidence: 1.0,
        });
    }

    let valid: Vec<&TextFragment> = fragments
        .unwrap_or_default()
        .iter()
        .filter(|f| !f.text.trim().is_empty())
        .collect();
    if valid.is_empty() {
        return None;
    }
    let content = valid
        .iter()
        .map(|f| f.text.trim())
        .collect::<Vec<_>>()
        .join(" ");
    let confidence = valid
        .iter()
        .map(|f| if f.confidence.is_finite() { f.confidence } else { 0.0 })
        .sum::<f32>()
        / valid.len() as f32;
    Some(RegionContent {
        content,
        format: None,
        confidence: confidence.clamp(0.0, 1.0),
    })
}

/// Counts for one `recognize_all` call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecognitionSummary {
    /// Regions handed to the pool
    pub submitted: usize,
    /// Regions whose task reported back before the deadline
    pub completed: usize,
    /// Regions that received content
    pub recognized: usize,
    /// Regions whose crop was empty
    pub skipped: usize,
    /// Regions still running at the batch deadline
    pub timed_out: usize,
    /// Engine branches from earlier calls still running when this one started
    pub lingering_at_start: usize,
    /// Wall time
    pub elapsed_ms: f64,
}

enum Branch {
    Barcode(Result<Vec<BarcodeResult>, ScanError>),
    Ocr(Result<Vec<TextFragment>, ScanError>),
}

/// Counts one live engine branch thread for as long as it exists
struct BranchGuard(Arc<AtomicUsize>);

impl BranchGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for BranchGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Crops regions and runs barcode and OCR recognition on a bounded pool
pub struct RegionContentRecognizer {
    ocr: Arc<dyn OcrEngine>,
    barcode: Arc<dyn BarcodeDecoder>,
    pool: ThreadPool,
    config: RecognitionConfig,
    live_branches: Arc<AtomicUsize>,
}

impl RegionContentRecognizer {
    /// Build the recognizer and its worker pool
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        barcode: Arc<dyn BarcodeDecoder>,
        config: RecognitionConfig,
    ) -> Result<Self, ScanError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.effective_workers())
            .thread_name(|i| format!("region-recognizer-{}", i))
            .build()?;
        Ok(Self {
            ocr,
            barcode,
            pool,
            config,
            live_branches: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Worker threads in the pool
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Engine branch threads still running, including ones abandoned after a timeout
    pub fn lingering_branches(&self) -> usize {
        self.live_branches.load(Ordering::SeqCst)
    }

    /// Recognize every region in place
    pub fn recognize_all(&self, frame: &RgbImage, regions: &mut [TransformedRegion]) -> RecognitionSummary {
        self.recognize_all_rotated(frame, regions, 0)
    }

    /// Recognize every region in place, passing the frame rotation to the barcode decoder.
    ///
    /// Regions not finished at the batch deadline keep empty content; their late results
    /// are discarded.
    pub fn recognize_all_rotated(
        &self,
        frame: &RgbImage,
        regions: &mut [TransformedRegion],
        rotation_degrees: i32,
    ) -> RecognitionSummary {
        let start = Instant::now();
        let mut summary = RecognitionSummary {
            lingering_at_start: self.lingering_branches(),
            ..RecognitionSummary::default()
        };
        if summary.lingering_at_start > 0 {
            warn!(
                lingering = summary.lingering_at_start,
                "engine branches from an earlier batch are still running"
            );
        }
        let (tx, rx) = mpsc::channel::<(usize, Option<RegionContent>)>();

        for (idx, region) in regions.iter().enumerate() {
            let Some(crop) = crop_region(
                frame,
                &region.bounds_in_frame,
                region.source_region.kind,
                self.config.crop_expansion,
            ) else {
                summary.skipped += 1;
                continue;
            };
            let tx = tx.clone();
            let ocr = Arc::clone(&self.ocr);
            let barcode = Arc::clone(&self.barcode);
            let timeout = self.config.region_timeout();
            let live = Arc::clone(&self.live_branches);
            self.pool.spawn(move || {
                let content =
                    recognize_crop(ocr, barcode, Arc::new(crop), rotation_degrees, timeout, &live);
                // Receiver is gone once the batch deadline passed
                let _ = tx.send((idx, content));
            });
            summary.submitted += 1;
        }
        drop(tx);

        let deadline = start + self.config.batch_timeout();
        while summary.completed < summary.submitted {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((idx, content)) => {
                    summary.completed += 1;
                    if let (Some(c), Some(region)) = (content, regions.get_mut(idx)) {
                        region.recognized_content = Some(c.content);
                        region.recognized_format = c.format;
                        region.recognition_confidence = c.confidence;
                        summary.recognized += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        pending = summary.submitted - summary.completed,
                        "recognition batch timed out"
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        summary.timed_out = summary.submitted - summary.completed;
        summary.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(?summary, "recognition finished");
        summary
    }
}

/// Race barcode decoding and OCR on one crop
fn recognize_crop(
    ocr: Arc<dyn OcrEngine>,
    barcode: Arc<dyn BarcodeDecoder>,
    crop: Arc<RgbImage>,
    rotation_degrees: i32,
    timeout: Duration,
    live: &Arc<AtomicUsize>,
) -> Option<RegionContent> {
    let (tx, rx) = mpsc::channel::<Branch>();

    let barcode_tx = tx.clone();
    let barcode_crop = Arc::clone(&crop);
    let mut launched = 0;
    let barcode_guard = BranchGuard::new(live);
    if thread::Builder::new()
        .name("barcode-branch".into())
        .spawn(move || {
            let _guard = barcode_guard;
            let _ = barcode_tx.send(Branch::Barcode(barcode.decode(&barcode_crop, rotation_degrees)));
        })
        .is_ok()
    {
        launched += 1;
    }
    let ocr_guard = BranchGuard::new(live);
    if thread::Builder::new()
        .name("ocr-branch".into())
        .spawn(move || {
            let _guard = ocr_guard;
            let _ = tx.send(Branch::Ocr(ocr.recognize(&crop)));
        })
        .is_ok()
    {
        launched += 1;
    }

    let deadline = Instant::now() + timeout;
    let mut barcodes: Option<Vec<BarcodeResult>> = None;
    let mut fragments: Option<Vec<TextFragment>> = None;
    for _ in 0..launched {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Branch::Barcode(Ok(found))) => {
                let hit = found.iter().any(|b| !b.content.is_empty());
                barcodes = Some(found);
                if hit {
                    break;
                }
            }
            Ok(Branch::Ocr(Ok(found))) => fragments = Some(found),
            Ok(Branch::Barcode(Err(e))) | Ok(Branch::Ocr(Err(e))) => {
                debug!(error = %e, "recognition branch failed");
            }
            Err(_) => break,
        }
    }
    merge_results(barcodes.as_deref(), fragments.as_deref())
}
