//! Region projection and content recognition

/// Expanded crops around projected regions
pub mod crop;
/// Template region to frame projection
pub mod projector;
/// Barcode/OCR fan-out
pub mod recognizer;

pub use projector::{RegionProjector, RegionRejection};
pub use recognizer::{
    BarcodeDecoder, BarcodeResult, OcrEngine, RecognitionSummary, RegionContent,
    RegionContentRecognizer, TextFragment,
};
