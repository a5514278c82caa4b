//! Document → exam number → roster identity.

pub mod matcher;
pub mod rasterizer;
pub mod recognizer;
pub mod text_extractor;

pub use matcher::{IdentityMatcher, MatchOutcome};
pub use rasterizer::{DocumentHandle, PopplerRasterizer, RasterError, RasterImage, Rasterizer};
pub use recognizer::{RecognitionError, Recognizer, TesseractRecognizer};
pub use text_extractor::{ExtractedText, TextExtractor};
