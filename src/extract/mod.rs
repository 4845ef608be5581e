//! Format extraction (C2/C3, §4.2): per-MIME metadata harvest and plaintext
//! extraction. Unknown MIME types are never a hard failure — they simply
//! produce empty output, exactly as the teacher's ingestion never aborts on
//! an unrecognised file.

pub mod metadata;
pub mod text;

pub use metadata::extract_metadata;
pub use text::{extract_text, ExtractionMethod};
